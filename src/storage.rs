use anyhow::{Context, Result};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::path::Path;

use crate::config;
use crate::models::{Message, Settings, Provider, Theme};

// Key-value schema; every settings field is stored as its string form, the
// chat log snapshot as one JSON value.
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

mod keys {
    pub const API_KEY: &str = "apiKey";
    pub const PROVIDER: &str = "provider";
    pub const API_BASE_URL: &str = "apiBaseUrl";
    pub const MODEL: &str = "model";
    pub const MAX_TOKENS: &str = "maxTokens";
    pub const TEMPERATURE: &str = "temperature";
    pub const SYSTEM_PROMPT: &str = "systemPrompt";
    pub const THEME: &str = "theme";
    pub const AUTO_SCROLL: &str = "autoScroll";
    pub const SHOW_TIMESTAMPS: &str = "showTimestamps";
    pub const KEYBOARD_SOUND: &str = "keyboardSound";
    pub const MESSAGES: &str = "messages";
}

/// Durable key→string map surviving restarts. Settings loading never fails:
/// a broken store degrades to an in-memory database for the session and
/// missing or unparsable values take their documented defaults.
#[derive(Clone, Debug)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Connects to the database at `db_path`, creating file and schema as
    /// needed. A store that cannot be opened (permissions, full disk) falls
    /// back to in-memory operation rather than failing the process.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                log::warn!("Failed to create database directory: {e}");
            }
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {db_url}");
        match Self::connect(&db_url).await {
            Ok(storage) => Ok(storage),
            Err(e) => {
                log::warn!("Settings store unavailable ({e:#}); continuing in-memory for this session");
                Self::in_memory().await
            }
        }
    }

    /// Session-only store with no file behind it.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn connect(db_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            log::info!("Database not found, creating...");
            Sqlite::create_database(db_url)
                .await
                .context("Failed to create database")?;
        }

        // Single connection: the store is low-traffic and an in-memory
        // database must not be split across pooled connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        sqlx::query(MIGRATIONS_SQL)
            .execute(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Raw read. Read errors are logged and reported as absent so callers
    /// fall through to their defaults.
    pub async fn get(&self, key: &str) -> Option<String> {
        match sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row.map(|r| r.get::<String, _>("value")),
            Err(e) => {
                log::warn!("Failed to read setting '{key}': {e}");
                None
            }
        }
    }

    /// Raw upsert.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write setting '{key}'"))?;
        Ok(())
    }

    /// Reads every settings field, substituting the documented default for
    /// anything missing or unparsable, then normalizes base URL/model
    /// against the provider defaults table. Always returns a fully
    /// populated value.
    pub async fn load_settings(&self) -> Settings {
        let defaults = Settings::default();
        let mut settings = Settings {
            api_key: self.get(keys::API_KEY).await.unwrap_or_default(),
            provider: self
                .get(keys::PROVIDER)
                .await
                .map(|v| Provider::parse(&v))
                .unwrap_or(defaults.provider),
            api_base_url: self
                .get(keys::API_BASE_URL)
                .await
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.api_base_url),
            model: self
                .get(keys::MODEL)
                .await
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.model),
            max_tokens: self
                .parse_value(keys::MAX_TOKENS)
                .await
                .filter(|&n: &u32| n > 0)
                .unwrap_or(defaults.max_tokens),
            temperature: self
                .parse_value(keys::TEMPERATURE)
                .await
                .filter(|t: &f32| (0.0..=2.0).contains(t))
                .unwrap_or(defaults.temperature),
            system_prompt: self
                .get(keys::SYSTEM_PROMPT)
                .await
                .unwrap_or(defaults.system_prompt),
            theme: self
                .get(keys::THEME)
                .await
                .map(|v| Theme::parse(&v))
                .unwrap_or(defaults.theme),
            auto_scroll: self
                .parse_value(keys::AUTO_SCROLL)
                .await
                .unwrap_or(defaults.auto_scroll),
            show_timestamps: self
                .parse_value(keys::SHOW_TIMESTAMPS)
                .await
                .unwrap_or(defaults.show_timestamps),
            keyboard_sound: self
                .parse_value(keys::KEYBOARD_SOUND)
                .await
                .unwrap_or(defaults.keyboard_sound),
        };

        if settings.api_key.trim().is_empty() {
            if let Some(key) = config::api_key_from_env() {
                settings.api_key = key;
            }
        }

        config::apply_provider_defaults(settings)
    }

    async fn parse_value<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring unparsable value for setting '{key}': {raw}");
                None
            }
        }
    }

    /// Writes every field back as its string form. Provider defaults are
    /// re-applied first so a non-custom provider can never persist a
    /// mismatched base URL/model pair.
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let settings = config::apply_provider_defaults(settings.clone());
        self.set(keys::API_KEY, &settings.api_key).await?;
        self.set(keys::PROVIDER, settings.provider.as_str()).await?;
        self.set(keys::API_BASE_URL, &settings.api_base_url).await?;
        self.set(keys::MODEL, &settings.model).await?;
        self.set(keys::MAX_TOKENS, &settings.max_tokens.to_string())
            .await?;
        self.set(keys::TEMPERATURE, &settings.temperature.to_string())
            .await?;
        self.set(keys::SYSTEM_PROMPT, &settings.system_prompt).await?;
        self.set(keys::THEME, settings.theme.as_str()).await?;
        self.set(keys::AUTO_SCROLL, &settings.auto_scroll.to_string())
            .await?;
        self.set(keys::SHOW_TIMESTAMPS, &settings.show_timestamps.to_string())
            .await?;
        self.set(keys::KEYBOARD_SOUND, &settings.keyboard_sound.to_string())
            .await?;
        log::info!("Settings saved");
        Ok(())
    }

    /// Chat log snapshot from the previous session. Parse failures are
    /// logged and reported as an empty history.
    pub async fn load_history(&self) -> Vec<Message> {
        let Some(raw) = self.get(keys::MESSAGES).await else {
            return Vec::new();
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("Discarding unreadable history snapshot: {e}");
                Vec::new()
            }
        }
    }

    /// Persists the log as one JSON value. Pending placeholders are dropped:
    /// a request from a dead session can never resolve them.
    pub async fn save_history(&self, messages: &[Message]) -> Result<()> {
        let snapshot: Vec<&Message> = messages.iter().filter(|m| !m.is_pending()).collect();
        let json = serde_json::to_string(&snapshot).context("Failed to serialize history")?;
        self.set(keys::MESSAGES, &json).await
    }
}
