use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Role string expected by the chat-completion API.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Lifecycle of a message. Only assistant placeholders start `Pending`;
/// they are resolved exactly once to `Complete` or `Failed`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Complete,
    Failed,
}

// Represents a single chat bubble. Owned by the MessageLog; the rendering
// layer only ever sees clones.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            created_at: Utc::now(),
            status,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }
}

/// Partial update applied to a pending message when its request resolves.
/// `id`, `role` and `created_at` are never touched.
#[derive(Clone, Debug, Default)]
pub struct MessagePatch {
    pub text: Option<String>,
    pub status: Option<MessageStatus>,
}

impl MessagePatch {
    pub fn resolved(text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            text: Some(text.into()),
            status: Some(status),
        }
    }
}

/// Named remote API vendor with documented defaults. Anything the defaults
/// table does not know about parses as DeepSeek.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    DeepSeek,
    OpenAI,
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek",
            Provider::OpenAI => "openai",
            Provider::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "custom" => Provider::Custom,
            _ => Provider::DeepSeek,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Theme::Light,
            _ => Theme::Dark,
        }
    }
}

/// User-facing configuration. Every field has a hard-coded fallback used
/// when the persisted value is missing or unparsable, so loading never fails.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub api_key: String,
    pub provider: Provider,
    pub api_base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
    pub theme: Theme,
    pub auto_scroll: bool,
    pub show_timestamps: bool,
    pub keyboard_sound: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let defaults = crate::config::defaults_for(Provider::DeepSeek);
        Self {
            api_key: String::new(),
            provider: Provider::DeepSeek,
            api_base_url: defaults.base_url.to_string(),
            model: defaults.model.to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            system_prompt: String::new(),
            theme: Theme::Dark,
            auto_scroll: true,
            show_timestamps: true,
            keyboard_sound: false,
        }
    }
}

/// Derived, ephemeral connection indicator. Never persisted; recomputed
/// after every send attempt or key test.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "state", content = "reason")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_string_parses_as_deepseek() {
        assert_eq!(Provider::parse("mistral"), Provider::DeepSeek);
        assert_eq!(Provider::parse(""), Provider::DeepSeek);
        assert_eq!(Provider::parse(" OpenAI "), Provider::OpenAI);
    }

    #[test]
    fn message_serializes_with_camel_case_keys() {
        let msg = Message::new(Role::User, "hi", MessageStatus::Complete);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["role"], "user");
        assert_eq!(json["status"], "complete");
    }

    #[test]
    fn settings_defaults_match_deepseek() {
        let settings = Settings::default();
        assert_eq!(settings.api_base_url, "https://api.deepseek.com/v1");
        assert_eq!(settings.model, "deepseek-chat");
        assert_eq!(settings.max_tokens, 2000);
    }
}
