use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::api::{ChatApi, ChatCompletionClient};
use crate::controller::ChatController;
use crate::events::{EventSender, UiEvent};
use crate::storage::Storage;

/// Everything a front end needs to drive a chat session: the controller
/// plus the handles it was wired from. Built once at startup.
pub struct App {
    pub controller: Arc<ChatController>,
    pub storage: Storage,
}

impl App {
    /// Opens (or creates) the database at `db_path`, loads the persisted
    /// settings and the previous session's history, and wires the live HTTP
    /// client. The returned receiver carries every UI event the controller
    /// emits.
    pub async fn open(db_path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<UiEvent>)> {
        Self::open_with(db_path, Arc::new(ChatCompletionClient::new())).await
    }

    /// Same wiring with a caller-supplied API client.
    pub async fn open_with(
        db_path: &Path,
        client: Arc<dyn ChatApi>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<UiEvent>)> {
        let storage = Storage::open(db_path).await?;
        Self::wire(storage, client).await
    }

    /// Fully in-memory app, used by tests and ephemeral sessions.
    pub async fn ephemeral(
        client: Arc<dyn ChatApi>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<UiEvent>)> {
        let storage = Storage::in_memory().await?;
        Self::wire(storage, client).await
    }

    async fn wire(
        storage: Storage,
        client: Arc<dyn ChatApi>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<UiEvent>)> {
        let settings = storage.load_settings().await;
        log::info!(
            "Starting with provider {} at {}",
            settings.provider.as_str(),
            settings.api_base_url
        );

        let (events, rx) = EventSender::channel();
        let controller = Arc::new(ChatController::new(
            client,
            storage.clone(),
            settings,
            events,
        ));
        controller.restore_history().await;

        Ok((
            Self {
                controller,
                storage,
            },
            rx,
        ))
    }
}
