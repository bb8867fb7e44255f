use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::api::{ChatApi, KeyTest};
use crate::config;
use crate::events::{EventSender, NoticeLevel, UiEvent};
use crate::history::MessageLog;
use crate::models::{ConnectionStatus, Message, MessagePatch, MessageStatus, Role, Settings};
use crate::storage::Storage;

/// Context-window bound: how many prior messages ride along with a
/// completion request. Independent of the log's storage cap.
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// Text a placeholder shows while its request is in flight.
pub const PENDING_MARKER: &str = "…";

/// Terminal result of one send cycle. Failures are already rendered as a
/// failed message by the time this is returned; nothing propagates as a
/// process-level error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Input was empty after trimming; nothing was appended.
    EmptyInput,
    /// No API key configured; nothing was appended, settings UI requested.
    MissingApiKey,
    /// Placeholder resolved to a completed assistant reply.
    Replied,
    /// Placeholder resolved to a failed message with the given error kind.
    Failed { kind: &'static str },
    /// The placeholder was cancelled while the request was in flight; the
    /// late resolution was dropped.
    Cancelled,
}

/// Orchestrates the optimistic send cycle: validate → append user message →
/// append pending placeholder → call the API → resolve the placeholder in
/// place, updating the connection status. Also owns the settings snapshot,
/// the key test and the clear-history action.
pub struct ChatController {
    log: Mutex<MessageLog>,
    client: Arc<dyn ChatApi>,
    storage: Storage,
    settings: RwLock<Settings>,
    status: RwLock<ConnectionStatus>,
    events: EventSender,
    // Placeholder ids with an unresolved request. An id removed by cancel()
    // before resolution means the late result must be dropped, so every
    // placeholder settles exactly once.
    in_flight: DashMap<Uuid, ()>,
    context_window: usize,
}

impl ChatController {
    pub fn new(
        client: Arc<dyn ChatApi>,
        storage: Storage,
        settings: Settings,
        events: EventSender,
    ) -> Self {
        Self {
            log: Mutex::new(MessageLog::new()),
            client,
            storage,
            settings: RwLock::new(settings),
            status: RwLock::new(ConnectionStatus::Disconnected),
            events,
            in_flight: DashMap::new(),
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }

    /// Storage-cap bound for the message log (see DEFAULT_LOG_CAP).
    pub fn with_log_capacity(mut self, cap: usize) -> Self {
        self.log = Mutex::new(MessageLog::with_capacity(cap));
        self
    }

    /// Context-window bound for completion requests.
    pub fn with_context_window(mut self, n: usize) -> Self {
        self.context_window = n.max(1);
        self
    }

    /// One full send cycle. Suspends only at the network call; every log
    /// operation in between holds the lock for a single call.
    pub async fn send(&self, raw_text: &str) -> SendOutcome {
        let text = raw_text.trim().to_string();
        if text.is_empty() {
            self.events
                .notice("Type a message first", NoticeLevel::Error);
            return SendOutcome::EmptyInput;
        }

        let settings = self.settings.read().await.clone();
        if settings.api_key.trim().is_empty() {
            self.events
                .notice("Set an API key in settings first", NoticeLevel::Error);
            self.events.emit(UiEvent::OpenSettings);
            return SendOutcome::MissingApiKey;
        }

        // The context window is captured before appending: the new user
        // text travels separately in the request payload.
        let (history, placeholder_id) = {
            let mut log = self.log.lock().await;
            let history = log.recent_window(self.context_window);

            let user = log.append(Role::User, text.as_str(), MessageStatus::Complete);
            self.events.emit(UiEvent::MessageAppended(user));

            let placeholder = log.append(Role::Assistant, PENDING_MARKER, MessageStatus::Pending);
            self.events
                .emit(UiEvent::MessageAppended(placeholder.clone()));
            (history, placeholder.id)
        };
        self.in_flight.insert(placeholder_id, ());
        self.set_status(ConnectionStatus::Connecting).await;

        let outcome = match self.client.complete(&text, &history, &settings).await {
            Ok(reply) => {
                if !self
                    .resolve(placeholder_id, reply, MessageStatus::Complete)
                    .await
                {
                    SendOutcome::Cancelled
                } else {
                    self.set_status(ConnectionStatus::Connected).await;
                    SendOutcome::Replied
                }
            }
            Err(err) => {
                log::error!("Send failed ({}): {err}", err.kind());
                let user_message = err.user_message();
                if !self
                    .resolve(placeholder_id, user_message.clone(), MessageStatus::Failed)
                    .await
                {
                    SendOutcome::Cancelled
                } else {
                    self.set_status(ConnectionStatus::Error(err.kind().to_string()))
                        .await;
                    self.events.notice(user_message, NoticeLevel::Error);
                    SendOutcome::Failed { kind: err.kind() }
                }
            }
        };

        self.persist_history().await;
        outcome
    }

    /// Settles a pending placeholder early as failed. The in-flight request
    /// keeps running until its transport gives up, but its resolution will
    /// be dropped. No-op for unknown or already settled ids.
    pub async fn cancel(&self, placeholder_id: Uuid) -> bool {
        if self.in_flight.remove(&placeholder_id).is_none() {
            return false;
        }
        log::info!("Cancelling pending message {placeholder_id}");
        let updated = self.log.lock().await.update(
            placeholder_id,
            MessagePatch::resolved("Cancelled.", MessageStatus::Failed),
        );
        if let Some(message) = updated {
            self.events.emit(UiEvent::MessageUpdated(message));
        }
        self.set_status(ConnectionStatus::Disconnected).await;
        true
    }

    /// "Test connection" action: probes the models endpoint and updates the
    /// status indicator. Never fails; the result carries whatever status
    /// code was available.
    pub async fn test_connection(&self) -> KeyTest {
        let settings = self.settings.read().await.clone();
        let result = self.client.test_key(&settings).await;
        if result.ok {
            self.set_status(ConnectionStatus::Connected).await;
            self.events.notice("API key is valid", NoticeLevel::Info);
        } else {
            let reason = match result.status {
                Some(status) => format!("key test failed ({status})"),
                None => "key test failed (no response)".to_string(),
            };
            self.set_status(ConnectionStatus::Error(reason.clone())).await;
            self.events.notice(reason, NoticeLevel::Error);
        }
        result
    }

    /// Applies provider defaults, persists and swaps the live settings.
    /// A broken store degrades to in-memory operation for the session.
    pub async fn save_settings(&self, new_settings: Settings) {
        let normalized = config::apply_provider_defaults(new_settings);
        if let Err(e) = self.storage.save_settings(&normalized).await {
            log::warn!("Settings not persisted, keeping them for this session only: {e:#}");
        }
        *self.settings.write().await = normalized;
        self.events.notice("Settings saved", NoticeLevel::Info);
    }

    /// Empties the log and the persisted snapshot.
    pub async fn clear_history(&self) {
        self.log.lock().await.clear();
        if let Err(e) = self.storage.save_history(&[]).await {
            log::warn!("Failed to clear persisted history: {e:#}");
        }
        self.events.emit(UiEvent::LogCleared);
        self.events.notice("History cleared", NoticeLevel::Info);
    }

    /// Loads the previous session's snapshot into the log. Called once at
    /// startup, before any send.
    pub async fn restore_history(&self) {
        let messages = self.storage.load_history().await;
        if messages.is_empty() {
            return;
        }
        log::info!("Restoring {} messages from the previous session", messages.len());
        let mut log = self.log.lock().await;
        for message in messages {
            log.push(message);
        }
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.status.read().await.clone()
    }

    /// Read-only snapshot for rendering.
    pub async fn messages(&self) -> Vec<Message> {
        self.log.lock().await.messages().to_vec()
    }

    async fn set_status(&self, status: ConnectionStatus) {
        *self.status.write().await = status.clone();
        self.events.emit(UiEvent::StatusChanged(status));
    }

    /// Applies the resolution patch unless the placeholder was cancelled.
    /// Returns whether the patch was applied.
    async fn resolve(&self, id: Uuid, text: String, status: MessageStatus) -> bool {
        if self.in_flight.remove(&id).is_none() {
            log::debug!("Placeholder {id} already settled; dropping late resolution");
            return false;
        }
        let updated = self
            .log
            .lock()
            .await
            .update(id, MessagePatch::resolved(text, status));
        if let Some(message) = updated {
            self.events.emit(UiEvent::MessageUpdated(message));
        }
        true
    }

    async fn persist_history(&self) {
        let snapshot = self.log.lock().await.messages().to_vec();
        if let Err(e) = self.storage.save_history(&snapshot).await {
            log::warn!("Failed to persist history: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Scripted stand-in for the remote API: pops one canned response per
    /// call, optionally delaying to keep a request in flight.
    struct ScriptedApi {
        responses: Mutex<VecDeque<Result<String, ApiError>>>,
        delay: Option<Duration>,
    }

    impl ScriptedApi {
        fn replying(reply: &str) -> Self {
            Self::with(vec![Ok(reply.to_string())])
        }

        fn failing(err: ApiError) -> Self {
            Self::with(vec![Err(err)])
        }

        fn with(responses: Vec<Result<String, ApiError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                delay: None,
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl ChatApi for ScriptedApi {
        async fn complete(
            &self,
            _user_text: &str,
            _history: &[Message],
            _settings: &Settings,
        ) -> Result<String, ApiError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(ApiError::MalformedResponse))
        }

        async fn test_key(&self, settings: &Settings) -> KeyTest {
            if settings.api_key.is_empty() {
                KeyTest {
                    ok: false,
                    status: None,
                }
            } else {
                KeyTest {
                    ok: true,
                    status: Some(200),
                }
            }
        }
    }

    fn keyed_settings() -> Settings {
        let mut settings = Settings::default();
        settings.api_key = "sk-test".to_string();
        settings
    }

    async fn controller_with(api: ScriptedApi, settings: Settings) -> Arc<ChatController> {
        let storage = Storage::in_memory().await.unwrap();
        Arc::new(ChatController::new(
            Arc::new(api),
            storage,
            settings,
            EventSender::null(),
        ))
    }

    #[tokio::test]
    async fn empty_input_appends_nothing() {
        let controller = controller_with(ScriptedApi::replying("unused"), keyed_settings()).await;
        let outcome = controller.send("   \n\t ").await;
        assert_eq!(outcome, SendOutcome::EmptyInput);
        assert!(controller.messages().await.is_empty());
    }

    #[tokio::test]
    async fn missing_api_key_appends_nothing_and_requests_settings() {
        let api = ScriptedApi::replying("unused");
        let storage = Storage::in_memory().await.unwrap();
        let (events, mut rx) = EventSender::channel();
        let controller =
            ChatController::new(Arc::new(api), storage, Settings::default(), events);

        let outcome = controller.send("hello").await;
        assert_eq!(outcome, SendOutcome::MissingApiKey);
        assert!(controller.messages().await.is_empty());
        assert_eq!(controller.status().await, ConnectionStatus::Disconnected);

        assert!(matches!(rx.try_recv().unwrap(), UiEvent::Notice { .. }));
        assert!(matches!(rx.try_recv().unwrap(), UiEvent::OpenSettings));
    }

    #[tokio::test]
    async fn successful_send_appends_user_and_resolved_assistant() {
        let controller = controller_with(ScriptedApi::replying("Hi there"), keyed_settings()).await;
        let outcome = controller.send("hello").await;
        assert_eq!(outcome, SendOutcome::Replied);

        let messages = controller.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].status, MessageStatus::Complete);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text, "Hi there");
        assert_eq!(messages[1].status, MessageStatus::Complete);

        assert_eq!(controller.status().await, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn failed_send_resolves_placeholder_with_hint() {
        let controller = controller_with(
            ScriptedApi::failing(ApiError::PaymentRequired {
                hint: Some("check balance".to_string()),
            }),
            keyed_settings(),
        )
        .await;

        let outcome = controller.send("x").await;
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                kind: "payment-required"
            }
        );

        let messages = controller.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].status, MessageStatus::Failed);
        assert!(messages[1].text.contains("check balance"));

        assert_eq!(
            controller.status().await,
            ConnectionStatus::Error("payment-required".to_string())
        );
    }

    #[tokio::test]
    async fn placeholder_transitions_through_pending() {
        let api = ScriptedApi::replying("slow reply").delayed(Duration::from_millis(50));
        let storage = Storage::in_memory().await.unwrap();
        let (events, mut rx) = EventSender::channel();
        let controller = Arc::new(ChatController::new(
            Arc::new(api),
            storage,
            keyed_settings(),
            events,
        ));

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send("hello").await }
        });

        // First two events are the optimistic appends.
        let user_event = rx.recv().await.unwrap();
        assert!(matches!(user_event, UiEvent::MessageAppended(ref m) if m.role == Role::User));
        let UiEvent::MessageAppended(placeholder) = rx.recv().await.unwrap() else {
            panic!("expected placeholder append");
        };
        assert_eq!(placeholder.status, MessageStatus::Pending);
        assert_eq!(placeholder.text, PENDING_MARKER);

        assert_eq!(task.await.unwrap(), SendOutcome::Replied);
        let messages = controller.messages().await;
        assert_eq!(messages[1].id, placeholder.id);
        assert_eq!(messages[1].status, MessageStatus::Complete);
    }

    #[tokio::test]
    async fn cancel_settles_placeholder_and_drops_late_resolution() {
        let api = ScriptedApi::replying("too late").delayed(Duration::from_millis(200));
        let storage = Storage::in_memory().await.unwrap();
        let (events, mut rx) = EventSender::channel();
        let controller = Arc::new(ChatController::new(
            Arc::new(api),
            storage,
            keyed_settings(),
            events,
        ));

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.send("hello").await }
        });

        rx.recv().await.unwrap(); // user append
        let UiEvent::MessageAppended(placeholder) = rx.recv().await.unwrap() else {
            panic!("expected placeholder append");
        };

        assert!(controller.cancel(placeholder.id).await);
        // Second cancel is a no-op.
        assert!(!controller.cancel(placeholder.id).await);

        assert_eq!(task.await.unwrap(), SendOutcome::Cancelled);
        let messages = controller.messages().await;
        assert_eq!(messages[1].status, MessageStatus::Failed);
        assert_eq!(messages[1].text, "Cancelled.");
    }

    #[tokio::test]
    async fn concurrent_sends_resolve_their_own_placeholders() {
        let api = ScriptedApi::with(vec![
            Ok("first reply".to_string()),
            Ok("second reply".to_string()),
        ])
        .delayed(Duration::from_millis(20));
        let controller = controller_with(api, keyed_settings()).await;

        let (a, b) = tokio::join!(controller.send("one"), controller.send("two"));
        assert_eq!(a, SendOutcome::Replied);
        assert_eq!(b, SendOutcome::Replied);

        let messages = controller.messages().await;
        assert_eq!(messages.len(), 4);
        let replies: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.text.as_str())
            .collect();
        assert!(replies.contains(&"first reply"));
        assert!(replies.contains(&"second reply"));
        assert!(messages.iter().all(|m| m.status == MessageStatus::Complete));
    }

    #[tokio::test]
    async fn save_settings_applies_provider_defaults() {
        let controller = controller_with(ScriptedApi::replying("unused"), keyed_settings()).await;

        let mut new_settings = keyed_settings();
        new_settings.provider = crate::models::Provider::OpenAI;
        new_settings.api_base_url = "http://wrong.example".to_string();
        controller.save_settings(new_settings).await;

        let live = controller.settings().await;
        assert_eq!(live.api_base_url, "https://api.openai.com/v1");
        assert_eq!(live.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn clear_history_empties_log_and_snapshot() {
        let controller = controller_with(ScriptedApi::replying("Hi"), keyed_settings()).await;
        controller.send("hello").await;
        assert_eq!(controller.messages().await.len(), 2);

        controller.clear_history().await;
        assert!(controller.messages().await.is_empty());
    }

    #[tokio::test]
    async fn history_survives_restore_cycle() {
        let storage = Storage::in_memory().await.unwrap();
        let first = ChatController::new(
            Arc::new(ScriptedApi::replying("Hi there")),
            storage.clone(),
            keyed_settings(),
            EventSender::null(),
        );
        first.send("hello").await;

        let second = ChatController::new(
            Arc::new(ScriptedApi::replying("unused")),
            storage,
            keyed_settings(),
            EventSender::null(),
        );
        second.restore_history().await;

        let messages = second.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[1].text, "Hi there");
    }

    #[tokio::test]
    async fn test_connection_updates_status() {
        let controller = controller_with(ScriptedApi::replying("unused"), keyed_settings()).await;
        let result = controller.test_connection().await;
        assert!(result.ok);
        assert_eq!(controller.status().await, ConnectionStatus::Connected);

        let keyless = controller_with(ScriptedApi::replying("unused"), Settings::default()).await;
        let result = keyless.test_connection().await;
        assert!(!result.ok);
        assert!(matches!(
            keyless.status().await,
            ConnectionStatus::Error(_)
        ));
    }
}
