use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{ConnectionStatus, Message};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// One-way data flow to the rendering layer: the core mutates state, emits
/// an event, and never touches the UI directly. Payloads carry everything
/// needed to render a chat bubble or a status dot; markup is the
/// subscriber's business.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase", tag = "event", content = "payload")]
pub enum UiEvent {
    MessageAppended(Message),
    MessageUpdated(Message),
    LogCleared,
    StatusChanged(ConnectionStatus),
    Notice { text: String, level: NoticeLevel },
    /// The user needs to fix their configuration (e.g. no API key yet).
    OpenSettings,
}

/// Cheap-to-clone handle the core emits through. A detached or dropped
/// receiver is fine: events are fire-and-forget, the state itself stays
/// queryable.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: Option<mpsc::UnboundedSender<UiEvent>>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink with no receiver, for headless operation and tests.
    pub fn null() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: UiEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                log::debug!("UI event receiver detached; dropping event");
            }
        }
    }

    pub fn notice(&self, text: impl Into<String>, level: NoticeLevel) {
        self.emit(UiEvent::Notice {
            text: text.into(),
            level,
        });
    }
}
