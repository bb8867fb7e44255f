use uuid::Uuid;

use crate::models::{Message, MessagePatch, MessageStatus, Role};

/// Storage cap observed in the reference behavior: once the log grows past
/// this many messages, the oldest are evicted.
pub const DEFAULT_LOG_CAP: usize = 50;

/// Ordered, capacity-bounded collection of chat messages. Exclusively owns
/// its messages; the UI only ever receives clones. All operations are
/// synchronous and immediately consistent — callers serialize access with a
/// mutex when sharing across tasks.
#[derive(Debug)]
pub struct MessageLog {
    messages: Vec<Message>,
    cap: usize,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAP)
    }

    /// `cap` of zero is treated as one: an append must always be able to
    /// retain the message it just created.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            cap: cap.max(1),
        }
    }

    /// Creates and appends a new message, evicting oldest-first if the log
    /// has outgrown its cap. Returns a clone; callers keep the id to resolve
    /// a pending placeholder later.
    pub fn append(&mut self, role: Role, text: impl Into<String>, status: MessageStatus) -> Message {
        let message = Message::new(role, text, status);
        self.push(message.clone());
        message
    }

    /// Re-inserts an existing message (history restore). Same eviction rule.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        if self.messages.len() > self.cap {
            let excess = self.messages.len() - self.cap;
            self.messages.drain(..excess);
        }
    }

    /// Merges a patch into the message with the given id, preserving
    /// id/role/created_at. Unknown ids are silently ignored.
    pub fn update(&mut self, id: Uuid, patch: MessagePatch) -> Option<Message> {
        let message = self.messages.iter_mut().find(|m| m.id == id)?;
        if let Some(text) = patch.text {
            message.text = text;
        }
        if let Some(status) = patch.status {
            message.status = status;
        }
        Some(message.clone())
    }

    /// No-op for unknown ids.
    pub fn remove(&mut self, id: Uuid) {
        self.messages.retain(|m| m.id != id);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Last `n` complete messages in chronological order, used as the
    /// context window for a completion request. System messages are never
    /// part of the remote conversation; the system prompt travels separately.
    pub fn recent_window(&self, n: usize) -> Vec<Message> {
        let mut window: Vec<Message> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.status == MessageStatus::Complete && m.role != Role::System)
            .take(n)
            .cloned()
            .collect();
        window.reverse();
        window
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_message_with_fresh_id() {
        let mut log = MessageLog::new();
        let a = log.append(Role::User, "one", MessageStatus::Complete);
        let b = log.append(Role::User, "two", MessageStatus::Complete);
        assert_ne!(a.id, b.id);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn append_past_cap_evicts_oldest_first() {
        let mut log = MessageLog::with_capacity(50);
        let first = log.append(Role::User, "msg 0", MessageStatus::Complete);
        for i in 1..51 {
            log.append(Role::User, format!("msg {i}"), MessageStatus::Complete);
        }
        assert_eq!(log.len(), 50);
        assert!(log.get(first.id).is_none());
        assert_eq!(log.messages()[0].text, "msg 1");
    }

    #[test]
    fn cap_invariant_holds_after_every_append() {
        let mut log = MessageLog::with_capacity(3);
        for i in 0..10 {
            log.append(Role::User, format!("{i}"), MessageStatus::Complete);
            assert!(log.len() <= 3);
        }
        assert_eq!(log.messages()[0].text, "7");
    }

    #[test]
    fn update_merges_patch_and_preserves_identity() {
        let mut log = MessageLog::new();
        let placeholder = log.append(Role::Assistant, "…", MessageStatus::Pending);

        let updated = log
            .update(
                placeholder.id,
                MessagePatch::resolved("Hi there", MessageStatus::Complete),
            )
            .unwrap();
        assert_eq!(updated.id, placeholder.id);
        assert_eq!(updated.created_at, placeholder.created_at);
        assert_eq!(updated.text, "Hi there");
        assert_eq!(updated.status, MessageStatus::Complete);
    }

    #[test]
    fn update_unknown_id_is_a_noop() {
        let mut log = MessageLog::new();
        log.append(Role::User, "hello", MessageStatus::Complete);
        let before: Vec<String> = log.messages().iter().map(|m| m.text.clone()).collect();

        let result = log.update(Uuid::new_v4(), MessagePatch::resolved("x", MessageStatus::Failed));
        assert!(result.is_none());
        let after: Vec<String> = log.messages().iter().map(|m| m.text.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn remove_unknown_id_is_a_noop() {
        let mut log = MessageLog::new();
        log.append(Role::User, "hello", MessageStatus::Complete);
        log.remove(Uuid::new_v4());
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = MessageLog::new();
        log.append(Role::User, "a", MessageStatus::Complete);
        log.append(Role::Assistant, "b", MessageStatus::Complete);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn recent_window_keeps_chronological_order() {
        let mut log = MessageLog::new();
        log.append(Role::User, "first", MessageStatus::Complete);
        log.append(Role::Assistant, "second", MessageStatus::Complete);
        log.append(Role::User, "third", MessageStatus::Complete);

        let window = log.recent_window(2);
        let texts: Vec<&str> = window.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["second", "third"]);
    }

    #[test]
    fn recent_window_skips_pending_failed_and_system() {
        let mut log = MessageLog::new();
        log.append(Role::System, "history cleared", MessageStatus::Complete);
        log.append(Role::User, "hello", MessageStatus::Complete);
        log.append(Role::Assistant, "…", MessageStatus::Pending);
        log.append(Role::Assistant, "network error", MessageStatus::Failed);

        let window = log.recent_window(10);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].text, "hello");
    }
}
