//! Per-order chat overlay.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{ChatMessage, MessageHistory, OrderId};
use crate::schedule::TimerId;

/// Trims and checks a message before it is sent.
pub fn validate_message(text: &str, max_chars: usize) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required { field: "Message" });
    }
    let len = trimmed.chars().count();
    if len > max_chars {
        return Err(ValidationError::TooLong {
            field: "Message",
            len,
            max: max_chars,
        });
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub order_id: OrderId,
    /// Closed orders keep a read-only history.
    pub writable: bool,
    pub messages: Vec<ChatMessage>,
    pub loaded: bool,
    pub sending: bool,
    #[serde(skip)]
    pub poll_timer: Option<TimerId>,
}

impl ChatSession {
    #[must_use]
    pub fn new(order_id: OrderId, writable: bool) -> Self {
        Self {
            order_id,
            writable,
            messages: Vec::new(),
            loaded: false,
            sending: false,
            poll_timer: None,
        }
    }

    #[must_use]
    pub fn accepts(&self, order_id: OrderId) -> bool {
        self.order_id == order_id
    }

    /// Replaces the history with the server's copy. Returns whether anything
    /// changed.
    pub fn apply_history(&mut self, history: MessageHistory) -> bool {
        self.loaded = true;
        if self.messages == history.messages {
            return false;
        }
        self.messages = history.messages;
        true
    }

    pub fn push_sent(&mut self, message: ChatMessage) {
        if !self.messages.iter().any(|m| m.id == message.id) {
            self.messages.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageId;

    fn message(id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId(id),
            sender_id: None,
            sender_name: None,
            sender_role: None,
            message_text: text.into(),
            created_at: None,
            is_mine: false,
            read_by_customer: false,
            read_by_driver: false,
        }
    }

    #[test]
    fn test_validate_message() {
        assert_eq!(validate_message("  hi  ", 2000), Ok("hi".into()));
        assert_eq!(
            validate_message(" \n\t", 2000),
            Err(ValidationError::Required { field: "Message" })
        );
        let long = "я".repeat(2001);
        assert!(matches!(
            validate_message(&long, 2000),
            Err(ValidationError::TooLong { len: 2001, max: 2000, .. })
        ));
        assert!(validate_message(&"я".repeat(2000), 2000).is_ok());
    }

    #[test]
    fn test_history_replacement_reports_change() {
        let mut chat = ChatSession::new(OrderId(1), true);
        let history = MessageHistory {
            messages: vec![message(1, "a")],
            unread_count: 0,
        };
        assert!(chat.apply_history(history.clone()));
        assert!(!chat.apply_history(history));
        assert!(chat.loaded);
    }

    #[test]
    fn test_push_sent_deduplicates() {
        let mut chat = ChatSession::new(OrderId(1), true);
        chat.push_sent(message(5, "x"));
        chat.push_sent(message(5, "x"));
        assert_eq!(chat.messages.len(), 1);
        assert!(chat.accepts(OrderId(1)));
        assert!(!chat.accepts(OrderId(2)));
    }
}
