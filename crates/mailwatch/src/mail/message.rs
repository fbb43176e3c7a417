use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header summary of one message, produced per check and never persisted.
///
/// Only [`MessageHeader::id`] outlives a check, as an entry in the dedup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Server-assigned identifier, stable across sessions.
    pub id: String,
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    /// `None` when the message carried no parseable `Date` header.
    pub date: Option<DateTime<Utc>>,
}

impl MessageHeader {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender_name: String::new(),
            sender_email: String::new(),
            subject: String::new(),
            date: None,
        }
    }

    /// Sender as shown to the user: the display name, else the address.
    pub fn sender_display(&self) -> &str {
        if !self.sender_name.trim().is_empty() {
            self.sender_name.trim()
        } else if !self.sender_email.trim().is_empty() {
            self.sender_email.trim()
        } else {
            "(unknown sender)"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_display_prefers_name() {
        let mut header = MessageHeader::new("1:1");
        assert_eq!(header.sender_display(), "(unknown sender)");

        header.sender_email = "alice@example.com".to_string();
        assert_eq!(header.sender_display(), "alice@example.com");

        header.sender_name = " Alice ".to_string();
        assert_eq!(header.sender_display(), "Alice");
    }
}
