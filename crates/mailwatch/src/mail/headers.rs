use chrono::{DateTime, Utc};
use mail_parser::MessageParser;

use super::message::MessageHeader;

/// Parses raw RFC 5322 header bytes into a [`MessageHeader`].
///
/// Returns `None` when the bytes do not look like a message header block.
pub fn parse_header_block(id: &str, raw: &[u8]) -> Option<MessageHeader> {
    let message = MessageParser::default().parse(raw)?;

    let (sender_name, sender_email) = message
        .from()
        .and_then(|from| from.first())
        .map(|addr| {
            (
                addr.name().unwrap_or_default().trim().to_string(),
                addr.address().unwrap_or_default().trim().to_string(),
            )
        })
        .unwrap_or_default();

    let date = message
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0));

    Some(MessageHeader {
        id: id.to_string(),
        sender_name,
        sender_email,
        subject: message.subject().unwrap_or_default().trim().to_string(),
        date,
    })
}
