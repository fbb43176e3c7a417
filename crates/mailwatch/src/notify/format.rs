//! Text of the notifications shown for new mail and errors.

use chrono::Local;

use crate::mail::MessageHeader;

pub const MAX_SENDER_CHARS: usize = 50;
pub const MAX_SUBJECT_CHARS: usize = 100;
pub const MAX_ERROR_CHARS: usize = 100;

/// Rendered notification text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub summary: String,
    pub body: String,
    /// Opened when the notification is clicked.
    pub link: Option<String>,
}

/// Shortens `text` to at most `max_chars` characters, ending in "...".
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// One message shows sender, received time and subject; several show the
/// count with the newest sender and subject.
pub fn new_mail_notice(
    messages: &[MessageHeader],
    display_name: &str,
    web_link: Option<&str>,
) -> Option<Notice> {
    let mut lines = Vec::with_capacity(4);

    let summary = match messages {
        [] => return None,
        [only] => {
            lines.push(format!(
                "From: {}",
                truncate(only.sender_display(), MAX_SENDER_CHARS)
            ));
            if let Some(date) = only.date {
                lines.push(format!(
                    "Received: {}",
                    date.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                ));
            }
            lines.push(truncate(&only.subject, MAX_SUBJECT_CHARS));
            format!("{}: new mail", display_name)
        }
        many => {
            let latest = many
                .iter()
                .max_by_key(|m| m.date)
                .unwrap_or(&many[0]);
            lines.push(format!(
                "From: {}",
                truncate(latest.sender_display(), MAX_SENDER_CHARS)
            ));
            lines.push(format!(
                "Latest: {}",
                truncate(&latest.subject, MAX_SUBJECT_CHARS)
            ));
            format!("{}: {} new messages", display_name, many.len())
        }
    };

    if let Some(link) = web_link {
        lines.push(link.to_string());
    }

    Some(Notice {
        summary,
        body: lines.join("\n"),
        link: web_link.map(str::to_string),
    })
}

pub fn error_notice(message: &str) -> Notice {
    Notice {
        summary: "Mail check failed".to_string(),
        body: truncate(message, MAX_ERROR_CHARS),
        link: None,
    }
}
