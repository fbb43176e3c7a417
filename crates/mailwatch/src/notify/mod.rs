//! Notification sink.
//!
//! The polling core hands batches of new messages and error texts to a
//! [`NotificationSink`]; failures are logged by the caller and never change
//! polling state.

pub mod desktop;
pub mod format;

use thiserror::Error;

use crate::config::AccountKey;
use crate::mail::MessageHeader;

pub use desktop::DesktopNotifier;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to display notification: {0}")]
    Display(String),

    #[error("Failed to start notification thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Receives user-facing notifications. Implementations must not block for
/// long; the caller is a polling loop.
pub trait NotificationSink: Send + Sync {
    /// `messages` are the new messages of one check, newest first.
    fn show_new_mail(
        &self,
        messages: &[MessageHeader],
        account: &AccountKey,
        web_link: Option<&str>,
        display_name: &str,
    ) -> Result<(), NotifyError>;

    fn show_error(&self, message: &str) -> Result<(), NotifyError>;
}
