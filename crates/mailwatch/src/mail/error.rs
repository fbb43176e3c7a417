//! Mail source error types.

use std::time::Duration;

use thiserror::Error;

use crate::secrets::SecretError;

/// Errors raised while talking to a mail server.
///
/// Causes are kept as `#[source]` so callers can walk the chain down to the
/// underlying socket or protocol error.
#[derive(Error, Debug)]
pub enum MailError {
    /// TCP connection to the server could not be established.
    #[error("Failed to connect to '{server}': {source}")]
    Connect {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS handshake failed.
    #[error("TLS handshake with '{server}' failed: {source}")]
    Tls {
        server: String,
        #[source]
        source: async_native_tls::Error,
    },

    /// The server rejected the credentials.
    #[error("Authentication failed for '{user}': {reason}")]
    Authentication { user: String, reason: String },

    /// IMAP protocol error after login.
    #[error("IMAP protocol error: {0}")]
    Protocol(#[source] async_imap::error::Error),

    /// A network step did not finish within the connection timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The account configuration cannot be used to connect.
    #[error("Invalid account configuration: {0}")]
    InvalidConfig(String),

    /// The password could not be resolved.
    #[error("Credentials unavailable: {0}")]
    Credentials(#[from] SecretError),

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MailError {
    pub fn other(message: impl Into<String>) -> Self {
        MailError::Other {
            message: message.into(),
            source: None,
        }
    }
}

/// Result type for mail operations.
pub type Result<T> = std::result::Result<T, MailError>;
