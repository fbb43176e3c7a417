use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{AccountConfig, FetchLimits, Settings};

use super::error::Result;
use super::message::MessageHeader;

/// Limits for one mailbox session, taken from the settings in effect when
/// the call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub limits: FetchLimits,
    /// Applied to each network step.
    pub timeout: Duration,
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            limits: settings.fetch.clone(),
            timeout: settings.polling.connection_timeout(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Capability to reach a mailbox.
///
/// Failures are returned raw; deciding whether they are worth retrying is
/// left to [`crate::polling::classify`].
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Connects, authenticates and opens the configured folder.
    async fn test_connection(&self, account: &AccountConfig, options: &SessionOptions)
        -> Result<()>;

    /// Returns recent headers, newest first, bounded by `options.limits`.
    ///
    /// Implementations must return [`super::MailError::Cancelled`] promptly
    /// once `cancel` fires.
    async fn fetch_recent_headers(
        &self,
        account: &AccountConfig,
        options: &SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageHeader>>;
}
