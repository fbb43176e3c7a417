pub mod broadcast;
pub mod config;
pub mod dedup;
pub mod error;
pub mod mail;
pub mod network;
pub mod notify;
pub mod polling;
pub mod secrets;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcast::{PollEvent, PollEventBroadcaster};
pub use config::{load_settings, save_settings, AccountConfig, AccountKey, Settings};
pub use dedup::{DedupStore, KnownIds};
pub use error::{ConfigError, MailwatchError, Result, StoreError};
pub use mail::{ImapMailClient, MailClient, MailError, MessageHeader, SessionOptions};
pub use network::{ReachabilityProbe, SystemProbe};
pub use notify::{DesktopNotifier, NotificationSink, NotifyError};
pub use polling::{classify, AccountRuntimeState, ErrorClass, PollPhase, PollingCoordinator};
pub use secrets::{resolve_account_password, PasswordCipher, SecretError};
