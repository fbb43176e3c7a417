use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::has_secret_source;

/// Default implicit-TLS IMAP port.
pub const DEFAULT_PORT: u16 = 993;
/// Default refresh interval in minutes.
pub const DEFAULT_REFRESH_MINUTES: u32 = 5;
/// Default mailbox to watch.
pub const DEFAULT_FOLDER: &str = "INBOX";
/// Maximum number of accounts in one settings file.
pub const MAX_ACCOUNTS: usize = 10;

/// Stable identity of a configured mailbox, derived from server and user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(String);

impl AccountKey {
    pub fn new(server: &str, user_id: &str) -> Self {
        Self(format!("{}|{}", server.trim(), user_id.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where the account password comes from.
///
/// Sources are tried in order: direct value, encrypted value, file, env var.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAuth {
    /// Plain password stored in the settings file. Not recommended.
    #[serde(default, rename = "password", skip_serializing_if = "Option::is_none")]
    pub password_insecure: Option<String>,

    /// Password encrypted with [`crate::secrets::PasswordCipher`], hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_encrypted: Option<String>,

    /// Path to a file containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,

    /// Name of an environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,
}

impl AccountAuth {
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password_insecure: Some(password.into()),
            ..Self::default()
        }
    }

    pub fn with_env_var(name: impl Into<String>) -> Self {
        Self {
            password_env_var: Some(name.into()),
            ..Self::default()
        }
    }

    /// Returns true if at least one password source is set.
    pub fn has_source(&self) -> bool {
        self.password_encrypted.as_deref().is_some_and(|s| !s.is_empty())
            || has_secret_source(
                self.password_insecure.as_deref(),
                self.password_file.as_deref(),
                self.password_env_var.as_deref(),
            )
    }
}

/// Connection and scheduling parameters of one mailbox.
///
/// Handed to a polling loop as an immutable snapshot; a new configuration
/// always produces fresh values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    pub server: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub tls: bool,

    pub user_id: String,

    #[serde(default)]
    pub auth: AccountAuth,

    #[serde(default = "default_refresh_minutes")]
    pub refresh_minutes: u32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_link: Option<String>,

    #[serde(default = "default_folder")]
    pub folder: String,
}

impl AccountConfig {
    /// Creates an enabled account with default port, TLS, folder and interval.
    pub fn new(server: impl Into<String>, user_id: impl Into<String>, auth: AccountAuth) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_PORT,
            tls: true,
            user_id: user_id.into(),
            auth,
            refresh_minutes: DEFAULT_REFRESH_MINUTES,
            enabled: true,
            display_name: None,
            web_link: None,
            folder: DEFAULT_FOLDER.to_string(),
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(&self.server, &self.user_id)
    }

    /// Returns true when every field needed to poll the account is filled in.
    pub fn has_required_values(&self) -> bool {
        !self.server.trim().is_empty()
            && !self.user_id.trim().is_empty()
            && self.auth.has_source()
            && self.refresh_minutes > 0
    }

    /// Returns true when the account should get a polling loop.
    pub fn is_pollable(&self) -> bool {
        self.enabled && self.has_required_values()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_minutes) * 60)
    }

    /// Name shown in notifications; falls back to `user@server`.
    pub fn display_name(&self) -> String {
        match self.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}@{}", self.user_id, self.server),
        }
    }

    pub fn web_link(&self) -> Option<&str> {
        self.web_link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
    }
}

/// Timing knobs shared by every polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollingOptions {
    /// How long a check waits for the previous check of the same account.
    pub lock_timeout_secs: u64,
    /// Timeout applied to each network step of the mail client.
    pub connection_timeout_secs: u64,
    /// Consecutive busy skips after which a warning is logged.
    pub busy_warn_threshold: u32,
    /// How long shutdown waits for in-flight checks before abandoning them.
    pub shutdown_grace_secs: u64,
}

impl PollingOptions {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 30,
            connection_timeout_secs: 30,
            busy_warn_threshold: 3,
            shutdown_grace_secs: 5,
        }
    }
}

/// Bounds on how much of a mailbox a single check looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchLimits {
    /// Maximum headers returned per check.
    pub max_messages: usize,
    /// Messages older than this many days are ignored.
    pub max_age_days: u32,
    /// Stop scanning after this many too-old messages in a row.
    pub consecutive_old_threshold: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_messages: 100,
            max_age_days: 30,
            consecutive_old_threshold: 10,
        }
    }
}

/// Complete settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub refresh_enabled: bool,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    #[serde(default)]
    pub polling: PollingOptions,

    #[serde(default)]
    pub fetch: FetchLimits,
}

impl Settings {
    pub fn with_accounts(accounts: Vec<AccountConfig>) -> Self {
        Self {
            accounts,
            ..Self::default()
        }
    }

    /// Number of accounts with all required fields present.
    pub fn valid_account_count(&self) -> usize {
        self.accounts
            .iter()
            .filter(|a| a.has_required_values())
            .count()
    }

    pub fn has_valid_accounts(&self) -> bool {
        self.valid_account_count() > 0
    }

    /// Accounts that should be polled: enabled and complete.
    pub fn pollable_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.is_pollable())
    }

    pub fn find(&self, key: &AccountKey) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| &a.key() == key)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh_enabled: true,
            accounts: Vec::new(),
            polling: PollingOptions::default(),
            fetch: FetchLimits::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_refresh_minutes() -> u32 {
    DEFAULT_REFRESH_MINUTES
}

fn default_folder() -> String {
    DEFAULT_FOLDER.to_string()
}
