//! Builders for settings used across integration tests.

#![allow(dead_code)]

use mailwatch::config::{AccountAuth, AccountConfig, AccountKey, Settings};

pub const SERVER: &str = "imap.example.com";

/// Builder for a complete, enabled account on [`SERVER`].
pub struct AccountBuilder {
    account: AccountConfig,
}

impl AccountBuilder {
    pub fn new(user: &str) -> Self {
        Self {
            account: AccountConfig::new(SERVER, user, AccountAuth::with_password("secret")),
        }
    }

    pub fn refresh_minutes(mut self, minutes: u32) -> Self {
        self.account.refresh_minutes = minutes;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.account.enabled = false;
        self
    }

    /// Removes every password source, making the account incomplete.
    pub fn without_password(mut self) -> Self {
        self.account.auth = AccountAuth::default();
        self
    }

    pub fn display_name(mut self, name: &str) -> Self {
        self.account.display_name = Some(name.to_string());
        self
    }

    pub fn web_link(mut self, link: &str) -> Self {
        self.account.web_link = Some(link.to_string());
        self
    }

    pub fn build(self) -> AccountConfig {
        self.account
    }
}

/// Builder for `Settings` with refresh enabled and no accounts.
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
        }
    }

    pub fn account(mut self, account: AccountBuilder) -> Self {
        self.settings.accounts.push(account.build());
        self
    }

    pub fn refresh_enabled(mut self, enabled: bool) -> Self {
        self.settings.refresh_enabled = enabled;
        self
    }

    pub fn max_messages(mut self, max: usize) -> Self {
        self.settings.fetch.max_messages = max;
        self
    }

    pub fn connection_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.polling.connection_timeout_secs = secs;
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.settings.polling.shutdown_grace_secs = secs;
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}

pub fn key(user: &str) -> AccountKey {
    AccountKey::new(SERVER, user)
}
