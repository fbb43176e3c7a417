use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::schema::{Settings, MAX_ACCOUNTS};
use crate::dedup::MAX_IDS_PER_ACCOUNT;
use crate::error::ConfigError;
use crate::secrets::{PasswordCipher, SecretError};

const APP_DIR: &str = "mailwatch";
const SETTINGS_FILE: &str = "settings.json";

/// Default settings location: `<config_dir>/mailwatch/settings.json`.
pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

/// Default dedup state directory: `<data_dir>/mailwatch/mail`.
pub fn default_state_dir() -> Result<PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join("mail"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Loads settings from `path`.
///
/// A missing or empty file yields default settings.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    if content.trim().is_empty() {
        return Ok(Settings::default());
    }

    let settings: Settings = serde_json::from_str(content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Writes settings to `path` through a temp file and rename.
pub fn save_settings<P: AsRef<Path>>(path: P, settings: &Settings) -> Result<(), ConfigError> {
    let path = path.as_ref();
    validate_settings(settings)?;

    let write_err = |source: std::io::Error| ConfigError::WriteFile {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let json = serde_json::to_vec_pretty(settings)?;
    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    temp.write_all(&json).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;

    debug!("Saved settings to {}", path.display());
    Ok(())
}

/// Returns a copy of `settings` with every direct password replaced by its
/// encrypted form. The input is left untouched.
pub fn seal_passwords(
    settings: &Settings,
    cipher: &PasswordCipher,
) -> Result<Settings, SecretError> {
    let mut sealed = settings.clone();
    for account in &mut sealed.accounts {
        if let Some(password) = account.auth.password_insecure.take() {
            if password.is_empty() {
                continue;
            }
            account.auth.password_encrypted = Some(cipher.encrypt(&password)?);
        }
    }
    Ok(sealed)
}

pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.accounts.len() > MAX_ACCOUNTS {
        return Err(ConfigError::Validation {
            message: format!(
                "Too many accounts: {} (maximum is {})",
                settings.accounts.len(),
                MAX_ACCOUNTS
            ),
        });
    }

    let mut keys = HashSet::new();
    for account in &settings.accounts {
        let key = account.key();
        if !keys.insert(key.clone()) {
            return Err(ConfigError::DuplicateAccount {
                key: key.to_string(),
            });
        }

        if account.refresh_minutes == 0 {
            return Err(ConfigError::Validation {
                message: format!("Account '{}' has a refresh interval of 0 minutes", key),
            });
        }

        if account.port == 0 {
            return Err(ConfigError::Validation {
                message: format!("Account '{}' has port 0", key),
            });
        }

        if account.auth.password_insecure.is_some() {
            warn!(
                "Account '{}' stores its password in plain text. \
                 Consider passwordEnvVar, passwordFile or passwordEncrypted instead.",
                key
            );
        }
    }

    if settings.polling.lock_timeout_secs == 0 || settings.polling.connection_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "Polling timeouts must be greater than zero".to_string(),
        });
    }

    let fetch = &settings.fetch;
    if fetch.max_messages == 0 || fetch.max_age_days == 0 || fetch.consecutive_old_threshold == 0 {
        return Err(ConfigError::Validation {
            message: "Fetch limits must be greater than zero".to_string(),
        });
    }
    if fetch.max_messages > MAX_IDS_PER_ACCOUNT {
        return Err(ConfigError::Validation {
            message: format!(
                "Fetch limit of {} messages exceeds the {} ids remembered per account",
                fetch.max_messages, MAX_IDS_PER_ACCOUNT
            ),
        });
    }

    Ok(())
}
