pub mod loader;
pub mod schema;

pub use loader::{
    default_settings_path, default_state_dir, load_settings, load_settings_from_str,
    save_settings, seal_passwords, validate_settings,
};
pub use schema::{AccountAuth, AccountConfig, AccountKey, FetchLimits, PollingOptions, Settings};
