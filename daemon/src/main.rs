//! Headless host for the mailwatch poller.

mod events;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use mailwatch::config::{default_settings_path, default_state_dir, seal_passwords};
use mailwatch::{
    classify, load_settings, save_settings, telemetry, ConfigError, DedupStore, DesktopNotifier,
    ImapMailClient, MailClient, MailwatchError, PasswordCipher, PollingCoordinator,
    SessionOptions, Settings, SystemProbe,
};

#[derive(Parser)]
#[command(name = "mailwatch", version, about = "Watches mailboxes and notifies about new mail")]
struct Cli {
    /// Settings file [default: <config dir>/mailwatch/settings.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the notified-message state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Log filter used when MAILWATCH_LOG and RUST_LOG are unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll every enabled account until interrupted (default)
    Run,
    /// Connect to one account and report the result
    Test {
        /// Zero-based position in the accounts list
        index: usize,
    },
    /// Forget every message already notified
    ResetState,
    /// Replace plain-text passwords in the settings file with encrypted ones
    SealPasswords,
}

#[tokio::main]
async fn main() -> Result<(), MailwatchError> {
    let cli = Cli::parse();

    let init = if cli.json_logs {
        telemetry::init_json_tracing(&cli.log)
    } else {
        telemetry::init_tracing(&cli.log)
    };
    if let Err(e) = init {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => default_settings_path()?,
    };
    let state_dir = match cli.state_dir {
        Some(dir) => dir,
        None => default_state_dir()?,
    };

    let settings = load_settings(&config_path)?;
    info!(
        "Loaded {} account(s) from {}",
        settings.accounts.len(),
        config_path.display()
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings, &config_path, &state_dir).await,
        Command::Test { index } => test_account(&settings, index).await,
        Command::ResetState => reset_state(&state_dir).await,
        Command::SealPasswords => seal(&config_path, &settings),
    }
}

async fn run(
    settings: Settings,
    config_path: &Path,
    state_dir: &Path,
) -> Result<(), MailwatchError> {
    info!("Starting mailwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Using state directory: {}", state_dir.display());

    let coordinator = PollingCoordinator::new(
        Arc::new(ImapMailClient::new()),
        Arc::new(DesktopNotifier::new()),
        Arc::new(SystemProbe::new()),
        Arc::new(DedupStore::new(state_dir)?),
    );
    let logger = events::spawn_event_logger(coordinator.subscribe());

    coordinator.apply_configuration(settings)?;
    if !coordinator.is_running() {
        warn!("No account is being polled; check refreshEnabled and the account settings");
    }

    wait_for_shutdown(&coordinator, config_path).await;

    coordinator.shutdown().await;
    logger.abort();
    Ok(())
}

/// Waits for Ctrl-C. On Unix, SIGHUP reloads the settings file.
#[cfg(unix)]
async fn wait_for_shutdown(coordinator: &PollingCoordinator, config_path: &Path) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => Some(hangup),
        Err(e) => {
            warn!("Settings reload on SIGHUP unavailable: {}", e);
            None
        }
    };

    loop {
        let reload = async {
            match hangup.as_mut() {
                Some(hangup) => hangup.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                return;
            }
            Some(()) = reload => reload_settings(coordinator, config_path),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_coordinator: &PollingCoordinator, _config_path: &Path) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Shutting down");
}

#[cfg(unix)]
fn reload_settings(coordinator: &PollingCoordinator, config_path: &Path) {
    info!("Reloading settings from {}", config_path.display());
    let applied = load_settings(config_path)
        .map_err(MailwatchError::from)
        .and_then(|settings| coordinator.apply_configuration(settings));
    if let Err(e) = applied {
        error!("Failed to reload settings, keeping the previous ones: {}", e);
    }
}

async fn test_account(settings: &Settings, index: usize) -> Result<(), MailwatchError> {
    let Some(account) = settings.accounts.get(index) else {
        return Err(ConfigError::Validation {
            message: format!(
                "No account at index {} ({} configured)",
                index,
                settings.accounts.len()
            ),
        }
        .into());
    };

    let options = SessionOptions::from_settings(settings);
    match ImapMailClient::new()
        .test_connection(account, &options)
        .await
    {
        Ok(()) => {
            println!("{}: connection OK", account.display_name());
            Ok(())
        }
        Err(e) => {
            println!(
                "{}: connection failed ({:?}): {}",
                account.display_name(),
                classify(&e),
                e
            );
            Err(e.into())
        }
    }
}

async fn reset_state(state_dir: &Path) -> Result<(), MailwatchError> {
    DedupStore::new(state_dir)?.clear_all().await?;
    println!("Cleared notified-message state in {}", state_dir.display());
    Ok(())
}

fn seal(config_path: &Path, settings: &Settings) -> Result<(), MailwatchError> {
    let cipher = PasswordCipher::from_env()?;
    let sealed = seal_passwords(settings, &cipher)?;
    save_settings(config_path, &sealed)?;
    println!("Encrypted stored passwords in {}", config_path.display());
    Ok(())
}
