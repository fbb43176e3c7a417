//! Logs coordinator events; the daemon's stand-in for a presentation layer.

use log::{debug, error, info, warn};
use mailwatch::PollEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Spawns a task that logs every event received on `rx` until the
/// coordinator is gone.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<PollEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => {
                    warn!("Event logger lagged, missed {} events", n);
                }
                Err(RecvError::Closed) => {
                    debug!("Event channel closed, stopping event logger");
                    break;
                }
            }
        }
    })
}

fn log_event(event: &PollEvent) {
    match event {
        PollEvent::RunningStateChanged(true) => info!("Polling is running"),
        PollEvent::RunningStateChanged(false) => info!("Polling has stopped"),
        PollEvent::ValidityChanged(false) => warn!("No account has complete settings"),
        PollEvent::RefreshEnabledChanged(false) => info!("Refresh is disabled in the settings"),
        PollEvent::GlobalError => error!("Every account has stopped because of errors"),
        PollEvent::AccountErrorOccurred { account, message } => {
            warn!("Account {}: {}", account, message)
        }
        PollEvent::AccountErrorCleared { account } => info!("Account {} recovered", account),
        PollEvent::NewMail { account, count } => info!("Account {}: {} new message(s)", account, count),
        _ => {}
    }

    match serde_json::to_string(event) {
        Ok(json) => debug!("Poll event: {}", json),
        Err(e) => debug!("Failed to encode poll event: {}", e),
    }
}
