//! Poll event broadcaster.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::AccountKey;

/// State transition reported by the polling coordinator.
///
/// Each event is sent once per actual transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum PollEvent {
    /// At least one polling loop is active (`true`) or none is (`false`).
    RunningStateChanged(bool),
    /// Whether at least one configured account has all required values.
    ValidityChanged(bool),
    RefreshEnabledChanged(bool),
    /// Every loop stopped because of errors.
    GlobalError,
    #[serde(rename_all = "camelCase")]
    AccountErrorOccurred { account: AccountKey, message: String },
    #[serde(rename_all = "camelCase")]
    AccountErrorCleared { account: AccountKey },
    #[serde(rename_all = "camelCase")]
    NewMail { account: AccountKey, count: usize },
}

/// Broadcasts poll events to any number of subscribers.
#[derive(Clone)]
pub struct PollEventBroadcaster {
    sender: Arc<broadcast::Sender<PollEvent>>,
}

impl PollEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: PollEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PollEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = PollEventBroadcaster::new(4);
        broadcaster.send(PollEvent::GlobalError);
        assert_eq!(broadcaster.receiver_count(), 0);
    }

    #[test]
    fn test_send_receive() {
        let broadcaster = PollEventBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        broadcaster.send(PollEvent::NewMail {
            account: AccountKey::from("s|u"),
            count: 2,
        });

        let received = rx.try_recv().unwrap();
        assert_eq!(
            received,
            PollEvent::NewMail {
                account: AccountKey::from("s|u"),
                count: 2
            }
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(PollEvent::AccountErrorOccurred {
            account: AccountKey::from("s|u"),
            message: "denied".to_string(),
        })
        .unwrap();

        assert_eq!(json["type"], "accountErrorOccurred");
        assert_eq!(json["data"]["account"], "s|u");
        assert_eq!(json["data"]["message"], "denied");

        let json = serde_json::to_value(PollEvent::RunningStateChanged(true)).unwrap();
        assert_eq!(json["type"], "runningStateChanged");
        assert_eq!(json["data"], true);
    }
}
