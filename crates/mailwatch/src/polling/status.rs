//! Per-account runtime state for the presentation layer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::broadcast::{PollEvent, PollEventBroadcaster};
use crate::config::AccountKey;

/// Where an account's polling loop currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PollPhase {
    /// Waiting for the next tick.
    #[default]
    Idle,
    Checking,
    /// Last check failed transiently; waiting for the next tick.
    Retrying,
    Stopped,
}

/// Derived, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRuntimeState {
    pub is_running: bool,
    pub has_error: bool,
    pub last_error_message: Option<String>,
    pub phase: PollPhase,
    pub last_success: Option<DateTime<Utc>>,
}

/// Runtime state of every account. Error transitions are broadcast.
pub struct StatusBoard {
    states: Mutex<HashMap<AccountKey, AccountRuntimeState>>,
    events: PollEventBroadcaster,
}

impl StatusBoard {
    pub fn new(events: PollEventBroadcaster) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<AccountKey, AccountRuntimeState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_started(&self, key: &AccountKey) {
        let mut states = self.states();
        let state = states.entry(key.clone()).or_default();
        state.is_running = true;
        state.phase = PollPhase::Idle;
    }

    pub fn mark_stopped(&self, key: &AccountKey) {
        if let Some(state) = self.states().get_mut(key) {
            state.is_running = false;
            state.phase = PollPhase::Stopped;
        }
    }

    pub fn set_phase(&self, key: &AccountKey, phase: PollPhase) {
        self.states().entry(key.clone()).or_default().phase = phase;
    }

    /// Successful check: clears any error and returns to idle.
    pub fn record_success(&self, key: &AccountKey) {
        {
            let mut states = self.states();
            let state = states.entry(key.clone()).or_default();
            state.phase = PollPhase::Idle;
            state.last_success = Some(Utc::now());
        }
        self.clear_error(key);
    }

    /// Sets the error flag. Emits an event when the flag was clear or the
    /// message changed.
    pub fn record_error(&self, key: &AccountKey, message: impl Into<String>) -> bool {
        let message = message.into();
        let changed = {
            let mut states = self.states();
            let state = states.entry(key.clone()).or_default();
            let changed =
                !state.has_error || state.last_error_message.as_deref() != Some(message.as_str());
            state.has_error = true;
            state.last_error_message = Some(message.clone());
            changed
        };

        if changed {
            self.events.send(PollEvent::AccountErrorOccurred {
                account: key.clone(),
                message,
            });
        }
        changed
    }

    /// Clears the error flag. Emits an event only if it was set.
    pub fn clear_error(&self, key: &AccountKey) -> bool {
        let was_set = match self.states().get_mut(key) {
            Some(state) if state.has_error => {
                state.has_error = false;
                state.last_error_message = None;
                true
            }
            _ => false,
        };

        if was_set {
            self.events.send(PollEvent::AccountErrorCleared {
                account: key.clone(),
            });
        }
        was_set
    }

    /// Keeps only the given accounts and clears their error flags.
    pub fn reset(&self, configured: &HashSet<AccountKey>) {
        let keys: Vec<AccountKey> = {
            let mut states = self.states();
            states.retain(|key, _| configured.contains(key));
            states.keys().cloned().collect()
        };
        for key in keys {
            self.clear_error(&key);
        }
    }

    pub fn get(&self, key: &AccountKey) -> Option<AccountRuntimeState> {
        self.states().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<AccountKey, AccountRuntimeState> {
        self.states()
            .iter()
            .map(|(key, state)| (key.clone(), state.clone()))
            .collect()
    }
}
