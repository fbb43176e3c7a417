//! Polling coordinator.
//!
//! Owns one [`AccountPoller`] task per enabled, complete account and
//! restarts the whole set whenever a new configuration is applied.
//! Per-account parameters such as the interval only take effect in a fresh
//! loop, so a configuration change is always "stop all, then start all".

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broadcast::{PollEvent, PollEventBroadcaster};
use crate::config::{validate_settings, AccountConfig, AccountKey, PollingOptions, Settings};
use crate::dedup::DedupStore;
use crate::error::{MailwatchError, Result};
use crate::mail::{MailClient, MailError, SessionOptions};
use crate::network::ReachabilityProbe;
use crate::notify::NotificationSink;

use super::locks::AccountLockRegistry;
use super::poller::{AccountPoller, PollContext, PollExit};
use super::status::{AccountRuntimeState, StatusBoard};

const TRIGGER_CAPACITY: usize = 16;

struct LoopHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct CoordinatorState {
    settings: Option<Settings>,
    /// Last value reported through `RunningStateChanged`.
    running: bool,
    loops: HashMap<AccountKey, LoopHandle>,
    /// Cancelled loops that may still be finishing a check.
    retired: Vec<JoinHandle<()>>,
}

struct Inner {
    ctx: Arc<PollContext>,
    trigger: broadcast::Sender<()>,
    root: CancellationToken,
    state: Mutex<CoordinatorState>,
    next_generation: AtomicU64,
    disposed: AtomicBool,
}

/// Starts, stops and supervises the per-account polling loops.
///
/// Cloning is cheap; all clones drive the same set of loops. Spawning loops
/// requires a Tokio runtime.
#[derive(Clone)]
pub struct PollingCoordinator {
    inner: Arc<Inner>,
}

impl PollingCoordinator {
    pub fn new(
        client: Arc<dyn MailClient>,
        sink: Arc<dyn NotificationSink>,
        probe: Arc<dyn ReachabilityProbe>,
        store: Arc<DedupStore>,
    ) -> Self {
        let events = PollEventBroadcaster::default();
        let ctx = PollContext {
            client,
            sink,
            probe,
            store,
            locks: Arc::new(AccountLockRegistry::new()),
            status: Arc::new(StatusBoard::new(events.clone())),
            events,
        };
        let (trigger, _) = broadcast::channel(TRIGGER_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                ctx: Arc::new(ctx),
                trigger,
                root: CancellationToken::new(),
                state: Mutex::new(CoordinatorState::default()),
                next_generation: AtomicU64::new(1),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Replaces the configuration and restarts every loop.
    ///
    /// Emits `ValidityChanged` / `RefreshEnabledChanged` when those flags
    /// differ from the previous configuration, then either stops everything
    /// (refresh disabled or no complete account) or restarts all pollable
    /// accounts. Per-account error flags are cleared.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime and loops have to start.
    pub fn apply_configuration(&self, settings: Settings) -> Result<()> {
        self.inner.ensure_live()?;
        validate_settings(&settings)?;

        let inner = &self.inner;
        let mut state = inner.state();

        let (was_valid, was_enabled) = state
            .settings
            .as_ref()
            .map_or((false, false), |s| (s.has_valid_accounts(), s.refresh_enabled));
        let is_valid = settings.has_valid_accounts();
        let is_enabled = settings.refresh_enabled;

        if was_valid != is_valid {
            inner.ctx.events.send(PollEvent::ValidityChanged(is_valid));
        }
        if was_enabled != is_enabled {
            inner.ctx.events.send(PollEvent::RefreshEnabledChanged(is_enabled));
        }

        let configured: HashSet<AccountKey> =
            settings.accounts.iter().map(AccountConfig::key).collect();
        state.settings = Some(settings);

        inner.stop_loops(&mut state);
        inner.ctx.status.reset(&configured);

        if is_valid && is_enabled {
            inner.start_loops(&mut state);
        } else {
            info!(
                valid = is_valid,
                enabled = is_enabled,
                "Polling stopped by configuration"
            );
        }
        inner.sync_running(&mut state);
        Ok(())
    }

    /// Starts every pollable account. A no-op when loops are already
    /// running, refresh is disabled or no account is complete.
    pub fn start(&self) -> Result<()> {
        self.inner.ensure_live()?;

        let inner = &self.inner;
        let mut state = inner.state();
        if !state.loops.is_empty() {
            debug!("Polling already running");
            return Ok(());
        }

        let ready = state
            .settings
            .as_ref()
            .is_some_and(|s| s.refresh_enabled && s.has_valid_accounts());
        if !ready {
            debug!("Nothing to start: refresh disabled or no complete account");
            return Ok(());
        }

        inner.start_loops(&mut state);
        inner.sync_running(&mut state);
        Ok(())
    }

    /// Cancels every loop. A no-op when nothing is running.
    ///
    /// Account locks are kept; a cancelled check releases its lock on exit.
    pub fn stop(&self) {
        let inner = &self.inner;
        let mut state = inner.state();
        if state.loops.is_empty() {
            return;
        }
        inner.stop_loops(&mut state);
        inner.sync_running(&mut state);
    }

    /// Asks every loop to check right away instead of waiting for its tick.
    pub fn check_now(&self) {
        match self.inner.trigger.send(()) {
            Ok(loops) => debug!(loops, "Manual check requested"),
            Err(_) => debug!("Manual check requested, but no loop is running"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().running
    }

    pub fn is_refresh_enabled(&self) -> bool {
        self.inner
            .state()
            .settings
            .as_ref()
            .is_some_and(|s| s.refresh_enabled)
    }

    /// Returns true when at least one configured account is complete.
    pub fn has_valid_settings(&self) -> bool {
        self.inner
            .state()
            .settings
            .as_ref()
            .is_some_and(Settings::has_valid_accounts)
    }

    pub fn settings(&self) -> Option<Settings> {
        self.inner.state().settings.clone()
    }

    pub fn account_state(&self, key: &AccountKey) -> Option<AccountRuntimeState> {
        self.inner.ctx.status.get(key)
    }

    pub fn account_states(&self) -> BTreeMap<AccountKey, AccountRuntimeState> {
        self.inner.ctx.status.snapshot()
    }

    /// Keys of the accounts with an active loop, sorted.
    pub fn active_accounts(&self) -> Vec<AccountKey> {
        let mut keys: Vec<AccountKey> = self.inner.state().loops.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.inner.ctx.events.subscribe()
    }

    pub fn lock_registry(&self) -> Arc<AccountLockRegistry> {
        Arc::clone(&self.inner.ctx.locks)
    }

    /// Records `ids` as already notified for `key`. Returns how many were new.
    pub async fn mark_seen<I, S>(&self, key: &AccountKey, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.inner.ctx.store.save(key, ids).await?)
    }

    /// Connects, authenticates and disconnects without touching any state.
    /// Uses the timeout of the applied settings, or the default before any.
    pub async fn test_account(&self, account: &AccountConfig) -> Result<()> {
        let options = self
            .inner
            .state()
            .settings
            .as_ref()
            .map(SessionOptions::from_settings)
            .unwrap_or_default();
        self.inner.ctx.client.test_connection(account, &options).await?;
        Ok(())
    }

    /// Cancels every loop, waits up to the shutdown grace period for
    /// in-flight checks and abandons the rest, then drops all account locks.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.root.cancel();

        let (tasks, grace) = {
            let mut state = inner.state();
            let grace = state
                .settings
                .as_ref()
                .map(|s| s.polling.shutdown_grace())
                .unwrap_or_else(|| PollingOptions::default().shutdown_grace());

            let mut tasks = std::mem::take(&mut state.retired);
            for (key, handle) in state.loops.drain() {
                inner.ctx.status.mark_stopped(&key);
                tasks.push(handle.task);
            }
            if state.running {
                state.running = false;
                inner.ctx.events.send(PollEvent::RunningStateChanged(false));
            }
            (tasks, grace)
        };

        let deadline = Instant::now() + grace;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("Abandoning a polling loop that did not stop within {:?}", grace);
                task.abort();
            }
        }

        inner.ctx.locks.clear();
        info!("Polling coordinator shut down");
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(MailwatchError::Disposed);
        }
        Ok(())
    }

    fn start_loops(self: &Arc<Self>, state: &mut CoordinatorState) {
        let Some(settings) = state.settings.clone() else {
            return;
        };
        let session = SessionOptions::from_settings(&settings);
        for account in settings.pollable_accounts() {
            self.spawn_loop(
                state,
                Arc::new(account.clone()),
                settings.polling.clone(),
                session.clone(),
            );
        }
        info!(accounts = state.loops.len(), "Polling started");
    }

    fn spawn_loop(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        account: Arc<AccountConfig>,
        options: PollingOptions,
        session: SessionOptions,
    ) {
        let key = account.key();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();

        let poller = AccountPoller::new(account, Arc::clone(&self.ctx), options, cancel.clone())
            .with_session_options(session)
            .with_trigger(self.trigger.subscribe());
        let coordinator = Arc::downgrade(self);
        let loop_key = key.clone();
        let span = info_span!("poll", account = %key);

        let task = tokio::spawn(
            async move {
                if let PollExit::Failed(e) = poller.run().await {
                    if let Some(inner) = coordinator.upgrade() {
                        inner.on_permanent_failure(&loop_key, generation, e);
                    }
                }
            }
            .instrument(span),
        );

        self.ctx.status.mark_started(&key);
        state.loops.insert(
            key,
            LoopHandle {
                generation,
                cancel,
                task,
            },
        );
    }

    fn stop_loops(&self, state: &mut CoordinatorState) {
        state.retired.retain(|task| !task.is_finished());
        if state.loops.is_empty() {
            return;
        }

        let stopped = state.loops.len();
        for (key, handle) in state.loops.drain() {
            handle.cancel.cancel();
            self.ctx.status.mark_stopped(&key);
            state.retired.push(handle.task);
        }
        info!(accounts = stopped, "Polling stopped");
    }

    /// Reports a change of the aggregated running flag.
    fn sync_running(&self, state: &mut CoordinatorState) {
        let running = !state.loops.is_empty();
        if running != state.running {
            state.running = running;
            self.ctx.events.send(PollEvent::RunningStateChanged(running));
        }
    }

    fn on_permanent_failure(&self, key: &AccountKey, generation: u64, error: MailError) {
        let message = error.to_string();

        let (display_name, emptied, was_running) = {
            let mut state = self.state();
            match state.loops.get(key) {
                Some(handle) if handle.generation == generation => {}
                _ => {
                    debug!(account = %key, "Ignoring failure of a replaced loop");
                    return;
                }
            }
            state.loops.remove(key);

            self.ctx.status.record_error(key, message.clone());
            self.ctx.status.mark_stopped(key);
            self.ctx.locks.remove(key);

            let display_name = state
                .settings
                .as_ref()
                .and_then(|s| s.find(key))
                .map(AccountConfig::display_name)
                .unwrap_or_else(|| key.to_string());
            let emptied = state.loops.is_empty();
            let was_running = state.running;
            if emptied {
                state.running = false;
            }
            (display_name, emptied, was_running)
        };

        error!(account = %key, "Polling stopped for account: {}", message);
        let notice = format!("Mail check failed for account '{}': {}", display_name, message);
        if let Err(e) = self.ctx.sink.show_error(&notice) {
            error!("Failed to show error notification: {}", e);
        }

        if emptied {
            if was_running {
                self.ctx.events.send(PollEvent::RunningStateChanged(false));
            }
            warn!("Every polling loop has stopped because of errors");
            self.ctx.events.send(PollEvent::GlobalError);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
