//! Per-account polling loop.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{PollEvent, PollEventBroadcaster};
use crate::config::{AccountConfig, AccountKey, PollingOptions};
use crate::dedup::DedupStore;
use crate::mail::{MailClient, MailError, MessageHeader, SessionOptions};
use crate::network::ReachabilityProbe;
use crate::notify::NotificationSink;

use super::classify::{classify, ErrorClass};
use super::locks::{AccountLockRegistry, LockError};
use super::status::{PollPhase, StatusBoard};

/// Collaborators shared by every polling loop.
pub struct PollContext {
    pub client: Arc<dyn MailClient>,
    pub sink: Arc<dyn NotificationSink>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub store: Arc<DedupStore>,
    pub locks: Arc<AccountLockRegistry>,
    pub status: Arc<StatusBoard>,
    pub events: PollEventBroadcaster,
}

/// Result of a check that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The network was down; nothing was attempted.
    Offline,
    /// The previous check still held the account lock.
    Busy,
    Checked { fetched: usize, new: usize },
}

/// Why a polling loop ended.
#[derive(Debug)]
pub enum PollExit {
    Cancelled,
    /// A permanent failure; the loop does not restart on its own.
    Failed(MailError),
}

enum Wake {
    Tick,
    Trigger,
    TriggerClosed,
    Cancelled,
}

/// Checks one account immediately and then once per refresh interval until
/// cancelled or permanently failed.
pub struct AccountPoller {
    account: Arc<AccountConfig>,
    key: AccountKey,
    ctx: Arc<PollContext>,
    options: PollingOptions,
    session: SessionOptions,
    cancel: CancellationToken,
    trigger: Option<broadcast::Receiver<()>>,
    busy_streak: u32,
}

impl AccountPoller {
    pub fn new(
        account: Arc<AccountConfig>,
        ctx: Arc<PollContext>,
        options: PollingOptions,
        cancel: CancellationToken,
    ) -> Self {
        let key = account.key();
        Self {
            account,
            key,
            ctx,
            options,
            session: SessionOptions::default(),
            cancel,
            trigger: None,
            busy_streak: 0,
        }
    }

    /// Fetch limits and network timeout used for every check of this loop.
    pub fn with_session_options(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    /// Lets `trigger` start an extra check between ticks.
    pub fn with_trigger(mut self, trigger: broadcast::Receiver<()>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub async fn run(mut self) -> PollExit {
        let period = self.account.refresh_interval().max(Duration::from_secs(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Polling every {:?}", period);

        loop {
            if self.cancel.is_cancelled() {
                return PollExit::Cancelled;
            }

            match self.check_once().await {
                Ok(outcome) => self.on_outcome(outcome),
                Err(_) if self.cancel.is_cancelled() => return PollExit::Cancelled,
                Err(e) => match classify(&e) {
                    ErrorClass::Transient => {
                        warn!("Check failed, retrying next cycle: {}", e);
                        self.ctx.status.record_error(&self.key, e.to_string());
                        self.ctx.status.set_phase(&self.key, PollPhase::Retrying);
                    }
                    ErrorClass::Permanent => {
                        error!("Check failed permanently, stopping: {}", e);
                        return PollExit::Failed(e);
                    }
                },
            }

            // the next tick is a full period after this check
            ticker.reset();

            loop {
                match self.wait(&mut ticker).await {
                    Wake::Cancelled => return PollExit::Cancelled,
                    Wake::Tick => break,
                    Wake::Trigger => {
                        debug!("Manual check requested");
                        break;
                    }
                    Wake::TriggerClosed => self.trigger = None,
                }
            }
        }
    }

    async fn wait(&mut self, ticker: &mut Interval) -> Wake {
        let cancel = &self.cancel;
        let trigger = next_trigger(&mut self.trigger);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = ticker.tick() => Wake::Tick,
            received = trigger => match received {
                Ok(()) | Err(RecvError::Lagged(_)) => Wake::Trigger,
                Err(RecvError::Closed) => Wake::TriggerClosed,
            },
        }
    }

    fn on_outcome(&mut self, outcome: CheckOutcome) {
        match outcome {
            CheckOutcome::Busy => {
                self.busy_streak += 1;
                if self.busy_streak == self.options.busy_warn_threshold {
                    warn!(
                        "Skipped {} consecutive checks: the previous check still holds the account lock",
                        self.busy_streak
                    );
                } else {
                    debug!("Previous check still running, skipping this cycle");
                }
            }
            CheckOutcome::Offline => {
                self.busy_streak = 0;
                debug!("Network unavailable, skipping this cycle");
            }
            CheckOutcome::Checked { fetched, new } => {
                self.busy_streak = 0;
                self.ctx.status.record_success(&self.key);
                debug!(fetched, new, "Check complete");
            }
        }
    }

    /// Runs one check: probe, lock, fetch, diff, notify, persist.
    pub async fn check_once(&self) -> Result<CheckOutcome, MailError> {
        if !self.ctx.probe.is_network_available().await {
            return Ok(CheckOutcome::Offline);
        }

        let guard = match self
            .ctx
            .locks
            .acquire_cancellable(&self.key, self.options.lock_timeout(), &self.cancel)
            .await
        {
            Ok(guard) => guard,
            Err(LockError::Busy(_)) => return Ok(CheckOutcome::Busy),
            Err(LockError::Cancelled(_)) => return Err(MailError::Cancelled),
        };

        self.ctx.status.set_phase(&self.key, PollPhase::Checking);

        let mut headers = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MailError::Cancelled),
            fetched = self.ctx.client.fetch_recent_headers(&self.account, &self.session, &self.cancel) => fetched?,
        };

        // ids past the store capacity would be evicted and reported again
        let capacity = self.ctx.store.capacity();
        if headers.len() > capacity {
            warn!(
                fetched = headers.len(),
                capacity, "Fetched more headers than the dedup store keeps, ignoring the oldest"
            );
            headers.truncate(capacity);
        }

        if headers.is_empty() {
            return Ok(CheckOutcome::Checked { fetched: 0, new: 0 });
        }

        let known = self.ctx.store.load(&self.key).await;
        let mut batch = HashSet::new();
        let mut new_messages = Vec::new();
        for header in &headers {
            if !known.contains(&header.id) && batch.insert(header.id.as_str()) {
                new_messages.push(header.clone());
            }
        }

        if !new_messages.is_empty() {
            info!(count = new_messages.len(), "New mail");
            self.notify(&new_messages);
            self.ctx.events.send(PollEvent::NewMail {
                account: self.key.clone(),
                count: new_messages.len(),
            });

            // merged oldest first so eviction drops the oldest message
            let ids = new_messages.iter().rev().map(|m| m.id.clone());
            if let Err(e) = self.ctx.store.save(&self.key, ids).await {
                error!("Failed to persist dedup state: {}", e);
            }
        }

        guard.release();
        Ok(CheckOutcome::Checked {
            fetched: headers.len(),
            new: new_messages.len(),
        })
    }

    fn notify(&self, messages: &[MessageHeader]) {
        let display_name = self.account.display_name();
        let shown = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.ctx.sink.show_new_mail(
                messages,
                &self.key,
                self.account.web_link(),
                &display_name,
            )
        }));

        match shown {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to show new mail notification: {}", e),
            Err(_) => error!("Notification sink panicked"),
        }
    }
}

async fn next_trigger(trigger: &mut Option<broadcast::Receiver<()>>) -> Result<(), RecvError> {
    match trigger {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
