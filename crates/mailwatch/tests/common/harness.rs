//! Scriptable collaborators and a coordinator harness.
//!
//! `ScriptedMailClient` answers each account from its own script, so one
//! account can fail while another keeps delivering mail.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use mailwatch::config::{AccountConfig, AccountKey};
use mailwatch::mail::{MailClient, MailError, MessageHeader, SessionOptions};
use mailwatch::notify::{NotificationSink, NotifyError};
use mailwatch::{DedupStore, PollEvent, PollingCoordinator, ReachabilityProbe};

type Reply = Result<Vec<MessageHeader>, MailError>;

#[derive(Default)]
struct AccountScript {
    replies: VecDeque<Reply>,
    failure: Option<fn() -> MailError>,
    delay: Option<Duration>,
}

/// Mail client with a per-account script. Once an account's script is
/// exhausted it either fails every time (`fail_always`) or returns an empty
/// mailbox.
#[derive(Default)]
pub struct ScriptedMailClient {
    scripts: Mutex<HashMap<AccountKey, AccountScript>>,
    calls: Mutex<HashMap<AccountKey, usize>>,
    options: Mutex<HashMap<AccountKey, SessionOptions>>,
}

impl ScriptedMailClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_script(&self, key: &AccountKey, f: impl FnOnce(&mut AccountScript)) {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(key.clone()).or_default());
    }

    pub fn push_ok(&self, key: &AccountKey, ids: &[&str]) {
        let headers = ids.iter().map(|id| MessageHeader::new(*id)).collect();
        self.with_script(key, |s| s.replies.push_back(Ok(headers)));
    }

    pub fn push_err(&self, key: &AccountKey, error: MailError) {
        self.with_script(key, |s| s.replies.push_back(Err(error)));
    }

    pub fn fail_always(&self, key: &AccountKey, failure: fn() -> MailError) {
        self.with_script(key, |s| s.failure = Some(failure));
    }

    pub fn set_delay(&self, key: &AccountKey, delay: Duration) {
        self.with_script(key, |s| s.delay = Some(delay));
    }

    pub fn calls(&self, key: &AccountKey) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Options passed with the latest call for `key`.
    pub fn last_options(&self, key: &AccountKey) -> Option<SessionOptions> {
        self.options.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl MailClient for ScriptedMailClient {
    async fn test_connection(
        &self,
        account: &AccountConfig,
        options: &SessionOptions,
    ) -> Result<(), MailError> {
        self.options
            .lock()
            .unwrap()
            .insert(account.key(), options.clone());
        let failure = self
            .scripts
            .lock()
            .unwrap()
            .get(&account.key())
            .and_then(|s| s.failure);
        match failure {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }

    async fn fetch_recent_headers(
        &self,
        account: &AccountConfig,
        options: &SessionOptions,
        _cancel: &CancellationToken,
    ) -> Result<Vec<MessageHeader>, MailError> {
        let key = account.key();
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        self.options
            .lock()
            .unwrap()
            .insert(key.clone(), options.clone());

        let delay = self.scripts.lock().unwrap().get(&key).and_then(|s| s.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(&key) else {
            return Ok(Vec::new());
        };
        if let Some(reply) = script.replies.pop_front() {
            return reply;
        }
        match script.failure {
            Some(failure) => Err(failure()),
            None => Ok(Vec::new()),
        }
    }
}

pub fn auth_failure() -> MailError {
    MailError::Authentication {
        user: "me".to_string(),
        reason: "invalid credentials".to_string(),
    }
}

pub fn timeout() -> MailError {
    MailError::Timeout(Duration::from_secs(30))
}

/// One `show_new_mail` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Shown {
    pub account: AccountKey,
    pub display_name: String,
    pub web_link: Option<String>,
    pub ids: Vec<String>,
}

#[derive(Default)]
pub struct RecordingSink {
    shown: Mutex<Vec<Shown>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().unwrap().clone()
    }

    /// Identifiers shown for `key`, one entry per notification.
    pub fn batches_for(&self, key: &AccountKey) -> Vec<Vec<String>> {
        self.shown()
            .into_iter()
            .filter(|s| &s.account == key)
            .map(|s| s.ids)
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn show_new_mail(
        &self,
        messages: &[MessageHeader],
        account: &AccountKey,
        web_link: Option<&str>,
        display_name: &str,
    ) -> Result<(), NotifyError> {
        self.shown.lock().unwrap().push(Shown {
            account: account.clone(),
            display_name: display_name.to_string(),
            web_link: web_link.map(str::to_string),
            ids: messages.iter().map(|m| m.id.clone()).collect(),
        });
        Ok(())
    }

    fn show_error(&self, message: &str) -> Result<(), NotifyError> {
        self.errors.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub struct FixedProbe {
    online: AtomicBool,
}

impl FixedProbe {
    pub fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for FixedProbe {
    async fn is_network_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// A coordinator wired to scripted collaborators and a temporary state
/// directory, subscribed to its events from the start.
pub struct CoordinatorHarness {
    pub dir: TempDir,
    pub client: Arc<ScriptedMailClient>,
    pub sink: Arc<RecordingSink>,
    pub probe: Arc<FixedProbe>,
    pub store: Arc<DedupStore>,
    pub coordinator: PollingCoordinator,
    events: broadcast::Receiver<PollEvent>,
}

impl CoordinatorHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let client = Arc::new(ScriptedMailClient::new());
        let sink = Arc::new(RecordingSink::new());
        let probe = Arc::new(FixedProbe::online());
        let store = Arc::new(DedupStore::new(dir.path()).expect("Failed to create store"));
        let coordinator = PollingCoordinator::new(
            client.clone(),
            sink.clone(),
            probe.clone(),
            Arc::clone(&store),
        );
        let events = coordinator.subscribe();

        Self {
            dir,
            client,
            sink,
            probe,
            store,
            coordinator,
            events,
        }
    }

    /// Events received since the last call.
    pub fn drain_events(&mut self) -> Vec<PollEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}

/// Polls `condition` until it holds, sleeping between attempts. With a
/// paused clock each sleep is instant.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
