//! Scriptable collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{AccountConfig, AccountKey};
use crate::mail::{MailClient, MailError, MessageHeader, SessionOptions};
use crate::network::ReachabilityProbe;
use crate::notify::{NotificationSink, NotifyError};

type Reply = Result<Vec<MessageHeader>, MailError>;

/// Mail client that answers fetches from a script; an empty script yields
/// an empty mailbox.
#[derive(Default)]
pub(crate) struct FakeMailClient {
    script: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    last_options: Mutex<Option<SessionOptions>>,
}

impl FakeMailClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_ok(&self, ids: &[&str]) {
        let headers = ids.iter().map(|id| MessageHeader::new(*id)).collect();
        self.script.lock().unwrap().push_back(Ok(headers));
    }

    pub(crate) fn push_err(&self, error: MailError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_options(&self) -> Option<SessionOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailClient for FakeMailClient {
    async fn test_connection(
        &self,
        _account: &AccountConfig,
        options: &SessionOptions,
    ) -> Result<(), MailError> {
        *self.last_options.lock().unwrap() = Some(options.clone());
        Ok(())
    }

    async fn fetch_recent_headers(
        &self,
        _account: &AccountConfig,
        options: &SessionOptions,
        _cancel: &CancellationToken,
    ) -> Result<Vec<MessageHeader>, MailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self.script.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Sink that records what it was asked to show.
#[derive(Default)]
pub(crate) struct RecordingSink {
    batches: Mutex<Vec<Vec<String>>>,
    errors: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    /// Identifiers of every new-mail notification, in call order.
    pub(crate) fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn outcome(&self) -> Result<(), NotifyError> {
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(NotifyError::Display(message)),
            None => Ok(()),
        }
    }
}

impl NotificationSink for RecordingSink {
    fn show_new_mail(
        &self,
        messages: &[MessageHeader],
        _account: &AccountKey,
        _web_link: Option<&str>,
        _display_name: &str,
    ) -> Result<(), NotifyError> {
        let ids = messages.iter().map(|m| m.id.clone()).collect();
        self.batches.lock().unwrap().push(ids);
        self.outcome()
    }

    fn show_error(&self, message: &str) -> Result<(), NotifyError> {
        self.errors.lock().unwrap().push(message.to_string());
        self.outcome()
    }
}

pub(crate) struct FixedProbe {
    online: AtomicBool,
}

impl FixedProbe {
    pub(crate) fn online() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for FixedProbe {
    async fn is_network_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Polls `condition` until it holds. With a paused clock each step is
/// instant.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
