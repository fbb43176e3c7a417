use chrono::{DateTime, TimeDelta, Utc};

use crate::config::FetchLimits;

use super::message::MessageHeader;

/// Whether the caller should keep feeding headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStep {
    Continue,
    Done,
}

/// Selects the recent part of a mailbox from headers offered newest first.
///
/// Headers older than the cutoff are skipped, and scanning stops after a run
/// of `consecutive_old_threshold` of them or once `max_messages` headers
/// were kept. Headers without a date are kept.
#[derive(Debug)]
pub struct RecentWindow {
    cutoff: DateTime<Utc>,
    max_messages: usize,
    old_threshold: usize,
    old_streak: usize,
    headers: Vec<MessageHeader>,
    done: bool,
}

impl RecentWindow {
    pub fn new(limits: &FetchLimits, now: DateTime<Utc>) -> Self {
        Self {
            cutoff: now - TimeDelta::days(i64::from(limits.max_age_days)),
            max_messages: limits.max_messages,
            old_threshold: limits.consecutive_old_threshold,
            old_streak: 0,
            headers: Vec::with_capacity(limits.max_messages.min(64)),
            done: limits.max_messages == 0,
        }
    }

    pub fn offer(&mut self, header: MessageHeader) -> WindowStep {
        if self.done {
            return WindowStep::Done;
        }

        if header.date.is_some_and(|date| date < self.cutoff) {
            self.old_streak += 1;
            if self.old_streak >= self.old_threshold {
                self.done = true;
                return WindowStep::Done;
            }
            return WindowStep::Continue;
        }

        self.old_streak = 0;
        self.headers.push(header);
        if self.headers.len() >= self.max_messages {
            self.done = true;
            return WindowStep::Done;
        }
        WindowStep::Continue
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn into_headers(self) -> Vec<MessageHeader> {
        self.headers
    }
}
