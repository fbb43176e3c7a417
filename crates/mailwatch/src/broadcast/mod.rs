//! Broadcasting of coordinator state changes.
//!
//! Hosts (a tray app, the daemon, tests) subscribe to [`PollEventBroadcaster`]
//! to follow running state, validity and per-account errors.

pub mod poll_events;

pub use poll_events::{PollEvent, PollEventBroadcaster};
