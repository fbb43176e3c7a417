//! Shared helpers for mailwatch integration tests.

#![allow(dead_code)]

pub mod builders;
pub mod harness;

// each test binary uses a different subset
#[allow(unused_imports)]
pub use builders::{AccountBuilder, SettingsBuilder};
#[allow(unused_imports)]
pub use harness::{eventually, CoordinatorHarness, FixedProbe, RecordingSink, ScriptedMailClient};
