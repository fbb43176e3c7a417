//! Dedup state: which messages have already been notified, per account.

pub mod state;
pub mod store;

pub use state::{AccountDedupState, KnownIds, MAX_IDS_PER_ACCOUNT};
pub use store::DedupStore;
