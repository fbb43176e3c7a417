//! Account polling: locks, loops, error classification and the coordinator.

pub mod classify;
pub mod coordinator;
pub mod locks;
pub mod poller;
pub mod status;

pub use classify::{classify, ErrorClass};
pub use coordinator::PollingCoordinator;
pub use locks::{AccountLockGuard, AccountLockRegistry, LockError};
pub use poller::{AccountPoller, CheckOutcome, PollContext, PollExit};
pub use status::{AccountRuntimeState, PollPhase, StatusBoard};
