//! One mutual-exclusion lock per account.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::config::AccountKey;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The previous check of the account is still running.
    #[error("Account '{0}' is busy with a previous check")]
    Busy(AccountKey),

    #[error("Waiting for the lock of account '{0}' was cancelled")]
    Cancelled(AccountKey),
}

type AccountLock = Arc<tokio::sync::Mutex<()>>;

/// Lazily created per-account locks that serialise checks of one account.
#[derive(Default)]
pub struct AccountLockRegistry {
    locks: Mutex<HashMap<AccountKey, AccountLock>>,
}

impl AccountLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<AccountKey, AccountLock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, key: &AccountKey) -> AccountLock {
        self.entries()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Waits up to `timeout` for the account's lock.
    pub async fn acquire(
        &self,
        key: &AccountKey,
        timeout: Duration,
    ) -> Result<AccountLockGuard, LockError> {
        let lock = self.lock_for(key);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(AccountLockGuard {
                key: key.clone(),
                _guard: guard,
            }),
            Err(_) => Err(LockError::Busy(key.clone())),
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up as soon as `cancel` fires.
    pub async fn acquire_cancellable(
        &self,
        key: &AccountKey,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AccountLockGuard, LockError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LockError::Cancelled(key.clone())),
            result = self.acquire(key, timeout) => result,
        }
    }

    /// Takes the lock only if it is free right now.
    pub fn try_acquire(&self, key: &AccountKey) -> Option<AccountLockGuard> {
        self.lock_for(key)
            .try_lock_owned()
            .ok()
            .map(|guard| AccountLockGuard {
                key: key.clone(),
                _guard: guard,
            })
    }

    /// Drops the lock of an account whose loop has terminated.
    ///
    /// A guard still held keeps its lock alive until dropped.
    pub fn remove(&self, key: &AccountKey) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn contains(&self, key: &AccountKey) -> bool {
        self.entries().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}

/// Held account lock; released on drop.
#[must_use = "the account lock is released as soon as the guard is dropped"]
pub struct AccountLockGuard {
    key: AccountKey,
    _guard: OwnedMutexGuard<()>,
}

impl AccountLockGuard {
    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn release(self) {}
}

impl std::fmt::Debug for AccountLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLockGuard")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> AccountKey {
        AccountKey::new("imap.example.com", name)
    }

    #[tokio::test]
    async fn test_locks_created_lazily() {
        let registry = AccountLockRegistry::new();
        assert!(registry.is_empty());

        let guard = registry.acquire(&key("a"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(guard.key(), &key("a"));
        assert!(registry.contains(&key("a")));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_times_out_as_busy() {
        let registry = AccountLockRegistry::new();
        let _held = registry.acquire(&key("a"), Duration::from_secs(1)).await.unwrap();

        let result = registry.acquire(&key("a"), Duration::from_secs(30)).await;
        assert_eq!(result.unwrap_err(), LockError::Busy(key("a")));
    }

    #[tokio::test]
    async fn test_accounts_do_not_block_each_other() {
        let registry = AccountLockRegistry::new();
        let _a = registry.acquire(&key("a"), Duration::from_secs(1)).await.unwrap();
        assert!(registry.try_acquire(&key("b")).is_some());
        assert!(registry.try_acquire(&key("a")).is_none());
    }

    #[tokio::test]
    async fn test_release_frees_lock() {
        let registry = AccountLockRegistry::new();
        let guard = registry.try_acquire(&key("a")).unwrap();
        guard.release();
        assert!(registry.try_acquire(&key("a")).is_some());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let registry = AccountLockRegistry::new();
        let _held = registry.try_acquire(&key("a")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = registry
            .acquire_cancellable(&key("a"), Duration::from_secs(30), &cancel)
            .await;
        assert_eq!(result.unwrap_err(), LockError::Cancelled(key("a")));
    }

    #[tokio::test]
    async fn test_mutual_exclusion_under_contention() {
        let registry = Arc::new(AccountLockRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = registry
                    .acquire(&key("a"), Duration::from_secs(10))
                    .await
                    .unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let registry = AccountLockRegistry::new();
        drop(registry.try_acquire(&key("a")));
        drop(registry.try_acquire(&key("b")));

        assert!(registry.remove(&key("a")));
        assert!(!registry.remove(&key("a")));
        registry.clear();
        assert!(registry.is_empty());
    }
}
