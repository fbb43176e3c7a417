use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::config::AccountKey;
use crate::error::StoreError;

use super::state::{AccountDedupState, KnownIds, MAX_IDS_PER_ACCOUNT};

const FILE_PREFIX: &str = "mail_state_";
const FILE_SUFFIX: &str = ".json";

type Slot = Arc<tokio::sync::Mutex<AccountDedupState>>;

/// Persistent record of the message identifiers already notified, per
/// account.
///
/// Each account lives in its own JSON file, so a bad write for one account
/// never touches another. Operations on the same account are serialised;
/// different accounts proceed in parallel.
pub struct DedupStore {
    dir: PathBuf,
    capacity: usize,
    accounts: Mutex<HashMap<AccountKey, Slot>>,
}

impl DedupStore {
    /// Opens (and creates if needed) a store under `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        Self::with_capacity(dir, MAX_IDS_PER_ACCOUNT)
    }

    pub fn with_capacity<P: AsRef<Path>>(dir: P, capacity: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;

        Ok(Self {
            dir,
            capacity,
            accounts: Mutex::new(HashMap::new()),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// File holding the state of `key`.
    pub fn account_file(&self, key: &AccountKey) -> PathBuf {
        self.dir.join(file_name_for(key))
    }

    /// Returns the known identifiers of `key`. A missing, empty or corrupt
    /// file yields an empty set.
    pub async fn load(&self, key: &AccountKey) -> KnownIds {
        let slot = self.slot(key);
        let mut state = slot.lock().await;
        self.ensure_loaded(key, &mut state).await;
        state.snapshot()
    }

    /// Merges `ids` into the account's set and persists it if anything
    /// changed. Returns how many identifiers were new.
    ///
    /// When the write fails the state stays dirty and the next save retries.
    pub async fn save<I, S>(&self, key: &AccountKey, ids: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slot = self.slot(key);
        let mut state = slot.lock().await;
        self.ensure_loaded(key, &mut state).await;

        let added = state.merge(ids, self.capacity);
        if !state.is_dirty() {
            return Ok(added);
        }

        let payload = serde_json::to_vec(state.ids())?;
        write_atomic(&self.dir, self.account_file(key), payload).await?;
        state.mark_clean();

        debug!(account = %key, added, total = state.ids().len(), "Dedup state saved");
        Ok(added)
    }

    /// Forgets everything known about `key` and deletes its file.
    pub async fn clear_account(&self, key: &AccountKey) -> Result<(), StoreError> {
        let slot = self.slot(key);
        let mut state = slot.lock().await;
        *state = AccountDedupState::fresh();
        remove_if_exists(&self.account_file(key)).await
    }

    /// Forgets every account and deletes every state file in the directory.
    /// Individual deletion failures are logged.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        let slots: Vec<Slot> = self.lock_accounts().values().cloned().collect();
        for slot in slots {
            *slot.lock().await = AccountDedupState::fresh();
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::RemoveFile {
                path: self.dir.clone(),
                source: e,
            })?;

        let mut removed = 0usize;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list {}: {}", self.dir.display(), e);
                    break;
                }
            };
            if !is_state_file(&entry.file_name().to_string_lossy()) {
                continue;
            }
            match remove_if_exists(&entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("{}", e),
            }
        }

        info!("Cleared dedup state ({} files removed)", removed);
        Ok(())
    }

    fn lock_accounts(&self) -> std::sync::MutexGuard<'_, HashMap<AccountKey, Slot>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, key: &AccountKey) -> Slot {
        self.lock_accounts()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(AccountDedupState::default())))
            .clone()
    }

    async fn ensure_loaded(&self, key: &AccountKey, state: &mut AccountDedupState) {
        if state.is_loaded() {
            return;
        }

        let path = self.account_file(key);
        let ids = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => match serde_json::from_slice::<Vec<String>>(&bytes) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(
                        "Corrupt dedup state in {}, starting empty: {}",
                        path.display(),
                        e
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(
                    "Failed to read dedup state {}, starting empty: {}",
                    path.display(),
                    e
                );
                Vec::new()
            }
        };

        *state = AccountDedupState::from_persisted(ids, self.capacity);
    }
}

/// `mail_state_{sanitised key}_{fnv-1a of key}.json`
fn file_name_for(key: &AccountKey) -> String {
    let sanitised: String = key
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}{}_{:016x}{}",
        FILE_PREFIX,
        sanitised,
        fnv1a(key.as_str().as_bytes()),
        FILE_SUFFIX
    )
}

fn is_state_file(name: &str) -> bool {
    name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// Writes `payload` to a temp file next to `path`, syncs it and renames it
/// over `path`.
async fn write_atomic(dir: &Path, path: PathBuf, payload: Vec<u8>) -> Result<(), StoreError> {
    let dir = dir.to_path_buf();
    let target = path.clone();

    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(&payload)?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .unwrap_or_else(|join_err| Err(std::io::Error::other(join_err)));

    result.map_err(|source| StoreError::WriteFile { path, source })
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::RemoveFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
