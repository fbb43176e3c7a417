use indexmap::IndexSet;

/// Identifiers remembered per account.
pub const MAX_IDS_PER_ACCOUNT: usize = 500;

/// Read-only snapshot of the identifiers already notified for one account,
/// oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownIds(IndexSet<String>);

impl KnownIds {
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

/// Cached dedup state of one account.
#[derive(Debug, Default)]
pub struct AccountDedupState {
    ids: IndexSet<String>,
    dirty: bool,
    loaded: bool,
}

impl AccountDedupState {
    /// Empty state that does not need to be read from disk.
    pub fn fresh() -> Self {
        Self {
            loaded: true,
            ..Self::default()
        }
    }

    /// State read from disk, trimmed to `capacity`.
    pub fn from_persisted(ids: Vec<String>, capacity: usize) -> Self {
        let mut state = Self {
            ids: ids.into_iter().collect(),
            dirty: false,
            loaded: true,
        };
        if state.evict(capacity) > 0 {
            state.dirty = true;
        }
        state
    }

    /// Adds the identifiers not yet known and evicts the oldest entries
    /// beyond `capacity`. Returns how many were added.
    pub fn merge<I, S>(&mut self, ids: I, capacity: usize) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for id in ids {
            if self.ids.insert(id.into()) {
                added += 1;
            }
        }
        if added > 0 {
            self.dirty = true;
            self.evict(capacity);
        }
        added
    }

    fn evict(&mut self, capacity: usize) -> usize {
        let excess = self.ids.len().saturating_sub(capacity);
        if excess > 0 {
            self.ids.drain(..excess);
        }
        excess
    }

    pub fn snapshot(&self) -> KnownIds {
        KnownIds(self.ids.clone())
    }

    pub fn ids(&self) -> &IndexSet<String> {
        &self.ids
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
