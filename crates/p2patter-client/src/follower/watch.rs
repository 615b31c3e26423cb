use std::collections::BTreeSet;

/// Owner names of interest, split into pending and active.
///
/// The two sets are disjoint. Every transition is idempotent and reports
/// whether it changed anything, so concurrent callers can race on a name and
/// exactly one of them wins.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    pending: BTreeSet<String>,
    active: BTreeSet<String>,
}

impl WatchSet {
    /// Create a set with every name pending.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pending: names.into_iter().map(Into::into).collect(),
            active: BTreeSet::new(),
        }
    }

    /// Start watching a name. Returns `false` if it was already watched.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.pending.insert(name.to_string())
    }

    /// Stop watching a name. Returns `false` if it was not watched.
    pub fn remove(&mut self, name: &str) -> bool {
        self.pending.remove(name) | self.active.remove(name)
    }

    /// Move a name from pending to active.
    pub fn activate(&mut self, name: &str) -> bool {
        if self.pending.remove(name) {
            self.active.insert(name.to_string());
            true
        } else {
            false
        }
    }

    /// Move a name from active back to pending.
    pub fn deactivate(&mut self, name: &str) -> bool {
        if self.active.remove(name) {
            self.pending.insert(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pending.contains(name) || self.active.contains(name)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.contains(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains(name)
    }

    /// Pending names, sorted.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Active names, sorted.
    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    /// Remove every name.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.active.clear();
    }
}
