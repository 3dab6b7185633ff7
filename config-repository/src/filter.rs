use config_model::{DiffEntry, Key, SEPARATOR};

/// Decides whether a batch of key-level changes is relevant to a watcher.
pub trait WatchFilter: Send + Sync {
    fn matches(&self, diffs: &[DiffEntry]) -> bool;
}

/// Matches when one exact key changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    key: Key,
}

impl KeyFilter {
    pub fn new(key: impl Into<Key>) -> Self {
        Self { key: key.into() }
    }
}

impl WatchFilter for KeyFilter {
    fn matches(&self, diffs: &[DiffEntry]) -> bool {
        diffs.iter().any(|diff| diff.key == self.key)
    }
}

/// Matches when anything below a directory changed. The empty directory
/// matches every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFilter {
    prefix: String,
}

impl DirectoryFilter {
    pub fn new(directory: impl Into<String>) -> Self {
        let mut prefix = directory.into();
        if !prefix.is_empty() && !prefix.ends_with(SEPARATOR) {
            prefix.push(SEPARATOR);
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl WatchFilter for DirectoryFilter {
    fn matches(&self, diffs: &[DiffEntry]) -> bool {
        diffs.iter().any(|diff| diff.key.starts_with(&self.prefix))
    }
}
