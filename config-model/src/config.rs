use crate::{is_under, Change, DiffEntry, Entries, Key, Value};

/// In-memory configuration snapshot plus its pending change log.
///
/// Mutators take `&self` and return a new `Config`; the receiver is never
/// modified, so a `Config` can be shared read-only across tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    entries: Entries,
    change_history: Vec<Change>,
    persistence_context: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh config with the given entries and an empty change history.
    pub fn from_entries(entries: Entries) -> Self {
        Self {
            entries,
            change_history: Vec::new(),
            persistence_context: None,
        }
    }

    /// Fresh config bound to a storage version token.
    pub fn with_persistence_context(entries: Entries, persistence_context: impl Into<String>) -> Self {
        Self {
            entries,
            change_history: Vec::new(),
            persistence_context: Some(persistence_context.into()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get_all(&self) -> Entries {
        self.entries.clone()
    }

    /// Entries at or below `prefix`.
    pub fn get_all_under(&self, prefix: &str) -> Entries {
        self.entries
            .iter()
            .filter(|(key, _)| is_under(key, prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn change_history(&self) -> &[Change] {
        &self.change_history
    }

    pub fn has_changes(&self) -> bool {
        !self.change_history.is_empty()
    }

    pub fn persistence_context(&self) -> Option<&str> {
        self.persistence_context.as_deref()
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> Config {
        let key = key.into();
        let mut next = self.clone();
        next.entries.insert(key.clone(), value.into());
        next.change_history.push(Change::set(key));
        next
    }

    /// Removes the exact key. Nothing is recorded if the key is absent.
    pub fn delete(&self, key: &str) -> Config {
        let mut next = self.clone();
        if next.entries.remove(key).is_some() {
            next.change_history.push(Change::delete(key));
        }
        next
    }

    /// Removes `prefix` and every key nested below it, one change per key.
    pub fn delete_recursive(&self, prefix: &str) -> Config {
        let mut next = self.clone();
        let doomed: Vec<Key> = self
            .entries
            .keys()
            .filter(|key| is_under(key, prefix))
            .cloned()
            .collect();
        for key in doomed {
            next.entries.remove(&key);
            next.change_history.push(Change::delete(key));
        }
        next
    }

    pub fn remove_all(&self) -> Config {
        self.delete_recursive("")
    }

    /// Keys whose value differs between `self` (old) and `other` (new),
    /// sorted by key.
    pub fn diff(&self, other: &Config) -> Vec<DiffEntry> {
        diff_entries(&self.entries, &other.entries)
    }
}

fn diff_entries(old: &Entries, new: &Entries) -> Vec<DiffEntry> {
    let mut diffs = Vec::new();
    for (key, old_value) in old {
        match new.get(key) {
            Some(new_value) if new_value == old_value => {}
            Some(new_value) => diffs.push(DiffEntry::new(key, old_value, new_value)),
            None => diffs.push(DiffEntry::new(key, old_value, "")),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            diffs.push(DiffEntry::new(key, "", new_value));
        }
    }
    diffs.sort_by(|a, b| a.key.cmp(&b.key));
    diffs
}
