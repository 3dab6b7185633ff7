//! Hierarchical key/value configuration model.
//!
//! Keys are `/`-separated paths, values are opaque strings. A [`Config`]
//! carries the resolved [`Entries`] together with the log of local
//! mutations that have not been written back yet.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod config;
mod converter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use config::Config;
pub use converter::{read, write, ConverterError};

/// Path separator for hierarchical keys.
pub const SEPARATOR: char = '/';

/// Hierarchical, `/`-separated configuration path.
pub type Key = String;

/// Opaque configuration value.
pub type Value = String;

/// Resolved flat key/value mapping.
pub type Entries = BTreeMap<Key, Value>;

/// One pending local mutation.
///
/// The new value is not stored here; it is looked up from the live entries
/// when the change is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub key_path: Key,
    pub deleted: bool,
}

impl Change {
    pub fn set(key_path: impl Into<Key>) -> Self {
        Self {
            key_path: key_path.into(),
            deleted: false,
        }
    }

    pub fn delete(key_path: impl Into<Key>) -> Self {
        Self {
            key_path: key_path.into(),
            deleted: true,
        }
    }
}

/// A key whose value differs between two snapshots. Absence is `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub key: Key,
    pub old_value: Value,
    pub new_value: Value,
}

impl DiffEntry {
    pub fn new(key: impl Into<Key>, old_value: impl Into<Value>, new_value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?} -> {:?}", self.key, self.old_value, self.new_value)
    }
}

/// Returns true if `key` equals `prefix` or is nested below it.
///
/// Matching respects the separator boundary, so `key10` is not under `key1`.
/// An empty prefix matches every key.
pub fn is_under(key: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches(SEPARATOR);
    if prefix.is_empty() {
        return true;
    }
    match key.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(SEPARATOR),
        None => false,
    }
}
