#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod metadata;


use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;

pub use backend::ObjectStoreClient;
pub use config::{StorageConfig, WatchSettings};
pub use error::{
    error_kind, is_already_exists_error, is_conflict_error, is_connection_error,
    is_not_found_error, ErrorKind, StorageError,
};
pub use memory::MemoryClient;
pub use metadata::VersionInfo;

/// Raw stored document and the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub blob: Bytes,
    pub version: String,
}

/// Successive states of one object. Errors are items, not terminators;
/// the stream ends when the backend gives up or the object is removed.
pub type WatchStream = BoxStream<'static, Result<StoredObject>>;

/// Named, versioned blob storage with optimistic concurrency.
///
/// Implementations classify failures as [`StorageError`] so callers can use
/// [`error_kind`] regardless of the backing store.
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    /// # Errors
    /// `StorageError::NotFound` if the object does not exist.
    async fn get(&self, name: &str) -> Result<StoredObject>;

    /// # Errors
    /// `StorageError::AlreadyExists` if the object exists.
    async fn create(&self, name: &str, blob: Bytes) -> Result<String>;

    /// Overwrite the object if its current version is `expected_version`.
    ///
    /// # Errors
    /// `StorageError::VersionConflict` if the version is stale,
    /// `StorageError::NotFound` if the object does not exist.
    async fn update(&self, name: &str, expected_version: &str, blob: Bytes) -> Result<String>;

    /// Removing an absent object succeeds.
    async fn delete(&self, name: &str) -> Result<()>;

    /// States written after `from_version`.
    async fn watch(&self, name: &str, from_version: &str) -> Result<WatchStream>;
}

/// Builds the client for the configured backend.
pub fn persistence_client_from_config(
    config: StorageConfig,
    watch: WatchSettings,
) -> Result<Arc<dyn PersistenceClient>> {
    let client: Arc<dyn PersistenceClient> = match config {
        StorageConfig::Memory => Arc::new(MemoryClient::new()),
        other => Arc::new(ObjectStoreClient::from_config(other)?.with_watch_settings(watch)),
    };
    Ok(client)
}

pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim_matches('/').is_empty() {
        return Err(StorageError::Other("object name must not be empty".to_string()).into());
    }
    Ok(())
}
