use anyhow::{Context, Result};
use bytes::Bytes;
use config_model::{Config, Entries};
use std::sync::Arc;
use storage_backend::{
    is_conflict_error, persistence_client_from_config, PersistenceClient, StorageConfig,
    StorageError, StoredObject, WatchSettings,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::RepositoryConfig;
use crate::filter::WatchFilter;
use crate::merge;
use crate::watch::{self, WatchEvent};

/// Reads and writes named configurations through a [`PersistenceClient`].
///
/// All operations run on the caller's task; only [`ConfigRepository::watch`]
/// spawns background work.
#[derive(Clone)]
pub struct ConfigRepository {
    client: Arc<dyn PersistenceClient>,
    config: RepositoryConfig,
}

impl ConfigRepository {
    pub fn new(client: Arc<dyn PersistenceClient>) -> Self {
        Self::with_config(client, RepositoryConfig::default())
    }

    pub fn with_config(client: Arc<dyn PersistenceClient>, config: RepositoryConfig) -> Self {
        Self { client, config }
    }

    pub fn from_config(
        storage: StorageConfig,
        watch: WatchSettings,
        config: RepositoryConfig,
    ) -> Result<Self> {
        let client = persistence_client_from_config(storage, watch)?;
        Ok(Self::with_config(client, config))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<Config> {
        debug!("Getting config: {}", name);

        let stored = self
            .client
            .get(name)
            .await
            .with_context(|| format!("Failed to get config {name}"))?;
        decode(name, stored)
    }

    /// Creates the backing object from `cfg`'s entries. The change history
    /// is not replayed; there is no remote state to merge against.
    #[instrument(skip(self, cfg))]
    pub async fn create(&self, name: &str, cfg: &Config) -> Result<Config> {
        let entries = cfg.get_all();
        let blob = encode(name, &entries)?;

        let version = self
            .client
            .create(name, blob)
            .await
            .with_context(|| format!("Failed to create config {name}"))?;

        info!("Created config {} at version {}", name, version);
        Ok(Config::with_persistence_context(entries, version))
    }

    /// Overwrites the backing object with `cfg`'s entries, expecting it to
    /// still be at `cfg`'s persistence context.
    #[instrument(skip(self, cfg))]
    pub async fn update(&self, name: &str, cfg: &Config) -> Result<Config> {
        let expected_version = cfg.persistence_context().ok_or_else(|| {
            StorageError::Other(format!(
                "config {name} has no persistence context; create it first"
            ))
        })?;

        let entries = cfg.get_all();
        let blob = encode(name, &entries)?;

        let version = self
            .client
            .update(name, expected_version, blob)
            .await
            .with_context(|| format!("Failed to update config {name}"))?;

        info!("Updated config {} to version {}", name, version);
        Ok(Config::with_persistence_context(entries, version))
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.client
            .delete(name)
            .await
            .with_context(|| format!("Failed to delete config {name}"))?;

        info!("Deleted config {}", name);
        Ok(())
    }

    /// Writes `cfg`'s pending changes on top of the current remote state.
    ///
    /// Keys touched locally take the local value (or are removed); every
    /// other key keeps what the remote holds. Returns `cfg` unchanged when
    /// there is nothing to write.
    #[instrument(skip(self, cfg), fields(changes = cfg.change_history().len()))]
    pub async fn save_or_merge(&self, name: &str, cfg: &Config) -> Result<Config> {
        if !cfg.has_changes() {
            debug!("No pending changes for {}", name);
            return Ok(cfg.clone());
        }

        let remote = self
            .client
            .get(name)
            .await
            .with_context(|| format!("Failed to read config {name} for merge"))?;
        let remote_version = remote.version.clone();
        let remote_entries = decode(name, remote)?.get_all();

        let local_entries = cfg.get_all();
        if remote_entries == local_entries {
            debug!("Remote {} already matches local state", name);
            return Ok(cfg.clone());
        }

        let merged = merge::replay(remote_entries, cfg.change_history(), &local_entries)
            .with_context(|| format!("Failed to merge changes into config {name}"))?;
        let blob = encode(name, &merged)?;

        let version = self
            .client
            .update(name, &remote_version, blob)
            .await
            .with_context(|| format!("Failed to write merged config {name}"))?;

        info!(
            "Merged {} changes into {} at version {}",
            cfg.change_history().len(),
            name,
            version
        );
        Ok(Config::with_persistence_context(merged, version))
    }

    /// [`save_or_merge`](Self::save_or_merge), retried under the configured
    /// [`RetryPolicy`](crate::RetryPolicy) when another writer got in between
    /// the read and the write. Other failures are returned immediately.
    #[instrument(skip(self, cfg))]
    pub async fn save_or_merge_with_retry(&self, name: &str, cfg: &Config) -> Result<Config> {
        let policy = self.config.retry;
        let mut attempt = 1;

        loop {
            let result = self.save_or_merge(name, cfg).await;
            match result {
                Err(err) if is_conflict_error(&err) && attempt < policy.max_attempts => {
                    warn!(
                        "Conflict merging {} (attempt {}/{}): {:#}",
                        name, attempt, policy.max_attempts, err
                    );
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Streams changes to `name` until `cancel` fires or the backend ends
    /// the stream.
    ///
    /// With no filters every change is delivered. Otherwise a change is
    /// delivered only if some filter matches its diff against the
    /// immediately preceding remote state.
    #[instrument(skip(self, filters, cancel), fields(filter_count = filters.len()))]
    pub async fn watch(
        &self,
        name: &str,
        filters: Vec<Box<dyn WatchFilter>>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<WatchEvent>> {
        let initial = self.get(name).await?;
        let from_version = initial.persistence_context().unwrap_or_default().to_string();

        let stream = self
            .client
            .watch(name, &from_version)
            .await
            .with_context(|| format!("Failed to watch config {name}"))?;

        info!("Watching config {} from version {}", name, from_version);
        Ok(watch::spawn(
            name.to_string(),
            initial,
            stream,
            filters,
            cancel,
            self.config.watch_channel_capacity,
        ))
    }
}

pub(crate) fn decode(name: &str, stored: StoredObject) -> Result<Config> {
    let entries = config_model::read(&stored.blob)
        .with_context(|| format!("Failed to decode config {name} @ {}", stored.version))?;
    Ok(Config::with_persistence_context(entries, stored.version))
}

fn encode(name: &str, entries: &Entries) -> Result<Bytes> {
    let bytes = config_model::write(entries)
        .with_context(|| format!("Failed to encode config {name}"))?;
    Ok(Bytes::from(bytes))
}
