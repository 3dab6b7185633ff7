use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutPayload};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{StorageConfig, WatchSettings};
use crate::error::{classify_object_store, StorageError};
use crate::metadata::{Metadata, VersionInfo};
use crate::{validate_name, PersistenceClient, StoredObject, WatchStream};

/// Persistence client over any `object_store` backend.
///
/// Each object lives under its name as `metadata.json` plus one
/// `versions/<version>/data.yaml` blob per write. Version blobs are written
/// with create-only semantics, so of two writers racing from the same
/// version only one can succeed.
#[derive(Clone)]
pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
    watch: WatchSettings,
}

impl ObjectStoreClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            watch: WatchSettings::default(),
        }
    }

    pub fn from_config(config: StorageConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            StorageConfig::Local { path } => {
                info!("Initializing local storage at: {:?}", path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create storage directory {path:?}"))?;
                Arc::new(LocalFileSystem::new_with_prefix(path)?)
            }
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                info!("Initializing S3 storage in bucket: {}", bucket);
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_allow_http(allow_http)
                    .with_conditional_put(S3ConditionalPut::ETagMatch);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(access_key_id) = access_key_id {
                    builder = builder.with_access_key_id(access_key_id);
                }
                if let Some(secret_access_key) = secret_access_key {
                    builder = builder.with_secret_access_key(secret_access_key);
                }
                Arc::new(builder.build()?)
            }
            StorageConfig::Memory => {
                anyhow::bail!("Memory storage is served by MemoryClient, not ObjectStoreClient")
            }
        };

        Ok(Self::new(store))
    }

    pub fn with_watch_settings(mut self, watch: WatchSettings) -> Self {
        self.watch = watch;
        self
    }

    fn metadata_path(name: &str) -> Path {
        Path::from(name).child("metadata.json")
    }

    fn versions_prefix(name: &str) -> Path {
        Path::from(name).child("versions")
    }

    fn version_data_path(name: &str, version: &str) -> Path {
        Self::versions_prefix(name).child(version).child("data.yaml")
    }

    async fn read_metadata(&self, name: &str) -> Result<Option<Metadata>> {
        let path = Self::metadata_path(name);

        match self.store.get(&path).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .map_err(|e| classify_object_store(e, name))?;
                let metadata: Metadata = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt metadata for {name}"))?;
                Ok(Some(metadata))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(classify_object_store(e, name)),
        }
    }

    async fn write_metadata(&self, name: &str, metadata: &Metadata) -> Result<()> {
        let path = Self::metadata_path(name);
        let json = serde_json::to_vec_pretty(metadata)?;

        self.store
            .put(&path, PutPayload::from(json))
            .await
            .map_err(|e| classify_object_store(e, name))?;
        Ok(())
    }

    /// Writes a new version blob; fails with `AlreadyExists` if another
    /// writer claimed the same version first.
    async fn write_version(&self, name: &str, version: &str, blob: Bytes) -> Result<()> {
        let path = Self::version_data_path(name, version);
        self.store
            .put_opts(&path, PutPayload::from(blob), PutMode::Create.into())
            .await
            .map_err(|e| classify_object_store(e, name))?;
        Ok(())
    }

    /// Records version blobs that exist past the metadata's current version.
    ///
    /// A writer that fails between `write_version` and `write_metadata`
    /// leaves such a blob behind. Indexing it lets later writers move on to
    /// the next slot instead of colliding with it forever.
    async fn index_committed_versions(&self, name: &str) -> Result<Metadata> {
        let mut metadata = self.read_metadata(name).await?.unwrap_or_default();
        let mut indexed = 0;

        loop {
            let version = metadata.next_version();
            let path = Self::version_data_path(name, &version);
            match self.store.head(&path).await {
                Ok(object) => {
                    warn!("Indexing unrecorded version {} of {}", version, name);
                    metadata.add_version(version, object.size);
                    indexed += 1;
                }
                Err(object_store::Error::NotFound { .. }) => break,
                Err(e) => return Err(classify_object_store(e, name)),
            }
        }

        if indexed > 0 {
            self.write_metadata(name, &metadata).await?;
        }
        Ok(metadata)
    }

    async fn read_version(&self, name: &str, version: &str) -> Result<StoredObject> {
        let path = Self::version_data_path(name, version);
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| classify_object_store(e, name))
            .with_context(|| format!("Failed to read data for {name} @ {version}"))?;
        let blob = result
            .bytes()
            .await
            .map_err(|e| classify_object_store(e, name))?;

        Ok(StoredObject {
            blob,
            version: version.to_string(),
        })
    }

    #[instrument(skip(self))]
    pub async fn list_versions(&self, name: &str) -> Result<Vec<VersionInfo>> {
        debug!("Listing versions for: {}", name);

        let metadata = self
            .read_metadata(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        Ok(metadata.version_infos())
    }

    #[instrument(skip(self))]
    pub async fn get_version(&self, name: &str, version: &str) -> Result<StoredObject> {
        debug!("Getting version {} of {}", version, name);

        let metadata = self
            .read_metadata(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        if !metadata.contains(version) {
            return Err(StorageError::NotFound(format!("{name} @ {version}")).into());
        }

        self.read_version(name, version).await
    }
}

#[async_trait]
impl PersistenceClient for ObjectStoreClient {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<StoredObject> {
        debug!("Getting object: {}", name);
        validate_name(name)?;

        let metadata = self
            .read_metadata(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        if metadata.current_version.is_empty() {
            return Err(StorageError::NotFound(format!("No versions found for {name}")).into());
        }

        self.read_version(name, &metadata.current_version).await
    }

    #[instrument(skip(self, blob))]
    async fn create(&self, name: &str, blob: Bytes) -> Result<String> {
        debug!("Creating object: {}", name);
        validate_name(name)?;

        if self.read_metadata(name).await?.is_some() {
            return Err(StorageError::AlreadyExists(name.to_string()).into());
        }

        let mut metadata = Metadata::new();
        let version = metadata.next_version();
        let data_size = blob.len();

        if let Err(err) = self.write_version(name, &version, blob).await {
            if crate::is_already_exists_error(&err) {
                self.index_committed_versions(name).await?;
                return Err(StorageError::AlreadyExists(name.to_string()).into());
            }
            return Err(err);
        }
        metadata.add_version(version.clone(), data_size);
        self.write_metadata(name, &metadata).await?;

        info!("Created {} at version {}", name, version);
        Ok(version)
    }

    #[instrument(skip(self, blob))]
    async fn update(&self, name: &str, expected_version: &str, blob: Bytes) -> Result<String> {
        debug!("Updating object {} from version {}", name, expected_version);
        validate_name(name)?;

        let mut metadata = self
            .read_metadata(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        if metadata.current_version != expected_version {
            return Err(StorageError::VersionConflict {
                expected: expected_version.to_string(),
                actual: metadata.current_version,
            }
            .into());
        }

        let version = metadata.next_version();
        let data_size = blob.len();

        // The version blob is the commit point. A taken slot means another
        // write landed, whether or not its metadata made it.
        if let Err(err) = self.write_version(name, &version, blob).await {
            if crate::is_already_exists_error(&err) {
                let current = self.index_committed_versions(name).await?;
                return Err(StorageError::VersionConflict {
                    expected: expected_version.to_string(),
                    actual: current.current_version,
                }
                .into());
            }
            return Err(err);
        }

        metadata.add_version(version.clone(), data_size);
        self.write_metadata(name, &metadata).await?;

        info!("Updated {} to version {}", name, version);
        Ok(version)
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        debug!("Deleting object: {}", name);
        validate_name(name)?;

        // Listed rather than taken from metadata, so unindexed blobs go too.
        let blobs: Vec<ObjectMeta> = self
            .store
            .list(Some(&Self::versions_prefix(name)))
            .try_collect()
            .await
            .map_err(|e| classify_object_store(e, name))?;
        let had_metadata = self.read_metadata(name).await?.is_some();

        if blobs.is_empty() && !had_metadata {
            debug!("{} already absent", name);
            return Ok(());
        }

        for blob in &blobs {
            match self.store.delete(&blob.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(classify_object_store(e, name)),
            }
        }

        match self.store.delete(&Self::metadata_path(name)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(classify_object_store(e, name)),
        }

        info!("Deleted {}", name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn watch(&self, name: &str, from_version: &str) -> Result<WatchStream> {
        validate_name(name)?;

        let state = PollState {
            client: self.clone(),
            name: name.to_string(),
            last_version: from_version.to_string(),
            failures: 0,
        };

        Ok(stream::unfold(state, poll_next).boxed())
    }
}

struct PollState {
    client: ObjectStoreClient,
    name: String,
    last_version: String,
    failures: u32,
}

async fn poll_next(mut state: PollState) -> Option<(Result<StoredObject>, PollState)> {
    let settings = state.client.watch;
    loop {
        if state.failures >= settings.max_poll_failures {
            warn!(
                "Giving up watch on {} after {} failed polls",
                state.name, state.failures
            );
            return None;
        }

        tokio::time::sleep(settings.poll_interval).await;

        let metadata = match state.client.read_metadata(&state.name).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                info!("{} was deleted, ending watch", state.name);
                return None;
            }
            Err(err) => {
                state.failures += 1;
                return Some((Err(err), state));
            }
        };

        if metadata.current_version.is_empty() || metadata.current_version == state.last_version {
            state.failures = 0;
            continue;
        }

        match state
            .client
            .read_version(&state.name, &metadata.current_version)
            .await
        {
            Ok(object) => {
                debug!("{} changed to version {}", state.name, object.version);
                state.failures = 0;
                state.last_version.clone_from(&object.version);
                return Some((Ok(object), state));
            }
            Err(err) => {
                state.failures += 1;
                return Some((Err(err), state));
            }
        }
    }
}
