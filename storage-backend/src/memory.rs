use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::StorageError;
use crate::{validate_name, PersistenceClient, StoredObject, WatchStream};

const WATCH_BUFFER: usize = 64;

/// In-process persistence client with push-based watch.
///
/// Version tokens come from one store-wide revision counter, so a name that
/// is deleted and created again never reuses an earlier token.
#[derive(Clone, Default)]
pub struct MemoryClient {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    revision: u64,
    objects: HashMap<String, MemoryObject>,
}

struct MemoryObject {
    current: StoredObject,
    events: broadcast::Sender<ObjectEvent>,
}

#[derive(Debug, Clone)]
enum ObjectEvent {
    Written(StoredObject),
    Deleted,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.revision += 1;
        format!("v{}", self.revision)
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceClient for MemoryClient {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<StoredObject> {
        validate_name(name)?;
        let inner = self.inner.read().await;
        inner
            .objects
            .get(name)
            .map(|object| object.current.clone())
            .ok_or_else(|| StorageError::NotFound(name.to_string()).into())
    }

    #[instrument(skip(self, blob))]
    async fn create(&self, name: &str, blob: Bytes) -> Result<String> {
        validate_name(name)?;
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(name) {
            return Err(StorageError::AlreadyExists(name.to_string()).into());
        }

        let version = inner.next_version();
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        inner.objects.insert(
            name.to_string(),
            MemoryObject {
                current: StoredObject {
                    blob,
                    version: version.clone(),
                },
                events,
            },
        );

        info!("Created {} at version {}", name, version);
        Ok(version)
    }

    #[instrument(skip(self, blob))]
    async fn update(&self, name: &str, expected_version: &str, blob: Bytes) -> Result<String> {
        validate_name(name)?;
        let mut inner = self.inner.write().await;
        let version = inner.next_version();

        let object = inner
            .objects
            .get_mut(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        if object.current.version != expected_version {
            return Err(StorageError::VersionConflict {
                expected: expected_version.to_string(),
                actual: object.current.version.clone(),
            }
            .into());
        }

        object.current = StoredObject {
            blob,
            version: version.clone(),
        };
        // No receivers is fine.
        let _ = object.events.send(ObjectEvent::Written(object.current.clone()));

        info!("Updated {} to version {}", name, version);
        Ok(version)
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let mut inner = self.inner.write().await;
        match inner.objects.remove(name) {
            Some(object) => {
                let _ = object.events.send(ObjectEvent::Deleted);
                info!("Deleted {}", name);
            }
            None => debug!("{} already absent", name),
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn watch(&self, name: &str, from_version: &str) -> Result<WatchStream> {
        validate_name(name)?;
        let inner = self.inner.read().await;
        let object = inner
            .objects
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        let receiver = object.events.subscribe();
        let catch_up: Option<Result<StoredObject>> =
            (object.current.version != from_version).then(|| Ok(object.current.clone()));

        let updates = stream::unfold((receiver, name.to_string()), |(mut receiver, name)| async move {
            match receiver.recv().await {
                Ok(ObjectEvent::Written(object)) => Some((Ok(object), (receiver, name))),
                Ok(ObjectEvent::Deleted) | Err(broadcast::error::RecvError::Closed) => {
                    debug!("Watch on {} ended", name);
                    None
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Watch on {} lagged by {} events", name, missed);
                    let err = StorageError::Connection(format!(
                        "watch on {name} lagged and missed {missed} events"
                    ));
                    Some((Err(err.into()), (receiver, name)))
                }
            }
        });

        Ok(stream::iter(catch_up).chain(updates).boxed())
    }
}
