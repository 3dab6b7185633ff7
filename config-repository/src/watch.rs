use config_model::{Config, DiffEntry};
use futures::StreamExt;
use storage_backend::WatchStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::filter::WatchFilter;
use crate::repository::decode;

/// One delivery on a watch subscription.
#[derive(Debug)]
pub enum WatchEvent {
    Update {
        previous: Config,
        current: Config,
        /// `previous.diff(&current)`.
        diff: Vec<DiffEntry>,
    },
    /// A failed read or decode. The subscription stays open.
    Error(anyhow::Error),
}

pub(crate) fn spawn(
    name: String,
    initial: Config,
    stream: WatchStream,
    filters: Vec<Box<dyn WatchFilter>>,
    cancel: CancellationToken,
    capacity: usize,
) -> mpsc::Receiver<WatchEvent> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let worker = Worker {
        name,
        last: initial,
        filters,
    };
    tokio::spawn(worker.run(stream, tx, cancel));
    rx
}

struct Worker {
    name: String,
    /// Last decoded remote state, forwarded or not.
    last: Config,
    filters: Vec<Box<dyn WatchFilter>>,
}

impl Worker {
    // The sender and the backend stream are dropped together on return,
    // which closes the output channel exactly once.
    async fn run(
        mut self,
        mut stream: WatchStream,
        tx: mpsc::Sender<WatchEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Watch on {} cancelled", self.name);
                    break;
                }
                () = tx.closed() => {
                    debug!("Watch receiver for {} dropped", self.name);
                    break;
                }
                item = stream.next() => item,
            };

            let Some(item) = item else {
                info!("Watch stream for {} closed", self.name);
                break;
            };

            let Some(event) = self.handle(item) else {
                continue;
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Watch on {} cancelled", self.name);
                    break;
                }
                sent = tx.send(event) => {
                    if sent.is_err() {
                        debug!("Watch receiver for {} dropped", self.name);
                        break;
                    }
                }
            }
        }
    }

    fn handle(&mut self, item: anyhow::Result<storage_backend::StoredObject>) -> Option<WatchEvent> {
        let current = match item.and_then(|stored| decode(&self.name, stored)) {
            Ok(current) => current,
            Err(err) => {
                warn!("Watch on {} received error: {:#}", self.name, err);
                let err = err.context(format!("Watch on config {} failed", self.name));
                return Some(WatchEvent::Error(err));
            }
        };

        let diff = self.last.diff(&current);
        let forward =
            self.filters.is_empty() || self.filters.iter().any(|filter| filter.matches(&diff));
        let previous = std::mem::replace(&mut self.last, current.clone());

        if !forward {
            debug!(
                "Dropping change to {} at {:?}: no filter matched",
                self.name,
                current.persistence_context()
            );
            return None;
        }

        Some(WatchEvent::Update {
            previous,
            current,
            diff,
        })
    }
}
