//! Merge-on-write repository and watch engine for hierarchical
//! configurations kept in a versioned object store.
//!
//! ```no_run
//! use config_repository::{ConfigRepository, KeyFilter, WatchFilter};
//! use storage_backend::MemoryClient;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let repository = ConfigRepository::new(Arc::new(MemoryClient::new()));
//! let config = repository.get("my-app").await?;
//! let edited = config.set("feature/enabled", "true");
//! repository.save_or_merge("my-app", &edited).await?;
//!
//! let filters: Vec<Box<dyn WatchFilter>> = vec![Box::new(KeyFilter::new("feature/enabled"))];
//! let mut events = repository.watch("my-app", filters, CancellationToken::new()).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod config;
mod filter;
mod merge;
mod repository;
mod watch;


pub use config::{RepositoryConfig, RetryPolicy};
pub use config_model::{Change, Config, DiffEntry, Entries, Key, Value};
pub use filter::{DirectoryFilter, KeyFilter, WatchFilter};
pub use merge::MergeError;
pub use repository::ConfigRepository;
pub use watch::WatchEvent;
