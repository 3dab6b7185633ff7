use anyhow::Result;
use config_repository::{
    Config, ConfigRepository, DirectoryFilter, RepositoryConfig, WatchEvent, WatchFilter,
};
use std::time::Duration;
use storage_backend::{StorageConfig, WatchSettings};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

const NAME: &str = "demo-service";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let storage_path = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data".to_string());
    info!("Using storage path: {}", storage_path);

    let watch_settings = WatchSettings {
        poll_interval: Duration::from_millis(200),
        ..WatchSettings::default()
    };
    let repository = ConfigRepository::from_config(
        StorageConfig::local(storage_path),
        watch_settings,
        RepositoryConfig::from_env()?,
    )?;

    repository.delete(NAME).await?;
    repository
        .create(
            NAME,
            &Config::new()
                .set("db/host", "localhost")
                .set("db/port", "5432")
                .set("feature/beta", "off"),
        )
        .await?;

    let cancel = CancellationToken::new();
    let filters: Vec<Box<dyn WatchFilter>> = vec![Box::new(DirectoryFilter::new("db"))];
    let mut events = repository.watch(NAME, filters, cancel.clone()).await?;

    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Update { diff, current, .. } => {
                    for entry in &diff {
                        info!(
                            "Watched change at {:?}: {}",
                            current.persistence_context(),
                            entry
                        );
                    }
                }
                WatchEvent::Error(err) => warn!("Watch error: {:#}", err),
            }
        }
        info!("Watch closed");
    });

    // Two writers start from the same snapshot.
    let alice = repository.get(NAME).await?.set("db/host", "db.internal");
    let bob = repository.get(NAME).await?.set("feature/beta", "on");

    repository.save_or_merge_with_retry(NAME, &alice).await?;
    let merged = repository.save_or_merge_with_retry(NAME, &bob).await?;

    for (key, value) in merged.get_all() {
        info!("{} = {}", key, value);
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    watcher.await?;

    Ok(())
}
