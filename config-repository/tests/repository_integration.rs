#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use anyhow::Result;
use config_repository::{Config, ConfigRepository, Entries, RepositoryConfig};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use storage_backend::{
    error_kind, is_not_found_error, ErrorKind, MemoryClient, ObjectStoreClient, PersistenceClient,
    StorageConfig, WatchSettings,
};
use tempfile::TempDir;

fn entries(pairs: &[(&str, &str)]) -> Entries {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn memory_repository() -> ConfigRepository {
    ConfigRepository::new(Arc::new(MemoryClient::new()))
}

fn local_repository() -> Result<(ConfigRepository, TempDir)> {
    let temp_dir = TempDir::new()?;
    let repository = ConfigRepository::from_config(
        StorageConfig::local(temp_dir.path()),
        WatchSettings::default(),
        RepositoryConfig::default(),
    )?;
    Ok((repository, temp_dir))
}

// ============================================================================
// Scenarios shared by every backend
// ============================================================================

async fn check_get_create_update(repository: &ConfigRepository) -> Result<()> {
    let err = repository.get("service").await.unwrap_err();
    assert!(is_not_found_error(&err));

    let created = repository
        .create("service", &Config::new().set("db/host", "localhost").set("db/port", "5432"))
        .await?;
    assert!(created.change_history().is_empty());
    assert!(created.persistence_context().is_some());

    let err = repository.create("service", &Config::new()).await.unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::AlreadyExists);

    let fetched = repository.get("service").await?;
    assert_eq!(
        fetched.get_all(),
        entries(&[("db/host", "localhost"), ("db/port", "5432")])
    );
    assert_eq!(fetched.persistence_context(), created.persistence_context());

    let updated = repository
        .update("service", &fetched.set("db/host", "db.internal"))
        .await?;
    assert_ne!(updated.persistence_context(), fetched.persistence_context());
    assert!(updated.change_history().is_empty());

    // The pre-update snapshot is now stale.
    let err = repository
        .update("service", &fetched.set("db/port", "6543"))
        .await
        .unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::Conflict);

    let current = repository.get("service").await?;
    assert_eq!(current.get("db/host").map(String::as_str), Some("db.internal"));
    Ok(())
}

async fn check_disjoint_edits_preserved(repository: &ConfigRepository) -> Result<()> {
    repository
        .create("merge", &Config::from_entries(entries(&[("a", "1"), ("b", "1")])))
        .await?;

    let local = repository.get("merge").await?;

    let other_writer = repository.get("merge").await?;
    repository.update("merge", &other_writer.set("b", "2")).await?;

    let merged = repository.save_or_merge("merge", &local.set("a", "9")).await?;
    assert_eq!(merged.get_all(), entries(&[("a", "9"), ("b", "2")]));
    assert!(merged.change_history().is_empty());

    let stored = repository.get("merge").await?;
    assert_eq!(stored.get_all(), merged.get_all());
    assert_eq!(stored.persistence_context(), merged.persistence_context());
    Ok(())
}

async fn check_local_delete_wins(repository: &ConfigRepository) -> Result<()> {
    repository
        .create("deletes", &Config::from_entries(entries(&[("a", "1"), ("c", "3")])))
        .await?;

    let local = repository.get("deletes").await?.delete("c");
    let merged = repository.save_or_merge("deletes", &local).await?;

    assert_eq!(merged.get_all(), entries(&[("a", "1")]));
    assert_eq!(repository.get("deletes").await?.get_all(), entries(&[("a", "1")]));
    Ok(())
}

async fn check_delete_is_idempotent(repository: &ConfigRepository) -> Result<()> {
    repository.create("doomed", &Config::new().set("k", "v")).await?;
    repository.delete("doomed").await?;
    repository.delete("doomed").await?;
    assert!(is_not_found_error(&repository.get("doomed").await.unwrap_err()));
    Ok(())
}

#[tokio::test]
async fn test_memory_get_create_update() -> Result<()> {
    check_get_create_update(&memory_repository()).await
}

#[tokio::test]
async fn test_local_get_create_update() -> Result<()> {
    let (repository, _dir) = local_repository()?;
    check_get_create_update(&repository).await
}

#[tokio::test]
async fn test_memory_disjoint_edits_preserved() -> Result<()> {
    check_disjoint_edits_preserved(&memory_repository()).await
}

#[tokio::test]
async fn test_local_disjoint_edits_preserved() -> Result<()> {
    let (repository, _dir) = local_repository()?;
    check_disjoint_edits_preserved(&repository).await
}

#[tokio::test]
async fn test_memory_local_delete_wins() -> Result<()> {
    check_local_delete_wins(&memory_repository()).await
}

#[tokio::test]
async fn test_local_delete_wins_over_remote() -> Result<()> {
    let (repository, _dir) = local_repository()?;
    check_local_delete_wins(&repository).await
}

#[tokio::test]
async fn test_memory_delete_is_idempotent() -> Result<()> {
    check_delete_is_idempotent(&memory_repository()).await
}

#[tokio::test]
async fn test_local_delete_is_idempotent() -> Result<()> {
    let (repository, _dir) = local_repository()?;
    check_delete_is_idempotent(&repository).await
}

// ============================================================================
// Backend-independent edge cases
// ============================================================================

#[tokio::test]
async fn test_create_ignores_change_history() -> Result<()> {
    let repository = memory_repository();

    let composed = Config::new().set("a", "1").set("b", "2").delete("b");
    let created = repository.create("fresh", &composed).await?;

    assert_eq!(created.get_all(), entries(&[("a", "1")]));
    assert!(created.change_history().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_no_op_merge_returns_same_entries() -> Result<()> {
    let repository = memory_repository();
    repository
        .create("noop", &Config::from_entries(entries(&[("a", "1")])))
        .await?;

    let config = repository.get("noop").await?;
    let result = repository.save_or_merge("noop", &config).await?;

    assert_eq!(result.get_all(), config.get_all());
    assert_eq!(result.persistence_context(), config.persistence_context());
    Ok(())
}

#[tokio::test]
async fn test_merge_ignores_stale_persistence_context() -> Result<()> {
    let repository = memory_repository();
    repository
        .create("stale", &Config::from_entries(entries(&[("a", "1")])))
        .await?;

    let local = repository.get("stale").await?;
    for value in ["2", "3", "4"] {
        let current = repository.get("stale").await?;
        repository.update("stale", &current.set("other", value)).await?;
    }

    let merged = repository.save_or_merge("stale", &local.set("a", "x")).await?;
    assert_eq!(merged.get_all(), entries(&[("a", "x"), ("other", "4")]));
    Ok(())
}

#[tokio::test]
async fn test_merge_recursive_delete() -> Result<()> {
    let repository = memory_repository();
    repository
        .create(
            "tree",
            &Config::from_entries(entries(&[
                ("key1/a", "a"),
                ("key1/x", "c"),
                ("key10", "b"),
            ])),
        )
        .await?;

    let local = repository.get("tree").await?.delete_recursive("key1");
    assert_eq!(local.change_history().len(), 2);
    let merged = repository.save_or_merge("tree", &local).await?;

    assert_eq!(merged.get_all(), entries(&[("key10", "b")]));
    assert_eq!(repository.get("tree").await?.get_all(), entries(&[("key10", "b")]));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_document_is_generic() -> Result<()> {
    let client = Arc::new(MemoryClient::new());
    client
        .create("corrupt", bytes::Bytes::from_static(b"port: 5432\n"))
        .await?;

    let repository = ConfigRepository::new(client);
    let err = repository.get("corrupt").await.unwrap_err();
    assert_eq!(error_kind(&err), ErrorKind::Generic);
    assert!(format!("{err:#}").contains("Decode error"));
    Ok(())
}

#[tokio::test]
async fn test_retry_recovers_from_unrecorded_version() -> Result<()> {
    let store = Arc::new(InMemory::new());
    let repository = ConfigRepository::new(Arc::new(ObjectStoreClient::new(store.clone())));
    repository
        .create("app", &Config::from_entries(entries(&[("a", "1")])))
        .await?;

    let local = repository.get("app").await?.set("b", "local");

    // A write whose metadata update never landed.
    store
        .put(
            &Path::from("app/versions/v2/data.yaml"),
            PutPayload::from_static(b"a: \"2\"\n"),
        )
        .await?;

    let merged = repository.save_or_merge_with_retry("app", &local).await?;
    assert_eq!(merged.get_all(), entries(&[("a", "2"), ("b", "local")]));
    assert_eq!(merged.persistence_context(), Some("v3"));
    Ok(())
}
