//! Tests for persisted config artifacts

use std::collections::HashMap;

use crate::scope::ResourceScope;
use crate::services::config_composer::{ComposedConfig, ConfigTemplate};
use crate::services::config_store::{ConfigStore, remove_if_present};

fn sample() -> ComposedConfig {
    ConfigTemplate::new()
        .option("client", "target_name", "{name}")
        .option("device", "product", "Terminator")
        .render(&HashMap::from([("name".to_string(), "t-1".to_string())]))
        .unwrap()
}

#[tokio::test]
async fn test_persist_twice_yields_distinct_paths_with_equal_content() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().to_path_buf(), false);
    let mut scope = ResourceScope::new("persist");
    let config = sample();

    let first = store.persist(&mut scope, &config).await.unwrap();
    let second = store.persist(&mut scope, &config).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(ComposedConfig::load(&first).await.unwrap(), config);
    assert_eq!(ComposedConfig::load(&second).await.unwrap(), config);
    assert_eq!(store.written().await, vec![first.clone(), second.clone()]);

    scope.close().await.unwrap();
    assert!(!first.exists());
    assert!(!second.exists());
}

#[tokio::test]
async fn test_keep_artifacts_skips_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().to_path_buf(), true);
    let mut scope = ResourceScope::new("keep");

    let path = store.persist(&mut scope, &sample()).await.unwrap();
    assert_eq!(scope.pending(), 0);

    scope.close().await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn test_scratch_files_removed_even_when_keeping_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().to_path_buf(), true);
    let mut scope = ResourceScope::new("scratch");

    let config = store.persist(&mut scope, &sample()).await.unwrap();
    let placeholder = store.placeholder(&mut scope, "bundle-").await.unwrap();
    let bundle = store
        .scratch_bytes(&mut scope, "bundle-", ".raucb", &[0u8; 16])
        .await
        .unwrap();
    assert_eq!(scope.pending(), 2);

    scope.close().await.unwrap();
    assert!(config.exists());
    assert!(!placeholder.exists());
    assert!(!bundle.exists());
}

#[tokio::test]
async fn test_cleanup_tolerates_already_removed_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().to_path_buf(), false);
    let mut scope = ResourceScope::new("gone");

    let placeholder = store.placeholder(&mut scope, "bundle-").await.unwrap();
    assert_eq!(std::fs::metadata(&placeholder).unwrap().len(), 0);

    // The client under test deletes its download location itself
    std::fs::remove_file(&placeholder).unwrap();
    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_persist_bytes_writes_exact_size() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("nested"), false);
    let mut scope = ResourceScope::new("bytes");

    let path = store
        .persist_bytes(&mut scope, "bundle-", ".raucb", &vec![0u8; 512 * 1024])
        .await
        .unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 512 * 1024);
    assert!(path.extension().is_some_and(|ext| ext == "raucb"));

    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_remove_if_present_ignores_missing() {
    let dir = tempfile::tempdir().unwrap();
    remove_if_present(&dir.path().join("never-written")).await.unwrap();
}
