#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectMeta;
use shared_types::{ArtifactKind, ArtifactName, RemoteBackupKey, RetentionLimit, Timestamp};
use std::path::Path;
use tempfile::TempDir;

use crate::backend::{is_directory_marker, ObjectStoreBackend};
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::retention::RetentionPolicy;
use crate::RemoteObjectStore;

const PREFIX: &str = "backups";

fn setup_test_backend() -> (ObjectStoreBackend, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::local(temp_dir.path().join("bucket"));
    let backend = ObjectStoreBackend::from_config(config).unwrap();
    (backend, temp_dir)
}

/// Writes the four artifacts of one backup run and uploads them.
async fn push_backup_set(
    store: &dyn RemoteObjectStore,
    scratch: &Path,
    slug: &str,
    timestamp: &str,
) -> Vec<String> {
    let timestamp = Timestamp::parse(timestamp).unwrap();
    let mut uploaded = Vec::new();
    for kind in ArtifactKind::ALL {
        let artifact = ArtifactName::new(timestamp.clone(), slug, kind);
        let local = scratch.join(artifact.file_name());
        std::fs::write(&local, format!("{kind} of {timestamp}")).unwrap();

        let key = RemoteBackupKey::for_artifact(PREFIX, &artifact).to_key();
        store.put(&key, &local).await.unwrap();
        uploaded.push(key);
    }
    uploaded
}

async fn remaining_timestamps(store: &dyn RemoteObjectStore, slug: &str) -> Vec<String> {
    let keys = store.list(&format!("{PREFIX}/{slug}")).await.unwrap();
    RetentionPolicy::group(PREFIX, &keys)
        .into_keys()
        .map(String::from)
        .collect()
}

#[tokio::test]
async fn test_put_get_round_trip_is_byte_identical() {
    let (backend, dir) = setup_test_backend();
    let original = dir.path().join("dump.sql.gz");
    let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    std::fs::write(&original, &payload).unwrap();

    backend
        .put("backups/acme/20240101_000000/dump.sql.gz", &original)
        .await
        .unwrap();

    let restored = dir.path().join("pulled/acme/dump.sql.gz");
    backend
        .get("backups/acme/20240101_000000/dump.sql.gz", &restored)
        .await
        .unwrap();

    assert_eq!(std::fs::read(restored).unwrap(), payload);
}

#[tokio::test]
async fn test_list_is_scoped_to_prefix() {
    let (backend, dir) = setup_test_backend();
    push_backup_set(&backend, dir.path(), "acme", "20240101_000000").await;
    push_backup_set(&backend, dir.path(), "globex", "20240101_000000").await;

    let acme = backend.list("backups/acme").await.unwrap();
    assert_eq!(acme.len(), 4);
    assert!(acme.iter().all(|k| k.starts_with("backups/acme/")));

    let all = backend.list(PREFIX).await.unwrap();
    assert_eq!(all.len(), 8);

    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
}

#[tokio::test]
async fn test_get_missing_key_reports_key() {
    let (backend, dir) = setup_test_backend();
    let err = backend
        .get("backups/acme/nope", &dir.path().join("out"))
        .await
        .unwrap_err();
    assert_eq!(err.key(), Some("backups/acme/nope"));
}

#[tokio::test]
async fn test_fourth_push_prunes_oldest() {
    let (backend, dir) = setup_test_backend();
    let policy = RetentionPolicy::new(RetentionLimit::new(3).unwrap());
    let stamps = [
        "20240101_000000",
        "20240102_000000",
        "20240103_000000",
        "20240104_000000",
    ];

    let mut first_keys = Vec::new();
    for (i, ts) in stamps.iter().enumerate() {
        let keys = push_backup_set(&backend, dir.path(), "acme", ts).await;
        if i == 0 {
            first_keys = keys;
        }
        let report = policy.prune(&backend, PREFIX, "acme").await.unwrap();
        assert!(report.is_complete());
    }

    assert_eq!(
        remaining_timestamps(&backend, "acme").await,
        ["20240102_000000", "20240103_000000", "20240104_000000"]
    );
    let listed = backend.list("backups/acme").await.unwrap();
    for key in first_keys {
        assert!(!listed.contains(&key), "{key} should be gone");
    }
}

#[tokio::test]
async fn test_prune_far_over_limit_converges() {
    let (backend, dir) = setup_test_backend();
    for day in 1..=7 {
        push_backup_set(&backend, dir.path(), "acme", &format!("202401{day:02}_000000")).await;
    }

    let policy = RetentionPolicy::new(RetentionLimit::new(2).unwrap());
    let report = policy.prune(&backend, PREFIX, "acme").await.unwrap();

    assert_eq!(report.deleted.len(), 5 * 4);
    assert_eq!(
        remaining_timestamps(&backend, "acme").await,
        ["20240106_000000", "20240107_000000"]
    );
}

#[tokio::test]
async fn test_prune_leaves_other_tenants_alone() {
    let (backend, dir) = setup_test_backend();
    push_backup_set(&backend, dir.path(), "globex", "20230101_000000").await;
    for day in 1..=3 {
        push_backup_set(&backend, dir.path(), "acme", &format!("202401{day:02}_000000")).await;
    }

    let policy = RetentionPolicy::new(RetentionLimit::new(1).unwrap());
    policy.prune(&backend, PREFIX, "acme").await.unwrap();

    assert_eq!(remaining_timestamps(&backend, "globex").await, ["20230101_000000"]);
    assert_eq!(remaining_timestamps(&backend, "acme").await, ["20240103_000000"]);
}

/// Delegates to a real backend but refuses to delete one key.
struct FlakyDeletes {
    inner: ObjectStoreBackend,
    poisoned: String,
}

#[async_trait]
impl RemoteObjectStore for FlakyDeletes {
    async fn put(&self, key: &str, local_path: &Path) -> Result<()> {
        self.inner.put(key, local_path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn get(&self, key: &str, local_path: &Path) -> Result<()> {
        self.inner.get(key, local_path).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if key == self.poisoned {
            return Err(StorageError::Transfer {
                op: "delete",
                key: key.to_string(),
                source: std::io::Error::other("access denied"),
            });
        }
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_delete_failure_does_not_stop_the_pass() {
    let (backend, dir) = setup_test_backend();
    let oldest = push_backup_set(&backend, dir.path(), "acme", "20240101_000000").await;
    push_backup_set(&backend, dir.path(), "acme", "20240102_000000").await;
    push_backup_set(&backend, dir.path(), "acme", "20240103_000000").await;

    let store = FlakyDeletes {
        inner: backend,
        poisoned: oldest[0].clone(),
    };
    let policy = RetentionPolicy::new(RetentionLimit::new(1).unwrap());
    let report = policy.prune(&store, PREFIX, "acme").await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, oldest[0]);
    assert_eq!(report.deleted.len(), 7);

    let listed = store.list("backups/acme").await.unwrap();
    assert_eq!(listed.len(), 4 + 1);
}

#[tokio::test]
async fn test_partially_deleted_timestamp_is_pruned_without_error() {
    let (backend, dir) = setup_test_backend();
    let oldest = push_backup_set(&backend, dir.path(), "acme", "20240101_000000").await;
    push_backup_set(&backend, dir.path(), "acme", "20240102_000000").await;
    for key in &oldest[1..] {
        backend.delete(key).await.unwrap();
    }

    let policy = RetentionPolicy::new(RetentionLimit::new(1).unwrap());
    let report = policy.prune(&backend, PREFIX, "acme").await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.deleted, vec![oldest[0].clone()]);
}

#[test]
fn test_directory_markers_are_recognised() {
    let meta = |location: &str, size: usize| ObjectMeta {
        location: ObjectPath::from(location),
        last_modified: chrono::Utc::now(),
        size,
        e_tag: None,
        version: None,
    };

    assert!(is_directory_marker(&meta("backups/acme", 0)));
    assert!(is_directory_marker(&meta("backups/acme/20240101_000000", 0)));
    assert!(!is_directory_marker(&meta("backups/acme/20240101_000000/x.tar", 0)));
    assert!(!is_directory_marker(&meta("backups/acme/20240101_000000/x.tar", 10)));
}
