use anyhow::Result;
use shared_types::{ArtifactKind, ArtifactName, RemoteBackupKey, RetentionLimit, Timestamp};
use storage_backend::{ObjectStoreBackend, RemoteObjectStore, RetentionPolicy, StorageConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let storage_path = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data".to_string());
    println!("Using storage path: {}", storage_path);

    let storage = ObjectStoreBackend::from_config(StorageConfig::local(&storage_path))?;
    let scratch = tempfile::TempDir::new()?;

    // Push five fake backup runs for one tenant
    for day in 1..=5 {
        let timestamp = Timestamp::parse(&format!("202401{day:02}_020000"))?;
        let artifact = ArtifactName::new(timestamp, "site1_localhost", ArtifactKind::Database);
        let local = scratch.path().join(artifact.file_name());
        std::fs::write(&local, b"-- dump")?;

        let key = RemoteBackupKey::for_artifact("backups", &artifact).to_key();
        storage.put(&key, &local).await?;
        println!("Pushed {}", key);
    }

    // Keep the newest three
    let policy = RetentionPolicy::new(RetentionLimit::default());
    let report = policy.prune(&storage, "backups", "site1_localhost").await?;
    println!("Deleted {} objects", report.deleted.len());
    for ts in &report.retained {
        println!("Kept backup {}", ts);
    }

    Ok(())
}
