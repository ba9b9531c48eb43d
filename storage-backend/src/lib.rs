pub mod backend;
pub mod config;
pub mod error;
pub mod retention;
pub mod secret;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::path::Path;

pub use backend::ObjectStoreBackend;
pub use config::{bucket_prefix_from_env, StorageConfig};
pub use error::{Result, StorageError};
pub use retention::{DeleteFailure, PruneReport, RetentionPolicy};
pub use secret::{get_secret, get_secret_with, require_secret};

/// Minimal contract over a bucket/key object store.
///
/// Each call is a single remote operation. Failures carry the key they
/// addressed; nothing is swallowed.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Upload the file at `local_path` to `key`.
    async fn put(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Every object key under `prefix`, sorted, with directory markers
    /// removed. Pagination is handled here.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Download `key` into `local_path`, creating parent directories.
    async fn get(&self, key: &str, local_path: &Path) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
