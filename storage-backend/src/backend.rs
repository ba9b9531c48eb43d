use async_trait::async_trait;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::RemoteObjectStore;

pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    pub fn from_config(config: StorageConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            StorageConfig::Local { path } => {
                info!("Initializing local storage at: {:?}", path);
                std::fs::create_dir_all(&path).map_err(|source| StorageError::Transfer {
                    op: "init",
                    key: path.display().to_string(),
                    source,
                })?;
                let store = LocalFileSystem::new_with_prefix(&path).map_err(|source| {
                    StorageError::Remote {
                        op: "init",
                        key: path.display().to_string(),
                        source,
                    }
                })?;
                Arc::new(store)
            }
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                info!("Initializing S3 storage for bucket: {}", bucket);
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&bucket)
                    .with_allow_http(allow_http);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(id) = access_key_id {
                    builder = builder.with_access_key_id(id);
                }
                if let Some(secret) = secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                let store = builder.build().map_err(|source| StorageError::Remote {
                    op: "init",
                    key: bucket,
                    source,
                })?;
                Arc::new(store)
            }
        };

        Ok(Self { store })
    }

    pub fn from_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

/// Zero-byte "folder" placeholders some S3 consoles create.
pub(crate) fn is_directory_marker(meta: &ObjectMeta) -> bool {
    meta.size == 0
        && meta
            .location
            .filename()
            .map_or(true, |name| !name.contains('.'))
}

#[async_trait]
impl RemoteObjectStore for ObjectStoreBackend {
    #[instrument(skip(self))]
    async fn put(&self, key: &str, local_path: &Path) -> Result<()> {
        let transfer = |source| StorageError::Transfer {
            op: "put",
            key: key.to_string(),
            source,
        };

        let mut file = File::open(local_path).await.map_err(transfer)?;
        let mut writer = BufWriter::new(Arc::clone(&self.store), ObjectPath::from(key));
        tokio::io::copy(&mut file, &mut writer)
            .await
            .map_err(transfer)?;
        writer.shutdown().await.map_err(transfer)?;

        info!("Uploaded {} to {}", local_path.display(), key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let remote = |source| StorageError::Remote {
            op: "list",
            key: prefix.to_string(),
            source,
        };

        let prefix_path = ObjectPath::from(prefix);
        let mut stream = self.store.list(Some(&prefix_path));

        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await.transpose().map_err(remote)? {
            if is_directory_marker(&meta) {
                debug!("Skipping directory marker: {}", meta.location);
                continue;
            }
            keys.push(meta.location.to_string());
        }

        keys.sort();
        debug!("Listed {} objects under {}", keys.len(), prefix);
        Ok(keys)
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str, local_path: &Path) -> Result<()> {
        let transfer = |source| StorageError::Transfer {
            op: "get",
            key: key.to_string(),
            source,
        };
        let remote = |source| StorageError::Remote {
            op: "get",
            key: key.to_string(),
            source,
        };

        let result = self
            .store
            .get(&ObjectPath::from(key))
            .await
            .map_err(remote)?;

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await.map_err(transfer)?;
        }
        let mut file = File::create(local_path).await.map_err(transfer)?;
        let mut stream = result.into_stream();
        while let Some(chunk) = stream.next().await.transpose().map_err(remote)? {
            file.write_all(&chunk).await.map_err(transfer)?;
        }
        file.flush().await.map_err(transfer)?;

        info!("Downloaded {} to {}", key, local_path.display());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(&ObjectPath::from(key))
            .await
            .map_err(|source| StorageError::Remote {
                op: "delete",
                key: key.to_string(),
                source,
            })?;

        info!("Deleted {}", key);
        Ok(())
    }
}
