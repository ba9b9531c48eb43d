use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, StorageError};
use crate::secret::get_secret_with;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    Local {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    },
}

impl StorageConfig {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }

    pub fn s3(
        bucket: impl Into<String>,
        region: Option<String>,
        endpoint: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        allow_http: bool,
    ) -> Self {
        Self::S3 {
            bucket: bucket.into(),
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            allow_http,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads `STORAGE_BACKEND` (`s3` unless set to `local`) and the
    /// variables that backend needs. Every S3 variable may also come from
    /// a `<VAR>_FILE` secret.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = lookup("STORAGE_BACKEND").unwrap_or_else(|| "s3".to_string());

        match backend.as_str() {
            "local" => {
                let path = lookup("STORAGE_PATH").unwrap_or_else(|| "./remote-backups".to_string());
                Ok(Self::local(path))
            }
            "s3" => {
                let require = |name: &str| -> Result<String> {
                    get_secret_with(name, &lookup)?
                        .ok_or_else(|| StorageError::MissingVariable(name.to_string()))
                };

                let bucket = require("BUCKET_NAME")?;
                let access_key_id = require("ACCESS_KEY_ID")?;
                let secret_access_key = require("SECRET_ACCESS_KEY")?;
                let endpoint = require("ENDPOINT_URL")?;
                let region = get_secret_with("REGION", &lookup)?;
                let allow_http = lookup("ALLOW_HTTP")
                    .map(|v| matches!(v.trim(), "1" | "true"))
                    .unwrap_or_else(|| endpoint.starts_with("http://"));

                Ok(Self::s3(
                    bucket,
                    region,
                    Some(endpoint),
                    Some(access_key_id),
                    Some(secret_access_key),
                    allow_http,
                ))
            }
            _ => Err(StorageError::InvalidConfig(format!(
                "Unknown storage backend: {backend}. Must be 'local' or 's3'"
            ))),
        }
    }
}

/// Bucket directory every key is rooted under (`BUCKET_DIR`), empty when unset.
pub fn bucket_prefix_from_env() -> String {
    std::env::var("BUCKET_DIR").unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<StorageConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StorageConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_s3_requires_bucket() {
        let err = from_vars(&[("ACCESS_KEY_ID", "id")]).unwrap_err();
        assert!(matches!(err, StorageError::MissingVariable(ref name) if name == "BUCKET_NAME"));
    }

    #[test]
    fn test_s3_from_vars() {
        let config = from_vars(&[
            ("BUCKET_NAME", "frappe"),
            ("ACCESS_KEY_ID", "id"),
            ("SECRET_ACCESS_KEY", "secret"),
            ("ENDPOINT_URL", "http://minio:9000"),
            ("REGION", "us-east-1"),
        ])
        .unwrap();

        match config {
            StorageConfig::S3 {
                bucket,
                region,
                allow_http,
                ..
            } => {
                assert_eq!(bucket, "frappe");
                assert_eq!(region.as_deref(), Some("us-east-1"));
                assert!(allow_http);
            }
            StorageConfig::Local { .. } => panic!("expected S3 config"),
        }
    }

    #[test]
    fn test_local_backend() {
        let config = from_vars(&[("STORAGE_BACKEND", "local"), ("STORAGE_PATH", "/tmp/x")]).unwrap();
        assert!(matches!(config, StorageConfig::Local { ref path } if path == &PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_unknown_backend() {
        assert!(matches!(
            from_vars(&[("STORAGE_BACKEND", "ftp")]),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
