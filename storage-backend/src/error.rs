use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{op} failed for {key}: {source}")]
    Remote {
        op: &'static str,
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("{op} transfer failed for {key}: {source}")]
    Transfer {
        op: &'static str,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Variable {0} not set")]
    MissingVariable(String),

    #[error("Cannot read secret {var} from {path}: {source}")]
    SecretFile {
        var: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    /// Key the failed operation was addressing, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Remote { key, .. } | Self::Transfer { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
