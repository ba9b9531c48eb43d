use shared_types::ArtifactParseError;
use storage_backend::{DeleteFailure, StorageError};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection to {host}:{port} timed out after {attempts} attempts")]
    Connectivity {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error(transparent)]
    ArtifactParse(#[from] ArtifactParseError),

    #[error(transparent)]
    RemoteOperation(StorageError),

    #[error("Restore of {tenant} failed at step '{step}': {source}")]
    RestoreStep {
        tenant: String,
        step: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("No backup found for {tenant}")]
    NoBackup { tenant: String },

    #[error("Migration of {tenant} failed: {source}")]
    Migration {
        tenant: String,
        #[source]
        source: BoxError,
    },

    #[error("{} remote deletions failed: {}", .failures.len(), describe(.failures))]
    PruneIncomplete { failures: Vec<DeleteFailure> },

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for WorkerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::MissingVariable(name) => {
                WorkerError::Configuration(format!("Variable {name} not set"))
            }
            StorageError::InvalidConfig(msg) => WorkerError::Configuration(msg),
            other => WorkerError::RemoteOperation(other),
        }
    }
}

impl WorkerError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn json(path: impl AsRef<std::path::Path>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn missing_variable(name: &str) -> Self {
        Self::Configuration(format!("Variable {name} not set"))
    }
}

fn describe(failures: &[DeleteFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.key, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, WorkerError>;
