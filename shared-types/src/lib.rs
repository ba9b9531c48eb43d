//! Domain types shared by the storage backend, the worker library and the CLI.

pub mod backup;
pub mod naming;
pub mod tenant;
pub mod versions;

pub use backup::{BackupSet, RetentionLimit};
pub use naming::{
    tenant_prefix, tenant_slug, ArtifactKind, ArtifactName, ArtifactParseError, RemoteBackupKey,
    Timestamp, TIMESTAMP_FORMAT,
};
pub use tenant::{CommonConfig, DbType, Tenant, TenantConfig};
pub use versions::{AppVersion, AppVersionRecord};
