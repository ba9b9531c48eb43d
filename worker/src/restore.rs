//! Restores a tenant from its newest backup, pulling from the remote store
//! when nothing is staged locally.

use shared_types::{ArtifactKind, BackupSet, DbType, RemoteBackupKey, TenantConfig, Timestamp};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage_backend::RemoteObjectStore;
use tracing::{debug, error, info, instrument, warn};

use crate::archive;
use crate::command::CommandRunner;
use crate::credentials;
use crate::db::DbEngines;
use crate::error::{BoxError, Result, WorkerError};
use crate::scanner::BackupArtifactScanner;
use crate::sites::{SITE_CONFIG_FILE, SitesDir, read_json};

/// Source of variables for database root credentials.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where remote backups are pulled from.
#[derive(Clone)]
pub struct RemoteSource {
    pub store: Arc<dyn RemoteObjectStore>,
    pub bucket_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    pub tenant: String,
    pub timestamp: Timestamp,
    /// True when the tenant was provisioned by this run.
    pub created: bool,
    pub db_type: DbType,
    pub db_name: String,
    pub restored_files: Vec<ArtifactKind>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub restored: Vec<RestoreResult>,
    pub failed: Vec<(String, WorkerError)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RestoreOrchestrator {
    sites: SitesDir,
    backup_dir: PathBuf,
    staging: BackupArtifactScanner,
    remote: Option<RemoteSource>,
    runner: Arc<dyn CommandRunner>,
    env: EnvLookup,
}

impl RestoreOrchestrator {
    pub fn new(sites: SitesDir, backup_dir: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        let backup_dir = backup_dir.into();
        Self {
            sites,
            staging: BackupArtifactScanner::staging(&backup_dir),
            backup_dir,
            remote: None,
            runner,
            env: Arc::new(|name: &str| std::env::var(name).ok()),
        }
    }

    pub fn with_remote(mut self, remote: RemoteSource) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    /// Downloads the newest backup set of every tenant under the bucket prefix
    /// into `{backup_dir}/{slug}/{timestamp}/`. Returns the local paths written.
    #[instrument(skip(self))]
    pub async fn pull_remote(&self) -> Result<Vec<PathBuf>> {
        let Some(remote) = &self.remote else {
            return Err(WorkerError::Configuration(
                "no remote store configured to pull backups from".to_string(),
            ));
        };

        let mut latest: BTreeMap<String, Timestamp> = BTreeMap::new();
        let mut keys = Vec::new();
        for key in remote.store.list(&remote.bucket_prefix).await? {
            match RemoteBackupKey::parse(&remote.bucket_prefix, &key) {
                Ok(parsed) => {
                    latest
                        .entry(parsed.tenant_slug.clone())
                        .and_modify(|ts| {
                            if parsed.timestamp > *ts {
                                ts.clone_from(&parsed.timestamp);
                            }
                        })
                        .or_insert_with(|| parsed.timestamp.clone());
                    keys.push((key, parsed));
                }
                Err(e) => debug!("Skipping remote object {}: {}", key, e),
            }
        }

        let mut downloaded = Vec::new();
        for (key, parsed) in keys {
            if latest.get(&parsed.tenant_slug) != Some(&parsed.timestamp) {
                continue;
            }
            let local = self
                .backup_dir
                .join(&parsed.tenant_slug)
                .join(parsed.timestamp.as_str())
                .join(&parsed.filename);
            info!("Downloading {}", key);
            remote.store.get(&key, &local).await?;
            downloaded.push(local);
        }

        info!(
            "Pulled {} files for {} tenants",
            downloaded.len(),
            latest.len()
        );
        Ok(downloaded)
    }

    /// Restores one tenant from its newest backup set.
    #[instrument(skip(self))]
    pub async fn restore(&self, tenant_name: &str) -> Result<RestoreResult> {
        let set = self.locate(tenant_name).await?;
        info!("Restoring {} from backup {}", tenant_name, set.timestamp);

        let step = move |step: &'static str| {
            move |source: BoxError| WorkerError::RestoreStep {
                tenant: tenant_name.to_string(),
                step,
                source,
            }
        };

        let dump = set
            .database_dump
            .clone()
            .ok_or_else(|| step("locate_dump")("backup set has no database dump".into()))?;

        let existing = if self.sites.exists(tenant_name) {
            Some(self.sites.load_tenant(tenant_name)?)
        } else {
            None
        };
        let created = existing.is_none();
        let mut config = existing
            .as_ref()
            .map_or_else(|| credentials::generate(tenant_name), |t| t.config.clone());

        let backup_config = self.backup_config(tenant_name, &set)?;
        if let Some(backup) = &backup_config {
            propagate_connection(&mut config, backup);
        }

        // Root credentials are resolved before anything is written for the tenant.
        let mut common = self.sites.load_common_or_default()?;
        let before = common.clone();
        let db_type = config.db_type();
        let engine =
            DbEngines::select_with(db_type, &config, &mut common, |name| (self.env)(name))?;

        let mut tenant = match existing {
            Some(mut tenant) => {
                tenant.config = config;
                if backup_config.is_some() {
                    self.sites.save_tenant(&tenant)?;
                }
                tenant
            }
            None => {
                info!("{} does not exist, provisioning it", tenant_name);
                self.sites.provision(tenant_name, config)?
            }
        };
        if common != before {
            self.sites.save_common(&common)?;
        }

        let sql = archive::decompress_dump(&dump)
            .await
            .map_err(step("decompress_dump"))?;

        let loaded = engine
            .restore(self.runner.as_ref(), &sql, &tenant.config)
            .await;
        let cleanup = if sql == dump {
            Ok(())
        } else {
            tokio::fs::remove_file(&sql).await
        };
        if let Err(e) = cleanup {
            warn!("Cannot remove decompressed dump {}: {}", sql.display(), e);
        }
        loaded.map_err(|e| step(e.step)(e.source))?;

        if let Some(key) = backup_config.and_then(|b| b.encryption_key) {
            tenant.config.encryption_key = Some(key);
            self.sites.save_tenant(&tenant)?;
        }

        let mut restored_files = vec![ArtifactKind::Database];
        for (kind, step_name) in [
            (ArtifactKind::PrivateFiles, "restore_private_files"),
            (ArtifactKind::PublicFiles, "restore_public_files"),
        ] {
            if let Some(archive_path) = set.get(kind) {
                archive::extract_tar(archive_path, self.sites.root())
                    .await
                    .map_err(step(step_name))?;
                restored_files.push(kind);
            } else {
                warn!("Backup {} of {} has no {}", set.timestamp, tenant_name, kind);
            }
        }

        info!("Restored {}", tenant_name);
        Ok(RestoreResult {
            tenant: tenant.name,
            timestamp: set.timestamp,
            created,
            db_type,
            db_name: tenant.config.db_name,
            restored_files,
        })
    }

    /// Restores every tenant staged under the backup dir, one after another.
    /// A failing tenant does not stop the others.
    #[instrument(skip(self))]
    pub async fn restore_all(&self) -> Result<BatchReport> {
        let mut staged = self.staging.tenants()?;
        if staged.is_empty() && self.remote.is_some() {
            info!("No local backups in {}, pulling from remote", self.backup_dir.display());
            self.pull_remote().await?;
            staged = self.staging.tenants()?;
        }

        let mut report = BatchReport::default();
        for dir in staged {
            let site = self.sites.resolve_slug(&dir)?.unwrap_or(dir);
            match self.restore(&site).await {
                Ok(result) => report.restored.push(result),
                Err(e) => {
                    error!("Failed to restore {}: {}", site, e);
                    report.failed.push((site, e));
                }
            }
        }
        Ok(report)
    }

    async fn locate(&self, tenant: &str) -> Result<BackupSet> {
        if let Some(set) = self.staging.latest(tenant)? {
            return Ok(set);
        }
        if self.remote.is_some() {
            info!("No local backup for {}, pulling from remote", tenant);
            self.pull_remote().await?;
            if let Some(set) = self.staging.latest(tenant)? {
                return Ok(set);
            }
        }
        Err(WorkerError::NoBackup {
            tenant: tenant.to_string(),
        })
    }

    /// The set's config snapshot, else `{backup_dir}/{tenant}/site_config.json`.
    fn backup_config(&self, tenant: &str, set: &BackupSet) -> Result<Option<TenantConfig>> {
        let fallback = self.staging.tenant_dir(tenant).join(SITE_CONFIG_FILE);
        let path: Option<&Path> = set
            .config_backup
            .as_deref()
            .or_else(|| fallback.is_file().then_some(fallback.as_path()));
        path.map(read_json::<TenantConfig>).transpose()
    }
}

/// Copies connection settings from the backed-up config so a backup taken
/// against one database host restores against the one it names.
fn propagate_connection(target: &mut TenantConfig, backup: &TenantConfig) {
    if backup.db_type.is_some() {
        target.db_type = backup.db_type;
    }
    if backup.db_host.is_some() {
        target.db_host.clone_from(&backup.db_host);
    }
    if backup.db_port.is_some() {
        target.db_port = backup.db_port;
    }
}
