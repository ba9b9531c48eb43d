//! Discovers a tenant's local backup files and groups them into [`BackupSet`]s.

use shared_types::{ArtifactName, BackupSet, Timestamp, tenant_slug};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, WorkerError};

/// Where a tenant's backup files live.
#[derive(Debug, Clone)]
pub enum BackupLayout {
    /// `{sites_dir}/{tenant}/private/backups/{files}`, written by the framework's backup job.
    SiteBackups { sites_dir: PathBuf },
    /// `{backup_dir}/{tenant}/{timestamp}/{files}`, used for restores and remote pulls.
    Staging { backup_dir: PathBuf },
}

#[derive(Debug, Clone)]
pub struct BackupArtifactScanner {
    layout: BackupLayout,
}

impl BackupArtifactScanner {
    pub fn new(layout: BackupLayout) -> Self {
        Self { layout }
    }

    pub fn site_backups(sites_dir: impl Into<PathBuf>) -> Self {
        Self::new(BackupLayout::SiteBackups {
            sites_dir: sites_dir.into(),
        })
    }

    pub fn staging(backup_dir: impl Into<PathBuf>) -> Self {
        Self::new(BackupLayout::Staging {
            backup_dir: backup_dir.into(),
        })
    }

    pub fn tenant_dir(&self, tenant: &str) -> PathBuf {
        match &self.layout {
            BackupLayout::SiteBackups { sites_dir } => {
                sites_dir.join(tenant).join("private").join("backups")
            }
            // Remote pulls land under the slug.
            BackupLayout::Staging { backup_dir } => {
                let direct = backup_dir.join(tenant);
                if direct.is_dir() {
                    direct
                } else {
                    backup_dir.join(tenant_slug(tenant))
                }
            }
        }
    }

    /// Tenant directories present in a staging area. Empty for site backups.
    pub fn tenants(&self) -> Result<Vec<String>> {
        let BackupLayout::Staging { backup_dir } = &self.layout else {
            return Ok(Vec::new());
        };
        if !backup_dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(backup_dir).map_err(|e| WorkerError::io(backup_dir, e))?;
        let mut tenants = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WorkerError::io(backup_dir, e))?;
            if entry.path().is_dir() {
                tenants.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tenants.sort();
        Ok(tenants)
    }

    /// All backup sets of `tenant`, oldest first.
    ///
    /// Files are matched on the tenant's slug and grouped strictly by the
    /// timestamp embedded in their name. Files that do not parse are skipped.
    pub fn scan(&self, tenant: &str) -> Result<Vec<BackupSet>> {
        let dir = self.tenant_dir(tenant);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let slug = tenant_slug(tenant);
        let mut sets: BTreeMap<Timestamp, BackupSet> = BTreeMap::new();

        for entry in WalkDir::new(&dir).min_depth(1).max_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| dir.clone(), Path::to_path_buf);
                WorkerError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            let artifact = match ArtifactName::parse(&file_name) {
                Ok(artifact) => artifact,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            if artifact.tenant_slug != slug {
                debug!("Skipping {}: belongs to {}", file_name, artifact.tenant_slug);
                continue;
            }

            sets.entry(artifact.timestamp.clone())
                .or_insert_with(|| BackupSet::new(tenant, artifact.timestamp.clone()))
                .insert(&artifact.timestamp, artifact.kind, entry.path().to_path_buf());
        }

        Ok(sets.into_values().collect())
    }

    /// The chronologically newest backup set, if any.
    pub fn latest(&self, tenant: &str) -> Result<Option<BackupSet>> {
        Ok(self.scan(tenant)?.pop())
    }
}
