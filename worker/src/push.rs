//! Ships a site's newest local backup to the remote store and prunes old ones.

use shared_types::{RemoteBackupKey, Timestamp, tenant_slug};
use std::fs;
use storage_backend::{PruneReport, RemoteObjectStore, RetentionPolicy};
use tracing::{info, instrument, warn};

use crate::error::{Result, WorkerError};
use crate::scanner::BackupArtifactScanner;
use crate::sites::SitesDir;

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub bucket_prefix: String,
    pub retention: RetentionPolicy,
    /// Remove the local files once every upload succeeded.
    pub delete_local: bool,
}

#[derive(Debug, Clone)]
pub struct PushReport {
    pub site: String,
    pub timestamp: Timestamp,
    pub uploaded: Vec<String>,
    pub prune: PruneReport,
}

impl PushReport {
    /// Fails when any pruning delete failed; the uploads themselves succeeded.
    pub fn into_result(self) -> Result<Self> {
        if self.prune.is_complete() {
            Ok(self)
        } else {
            Err(WorkerError::PruneIncomplete {
                failures: self.prune.failures,
            })
        }
    }
}

/// Uploads every file of the site's newest backup set to
/// `{bucket_prefix}/{slug}/{timestamp}/{filename}`, then prunes the tenant's
/// remote backups down to the retention limit.
#[instrument(skip(sites, store, options))]
pub async fn push_backup(
    sites: &SitesDir,
    site: &str,
    store: &dyn RemoteObjectStore,
    options: &PushOptions,
) -> Result<PushReport> {
    let scanner = BackupArtifactScanner::site_backups(sites.root());
    let set = scanner
        .latest(site)?
        .ok_or_else(|| WorkerError::NoBackup {
            tenant: site.to_string(),
        })?;

    let slug = tenant_slug(site);
    let mut uploaded = Vec::new();
    for (kind, path) in set.files() {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let key = RemoteBackupKey::new(
            options.bucket_prefix.as_str(),
            slug.as_str(),
            set.timestamp.clone(),
            file_name,
        )
        .to_key();
        info!("Uploading {} ({})", key, kind);
        store.put(&key, path).await?;
        uploaded.push(key);
    }

    if options.delete_local {
        for (_, path) in set.files() {
            if let Err(e) = fs::remove_file(path) {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }

    let prune = options
        .retention
        .prune(store, &options.bucket_prefix, &slug)
        .await?;
    info!(
        "Pushed backup {} of {}, deleted {} old objects",
        set.timestamp,
        site,
        prune.deleted.len()
    );

    Ok(PushReport {
        site: site.to_string(),
        timestamp: set.timestamp,
        uploaded,
        prune,
    })
}
