use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storage_backend::{
    bucket_prefix_from_env, ObjectStoreBackend, RemoteObjectStore, RetentionPolicy, StorageConfig,
};
use tracing::{info, warn};
use worker::{
    AutoMigrateOutcome, BenchMigrateHook, GitVersionProbe, MigrationGate, ProcessRunner,
    PushOptions, RemoteSource, RestoreOrchestrator, RetryPolicy, SitesDir,
};

use crate::{BenchArgs, PushArgs};

/// Command-line values shadow the environment variable of the same meaning.
fn env_with_overrides(
    overrides: HashMap<&'static str, String>,
) -> impl Fn(&str) -> Option<String> {
    move |name| {
        overrides
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }
}

pub async fn push_backup(bench: &BenchArgs, args: PushArgs) -> Result<()> {
    let overrides: HashMap<&'static str, String> = [
        ("BUCKET_NAME", args.bucket),
        ("REGION", args.region_name),
        ("ENDPOINT_URL", args.endpoint_url),
        ("ACCESS_KEY_ID", args.aws_access_key_id),
        ("SECRET_ACCESS_KEY", args.aws_secret_access_key),
    ]
    .into_iter()
    .filter_map(|(name, value)| value.map(|v| (name, v)))
    .collect();

    let config = StorageConfig::from_lookup(env_with_overrides(overrides))
        .context("Remote storage is not configured")?;
    let store = ObjectStoreBackend::from_config(config)?;

    let options = PushOptions {
        bucket_prefix: args
            .bucket_directory
            .unwrap_or_else(bucket_prefix_from_env),
        retention: RetentionPolicy::new(args.backup_limit),
        delete_local: args.delete_local,
    };

    let sites = SitesDir::new(&bench.sites_dir);
    let report = worker::push_backup(&sites, &args.site, &store, &options)
        .await
        .with_context(|| format!("push-backup failed for {}", args.site))?;

    info!(
        "Uploaded {} files of {} backup {}, pruned {}",
        report.uploaded.len(),
        report.site,
        report.timestamp,
        report.prune.deleted.len()
    );
    report.into_result()?;
    Ok(())
}

/// The remote is optional for restores: staged backups need no bucket.
fn remote_from_env() -> Option<RemoteSource> {
    let config = match StorageConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            warn!("No remote storage ({}); only staged backups can be restored", e);
            return None;
        }
    };
    match ObjectStoreBackend::from_config(config) {
        Ok(store) => {
            let store: Arc<dyn RemoteObjectStore> = Arc::new(store);
            Some(RemoteSource {
                store,
                bucket_prefix: bucket_prefix_from_env(),
            })
        }
        Err(e) => {
            warn!("Remote storage unusable: {}", e);
            None
        }
    }
}

pub async fn restore_backup(bench: &BenchArgs, site: Option<&str>) -> Result<()> {
    let sites = SitesDir::new(&bench.sites_dir);
    let mut orchestrator =
        RestoreOrchestrator::new(sites, bench.backup_dir(), Arc::new(ProcessRunner));
    if let Some(remote) = remote_from_env() {
        orchestrator = orchestrator.with_remote(remote);
    }

    if let Some(site) = site {
        let restored = orchestrator
            .restore(site)
            .await
            .with_context(|| format!("restore-backup failed for {site}"))?;
        info!(
            "Restored {} from {} into {} database {}",
            restored.tenant, restored.timestamp, restored.db_type, restored.db_name
        );
        return Ok(());
    }

    let report = orchestrator.restore_all().await?;
    for restored in &report.restored {
        info!("Restored {} from {}", restored.tenant, restored.timestamp);
    }
    for (tenant, e) in &report.failed {
        warn!("Restore of {} failed: {}", tenant, e);
    }
    if !report.is_success() {
        bail!(
            "{} of {} restores failed",
            report.failed.len(),
            report.failed.len() + report.restored.len()
        );
    }
    Ok(())
}

pub async fn auto_migrate(
    bench: &BenchArgs,
    rolling_release_branch: &str,
    site_override: Option<&str>,
) -> Result<()> {
    let sites = SitesDir::new(&bench.sites_dir);
    let site_list = worker::sites_to_migrate(&sites, site_override)?;
    let probe = GitVersionProbe::new(&bench.apps_dir);
    let hook = BenchMigrateHook::new(bench.sites_dir.join(".."), Arc::new(ProcessRunner));
    let gate = MigrationGate::new(rolling_release_branch);

    match worker::run_guarded_migration(&sites, &site_list, &probe, &hook, &gate).await? {
        AutoMigrateOutcome::UpToDate => info!("App versions unchanged"),
        AutoMigrateOutcome::SkippedMaintenance(trigger) => {
            warn!("{}; bench already in maintenance mode, not migrating", trigger);
        }
        AutoMigrateOutcome::Migrated { trigger, sites } => {
            info!("{}; migrated {}", trigger, sites.join(", "));
        }
    }
    Ok(())
}

pub async fn migrate(
    bench: &BenchArgs,
    maintenance_mode: bool,
    site_override: Option<&str>,
) -> Result<()> {
    let sites = SitesDir::new(&bench.sites_dir);
    let site_list = worker::sites_to_migrate(&sites, site_override)?;
    let hook = BenchMigrateHook::new(bench.sites_dir.join(".."), Arc::new(ProcessRunner));

    let migrated = worker::migrate_sites(&sites, &site_list, &hook, maintenance_mode).await?;
    info!("Migrated {}", migrated.join(", "));
    Ok(())
}

pub async fn check_connection(
    bench: &BenchArgs,
    attempts: u32,
    delay: u64,
    timeout: u64,
) -> Result<()> {
    let config = SitesDir::new(&bench.sites_dir)
        .load_common()
        .context("Cannot read common_site_config.json")?;
    let policy = RetryPolicy {
        attempts,
        delay: Duration::from_secs(delay),
        timeout: Duration::from_secs(timeout),
    };
    worker::check_services(&config, policy).await?;
    Ok(())
}

pub async fn doctor(bench: &BenchArgs) -> Result<()> {
    let config = SitesDir::new(&bench.sites_dir)
        .load_common()
        .context("Cannot read common_site_config.json")?;
    let results = worker::doctor(&config).await;
    let down: Vec<String> = results
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(service, _)| service.to_string())
        .collect();
    if !down.is_empty() {
        bail!("Unreachable: {}", down.join(", "));
    }
    info!("Bench Healthy!");
    Ok(())
}
