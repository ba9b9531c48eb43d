//! Decides when installed apps changed enough to migrate, and runs the
//! migration with the bench in maintenance mode.

use async_trait::async_trait;
use semver::Version;
use shared_types::AppVersionRecord;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::command::{ClientCommand, CommandRunner};
use crate::error::{BoxError, Result, WorkerError};
use crate::sites::SitesDir;
use crate::versions::{self, LiveApp, VersionProbe};

pub const DEFAULT_ROLLING_RELEASE_BRANCH: &str = "develop";

/// Why a migration is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationTrigger {
    CommitChanged {
        app: String,
        recorded: String,
        live: String,
    },
    VersionBumped {
        app: String,
        recorded: Version,
        live: Version,
    },
}

impl fmt::Display for MigrationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommitChanged {
                app,
                recorded,
                live,
            } => write!(f, "{app} moved from commit {recorded} to {live}"),
            Self::VersionBumped {
                app,
                recorded,
                live,
            } => write!(f, "{app} upgraded from {recorded} to {live}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigrationGate {
    rolling_branch: String,
}

impl Default for MigrationGate {
    fn default() -> Self {
        Self::new(DEFAULT_ROLLING_RELEASE_BRANCH)
    }
}

impl MigrationGate {
    pub fn new(rolling_branch: impl Into<String>) -> Self {
        Self {
            rolling_branch: rolling_branch.into(),
        }
    }

    pub fn should_migrate(&self, recorded: &AppVersionRecord, live: &[LiveApp]) -> bool {
        self.trigger(recorded, live).is_some()
    }

    /// The first app that requires a migration.
    ///
    /// Apps on the rolling-release branch are compared by commit only; all
    /// others by semantic version, where only an upgrade counts.
    pub fn trigger(&self, recorded: &AppVersionRecord, live: &[LiveApp]) -> Option<MigrationTrigger> {
        live.iter().find_map(|app| self.check_app(recorded, app))
    }

    fn check_app(&self, recorded: &AppVersionRecord, app: &LiveApp) -> Option<MigrationTrigger> {
        let previous = recorded.get(&app.name)?;

        if app.branch.as_deref() == Some(self.rolling_branch.as_str()) {
            let (Some(recorded_hash), Some(live_hash)) = (&previous.git_hash, &app.version.git_hash)
            else {
                return None;
            };
            return (recorded_hash != live_hash).then(|| MigrationTrigger::CommitChanged {
                app: app.name.clone(),
                recorded: recorded_hash.clone(),
                live: live_hash.clone(),
            });
        }

        let recorded_version = parse_version(&app.name, previous.semver.as_deref()?)?;
        let live_version = parse_version(&app.name, app.version.semver.as_deref()?)?;
        (live_version > recorded_version).then(|| MigrationTrigger::VersionBumped {
            app: app.name.clone(),
            recorded: recorded_version,
            live: live_version,
        })
    }
}

fn parse_version(app: &str, raw: &str) -> Option<Version> {
    match Version::parse(raw.trim()) {
        Ok(version) => Some(version),
        Err(e) => {
            warn!("Ignoring version '{}' of {}: {}", raw, app, e);
            None
        }
    }
}

/// Runs the framework's schema migration for one site.
#[async_trait]
pub trait MigrationHook: Send + Sync {
    async fn migrate(&self, site: &str) -> std::result::Result<(), BoxError>;
}

/// `bench --site {site} migrate`, run from the bench directory.
pub struct BenchMigrateHook {
    bench_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl BenchMigrateHook {
    pub fn new(bench_dir: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            bench_dir: bench_dir.into(),
            runner,
        }
    }
}

#[async_trait]
impl MigrationHook for BenchMigrateHook {
    async fn migrate(&self, site: &str) -> std::result::Result<(), BoxError> {
        let command = ClientCommand::new("bench")
            .args(["--site", site, "migrate"])
            .current_dir(&self.bench_dir);
        self.runner.run(&command).await
    }
}

/// Sites to migrate: a `:`-separated override, else every installed site.
pub fn sites_to_migrate(sites: &SitesDir, override_list: Option<&str>) -> Result<Vec<String>> {
    match override_list.map(str::trim).filter(|s| !s.is_empty()) {
        Some(list) => Ok(list
            .split(':')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        None => sites.list_sites(),
    }
}

/// Migrates `site_list` in order, stopping at the first failure.
///
/// With `maintenance` set the bench is put into maintenance mode first.
/// The maintenance and scheduler flags are cleared afterwards whatever
/// the outcome.
#[instrument(skip(sites, hook))]
pub async fn migrate_sites(
    sites: &SitesDir,
    site_list: &[String],
    hook: &dyn MigrationHook,
    maintenance: bool,
) -> Result<Vec<String>> {
    let mut common = sites.load_common()?;
    if maintenance {
        common.set_maintenance(true);
        sites.save_common(&common)?;
        info!("Maintenance mode enabled");
    }

    let mut migrated = Vec::new();
    let mut outcome = Ok(());
    for site in site_list {
        info!("Migrating {}", site);
        if let Err(source) = hook.migrate(site).await {
            outcome = Err(WorkerError::Migration {
                tenant: site.clone(),
                source,
            });
            break;
        }
        migrated.push(site.clone());
    }

    // Cleared on a freshly loaded config; migrations may have rewritten it.
    let reset = sites.load_common().and_then(|mut current| {
        current.set_maintenance(false);
        sites.save_common(&current)
    });
    match (outcome, reset) {
        (Ok(()), Ok(())) => {
            info!("Maintenance mode disabled");
            Ok(migrated)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(e), Err(reset_err)) => {
            error!("Could not clear maintenance mode: {}", reset_err);
            Err(e)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoMigrateOutcome {
    UpToDate,
    /// A migration was due but the bench is already in maintenance mode.
    SkippedMaintenance(MigrationTrigger),
    Migrated {
        trigger: MigrationTrigger,
        sites: Vec<String>,
    },
}

/// Compares live app versions with `app_versions.json` and migrates
/// `site_list` when an app changed.
///
/// The first run only seeds the record. The record is rewritten only after
/// a successful migration.
#[instrument(skip_all)]
pub async fn run_guarded_migration(
    sites: &SitesDir,
    site_list: &[String],
    probe: &dyn VersionProbe,
    hook: &dyn MigrationHook,
    gate: &MigrationGate,
) -> Result<AutoMigrateOutcome> {
    let apps = sites.apps()?;
    let live = probe
        .probe(&apps)
        .await
        .map_err(|source| WorkerError::Configuration(format!("cannot read app versions: {source}")))?;
    let live_record = versions::to_record(&live);

    let record_path = sites.app_versions_path();
    let recorded = match versions::load_record(&record_path) {
        Some(recorded) => recorded,
        None => {
            info!("Seeding {}", record_path.display());
            versions::save_record(&record_path, &live_record)?;
            live_record.clone()
        }
    };

    let Some(trigger) = gate.trigger(&recorded, &live) else {
        info!("Installed apps match {}, nothing to migrate", record_path.display());
        return Ok(AutoMigrateOutcome::UpToDate);
    };

    if sites.load_common()?.maintenance_mode {
        warn!("{}, but maintenance mode is already on; not migrating", trigger);
        return Ok(AutoMigrateOutcome::SkippedMaintenance(trigger));
    }

    info!("{}, migrating", trigger);
    let migrated = migrate_sites(sites, site_list, hook, true).await?;
    versions::save_record(&record_path, &live_record)?;

    Ok(AutoMigrateOutcome::Migrated {
        trigger,
        sites: migrated,
    })
}
