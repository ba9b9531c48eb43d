//! Backup, restore and migration operations for a multi-tenant bench.

pub mod archive;
pub mod command;
pub mod connection;
pub mod credentials;
pub mod db;
pub mod error;
pub mod migrate;
pub mod push;
pub mod restore;
pub mod scanner;
pub mod sites;
pub mod versions;

pub use command::{ClientCommand, CommandRunner, ProcessRunner};
pub use connection::{RetryPolicy, Service, check_services, doctor, wait_for_host};
pub use db::{DbEngines, DbRestoreEngine, MariaDbEngine, PostgresEngine};
pub use error::{Result, WorkerError};
pub use migrate::{
    AutoMigrateOutcome, BenchMigrateHook, MigrationGate, MigrationHook, migrate_sites,
    run_guarded_migration, sites_to_migrate,
};
pub use push::{PushOptions, PushReport, push_backup};
pub use restore::{BatchReport, EnvLookup, RemoteSource, RestoreOrchestrator, RestoreResult};
pub use scanner::{BackupArtifactScanner, BackupLayout};
pub use sites::SitesDir;
pub use versions::{GitVersionProbe, LiveApp, VersionProbe};
