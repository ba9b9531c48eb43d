//! Database restore engines.
//!
//! The step sequence (drop, create, create user, grant, load) is run once by
//! [`DbRestoreEngine::restore`]; each backend only supplies its statements.

mod mariadb;
mod postgres;

pub use mariadb::{MariaDbEngine, RDS_PRIVILEGES};
pub use postgres::PostgresEngine;

use async_trait::async_trait;
use shared_types::{CommonConfig, DbType, TenantConfig};
use std::fmt;
use std::path::Path;
use storage_backend::get_secret_with;
use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandRunner, ClientCommand};
use crate::error::{BoxError, Result, WorkerError};

pub const DEFAULT_MARIADB_HOST: &str = "mariadb";
pub const DEFAULT_POSTGRES_HOST: &str = "postgresql";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Refusing to use '{0}' as a database identifier")]
    InvalidIdentifier(String),
}

/// Host and port a tenant's database lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTarget {
    pub host: String,
    pub port: u16,
}

impl DbTarget {
    /// Tenant config first, then the bench-wide config, then the backend default.
    pub fn resolve(db_type: DbType, tenant: &TenantConfig, common: &CommonConfig) -> Self {
        let default_host = match db_type {
            DbType::Mariadb => DEFAULT_MARIADB_HOST,
            DbType::Postgres => DEFAULT_POSTGRES_HOST,
        };
        Self {
            host: tenant
                .db_host
                .clone()
                .or_else(|| common.db_host.clone())
                .unwrap_or_else(|| default_host.to_string()),
            port: tenant
                .db_port
                .or(common.db_port)
                .unwrap_or_else(|| db_type.default_port()),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RootCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for RootCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootCredentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// One named statement of a restore.
#[derive(Debug, Clone)]
pub struct RestoreStatement {
    pub step: &'static str,
    pub command: ClientCommand,
}

impl RestoreStatement {
    pub fn new(step: &'static str, command: ClientCommand) -> Self {
        Self { step, command }
    }
}

/// A failed restore statement.
#[derive(Debug, Error)]
#[error("{step}: {source}")]
pub struct StepError {
    pub step: &'static str,
    #[source]
    pub source: BoxError,
}

#[async_trait]
pub trait DbRestoreEngine: Send + Sync {
    fn db_type(&self) -> DbType;

    /// Statements that leave an empty database owned by the tenant user.
    fn prepare(&self, config: &TenantConfig) -> std::result::Result<Vec<RestoreStatement>, DbError>;

    /// Loads the decompressed dump into the tenant database.
    fn load_dump(
        &self,
        config: &TenantConfig,
        dump: &Path,
    ) -> std::result::Result<RestoreStatement, DbError>;

    /// Runs every statement in order, stopping at the first failure.
    async fn restore(
        &self,
        runner: &dyn CommandRunner,
        dump: &Path,
        config: &TenantConfig,
    ) -> std::result::Result<(), StepError> {
        let invalid = |e: DbError| StepError {
            step: "prepare",
            source: Box::new(e),
        };
        let mut statements = self.prepare(config).map_err(invalid)?;
        statements.push(self.load_dump(config, dump).map_err(invalid)?);

        info!("Restoring {} database {}", self.db_type(), config.db_name);
        for statement in statements {
            debug!("Running step {}", statement.step);
            runner
                .run(&statement.command)
                .await
                .map_err(|source| StepError {
                    step: statement.step,
                    source,
                })?;
        }
        Ok(())
    }
}

/// Builds the engine for a backend, resolving root credentials on the way.
#[derive(Debug, Default, Clone, Copy)]
pub struct DbEngines;

impl DbEngines {
    /// Reads credentials from the process environment.
    pub fn select(
        db_type: DbType,
        tenant: &TenantConfig,
        common: &mut CommonConfig,
    ) -> Result<Box<dyn DbRestoreEngine>> {
        Self::select_with(db_type, tenant, common, |name| std::env::var(name).ok())
    }

    /// PostgreSQL root credentials found in the environment are written into
    /// `common` so later runs reuse them; the caller persists it.
    pub fn select_with<F>(
        db_type: DbType,
        tenant: &TenantConfig,
        common: &mut CommonConfig,
        lookup: F,
    ) -> Result<Box<dyn DbRestoreEngine>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let target = DbTarget::resolve(db_type, tenant, common);
        match db_type {
            DbType::Mariadb => {
                let password = get_secret_with("MYSQL_ROOT_PASSWORD", &lookup)?
                    .ok_or_else(|| WorkerError::missing_variable("MYSQL_ROOT_PASSWORD"))?;
                let user = lookup("DB_ROOT_USER")
                    .filter(|u| !u.is_empty())
                    .unwrap_or_else(|| "root".to_string());
                let restricted = common.rds_restricted || tenant.rds_restricted;
                Ok(Box::new(MariaDbEngine::new(
                    target,
                    RootCredentials { user, password },
                    restricted,
                )))
            }
            DbType::Postgres => {
                let user = match common.root_login.clone() {
                    Some(user) => user,
                    None => {
                        let user = lookup("DB_ROOT_USER")
                            .filter(|u| !u.is_empty())
                            .ok_or_else(|| WorkerError::missing_variable("DB_ROOT_USER"))?;
                        common.root_login = Some(user.clone());
                        user
                    }
                };
                let password = match common.root_password.clone() {
                    Some(password) => password,
                    None => {
                        let password = get_secret_with("POSTGRES_PASSWORD", &lookup)?
                            .ok_or_else(|| WorkerError::missing_variable("POSTGRES_PASSWORD"))?;
                        common.root_password = Some(password.clone());
                        password
                    }
                };
                Ok(Box::new(PostgresEngine::new(
                    target,
                    RootCredentials { user, password },
                )))
            }
        }
    }
}

/// Generated names are `_` plus hex; anything outside `[A-Za-z0-9_]` is rejected
/// because the name is spliced into statements unquoted in places.
pub(crate) fn checked_identifier(name: &str) -> std::result::Result<&str, DbError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

/// Single-quoted SQL string literal.
pub(crate) fn quote_literal(value: &str, escape_backslash: bool) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' if escape_backslash => quoted.push_str("\\\\"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&'static str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, (*v).to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_target_prefers_tenant_then_common() {
        let mut tenant = TenantConfig::new("_a", "pw");
        let mut common = CommonConfig::default();
        assert_eq!(
            DbTarget::resolve(DbType::Mariadb, &tenant, &common),
            DbTarget {
                host: "mariadb".into(),
                port: 3306
            }
        );

        common.db_host = Some("db.internal".into());
        common.db_port = Some(3307);
        assert_eq!(DbTarget::resolve(DbType::Mariadb, &tenant, &common).host, "db.internal");

        tenant.db_host = Some("restored-host".into());
        tenant.db_port = Some(13306);
        let target = DbTarget::resolve(DbType::Mariadb, &tenant, &common);
        assert_eq!(target.host, "restored-host");
        assert_eq!(target.port, 13306);
    }

    #[test]
    fn test_mariadb_requires_root_password() {
        let tenant = TenantConfig::new("_a", "pw");
        let mut common = CommonConfig::default();
        let err = DbEngines::select_with(DbType::Mariadb, &tenant, &mut common, env(&[]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("MYSQL_ROOT_PASSWORD"));

        let engine = DbEngines::select_with(
            DbType::Mariadb,
            &tenant,
            &mut common,
            env(&[("MYSQL_ROOT_PASSWORD", "admin")]),
        )
        .unwrap();
        assert_eq!(engine.db_type(), DbType::Mariadb);
    }

    #[test]
    fn test_postgres_persists_root_credentials() {
        let tenant = TenantConfig::new("_a", "pw");
        let mut common = CommonConfig::default();
        DbEngines::select_with(
            DbType::Postgres,
            &tenant,
            &mut common,
            env(&[("DB_ROOT_USER", "postgres"), ("POSTGRES_PASSWORD", "admin")]),
        )
        .unwrap();
        assert_eq!(common.root_login.as_deref(), Some("postgres"));
        assert_eq!(common.root_password.as_deref(), Some("admin"));

        // Second run needs nothing from the environment.
        let engine =
            DbEngines::select_with(DbType::Postgres, &tenant, &mut common, env(&[])).unwrap();
        assert_eq!(engine.db_type(), DbType::Postgres);
    }

    #[test]
    fn test_postgres_missing_user_is_configuration_error() {
        let tenant = TenantConfig::new("_a", "pw");
        let mut common = CommonConfig::default();
        let err = DbEngines::select_with(
            DbType::Postgres,
            &tenant,
            &mut common,
            env(&[("POSTGRES_PASSWORD", "admin")]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, WorkerError::Configuration(msg) if msg.contains("DB_ROOT_USER")));
    }

    #[test]
    fn test_identifier_and_literal_quoting() {
        assert!(checked_identifier("_1bd8e2a7c0f94d35").is_ok());
        assert!(checked_identifier("x`; DROP DATABASE y").is_err());
        assert!(checked_identifier("").is_err());

        assert_eq!(quote_literal("it's", false), "'it''s'");
        assert_eq!(quote_literal(r"a\b", true), r"'a\\b'");
        assert_eq!(quote_literal(r"a\b", false), r"'a\b'");
    }
}
