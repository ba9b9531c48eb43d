use shared_types::{DbType, TenantConfig};
use std::path::Path;

use super::{
    DbError, DbRestoreEngine, DbTarget, RestoreStatement, RootCredentials, checked_identifier,
    quote_literal,
};
use crate::command::ClientCommand;

/// Managed MariaDB/MySQL services reject `GRANT ALL PRIVILEGES`.
pub const RDS_PRIVILEGES: &str = "SELECT, INSERT, UPDATE, DELETE, CREATE, DROP, INDEX, ALTER, \
CREATE TEMPORARY TABLES, CREATE VIEW, EVENT, TRIGGER, SHOW VIEW, CREATE ROUTINE, ALTER ROUTINE, \
EXECUTE, LOCK TABLES";

#[derive(Debug, Clone)]
pub struct MariaDbEngine {
    target: DbTarget,
    root: RootCredentials,
    restricted: bool,
}

impl MariaDbEngine {
    pub fn new(target: DbTarget, root: RootCredentials, restricted: bool) -> Self {
        Self {
            target,
            root,
            restricted,
        }
    }

    fn client(&self) -> ClientCommand {
        ClientCommand::new("mysql")
            .arg(format!("-u{}", self.root.user))
            .arg(format!("-h{}", self.target.host))
            .arg(format!("-P{}", self.target.port))
            .env("MYSQL_PWD", &self.root.password)
    }

    fn statement(&self, step: &'static str, sql: String) -> RestoreStatement {
        RestoreStatement::new(step, self.client().arg("-e").arg(sql))
    }

    fn privileges(&self, config: &TenantConfig) -> &'static str {
        if self.restricted || config.rds_restricted {
            RDS_PRIVILEGES
        } else {
            "ALL PRIVILEGES"
        }
    }
}

#[async_trait::async_trait]
impl DbRestoreEngine for MariaDbEngine {
    fn db_type(&self) -> DbType {
        DbType::Mariadb
    }

    fn prepare(&self, config: &TenantConfig) -> Result<Vec<RestoreStatement>, DbError> {
        let db = checked_identifier(&config.db_name)?;
        let password = quote_literal(&config.db_password, true);

        Ok(vec![
            self.statement("drop_database", format!("DROP DATABASE IF EXISTS `{db}`;")),
            self.statement(
                "create_database",
                format!("CREATE DATABASE IF NOT EXISTS `{db}`;"),
            ),
            self.statement(
                "create_user",
                format!(
                    "CREATE USER IF NOT EXISTS '{db}'@'%' IDENTIFIED BY {password}; FLUSH PRIVILEGES;"
                ),
            ),
            self.statement(
                "grant_privileges",
                format!(
                    "GRANT {} ON `{db}`.* TO '{db}'@'%' IDENTIFIED BY {password}; FLUSH PRIVILEGES;",
                    self.privileges(config)
                ),
            ),
        ])
    }

    fn load_dump(&self, config: &TenantConfig, dump: &Path) -> Result<RestoreStatement, DbError> {
        let db = checked_identifier(&config.db_name)?;
        Ok(RestoreStatement::new(
            "load_dump",
            self.client().arg(db).stdin(dump),
        ))
    }
}
