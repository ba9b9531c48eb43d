use shared_types::{DbType, TenantConfig};
use std::path::Path;

use super::{
    DbError, DbRestoreEngine, DbTarget, RestoreStatement, RootCredentials, checked_identifier,
    quote_literal,
};
use crate::command::ClientCommand;

#[derive(Debug, Clone)]
pub struct PostgresEngine {
    target: DbTarget,
    root: RootCredentials,
}

impl PostgresEngine {
    pub fn new(target: DbTarget, root: RootCredentials) -> Self {
        Self { target, root }
    }

    /// Connection URI without the password; it travels in `PGPASSWORD`.
    fn uri(&self, database: Option<&str>) -> String {
        let base = format!(
            "postgres://{}@{}:{}",
            self.root.user, self.target.host, self.target.port
        );
        match database {
            Some(db) => format!("{base}/{db}"),
            None => base,
        }
    }

    /// `psql` exits non-zero on the first failing statement of a script.
    fn client(&self, database: Option<&str>) -> ClientCommand {
        ClientCommand::new("psql")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg(self.uri(database))
            .env("PGPASSWORD", &self.root.password)
    }

    fn statement(&self, step: &'static str, sql: String) -> RestoreStatement {
        RestoreStatement::new(step, self.client(None).arg("-c").arg(sql))
    }
}

#[async_trait::async_trait]
impl DbRestoreEngine for PostgresEngine {
    fn db_type(&self) -> DbType {
        DbType::Postgres
    }

    fn prepare(&self, config: &TenantConfig) -> Result<Vec<RestoreStatement>, DbError> {
        let db = checked_identifier(&config.db_name)?;
        let password = quote_literal(&config.db_password, false);

        Ok(vec![
            self.statement("drop_database", format!("DROP DATABASE IF EXISTS \"{db}\"")),
            self.statement("drop_user", format!("DROP USER IF EXISTS \"{db}\"")),
            self.statement("create_database", format!("CREATE DATABASE \"{db}\"")),
            self.statement(
                "create_user",
                format!("CREATE USER \"{db}\" PASSWORD {password}"),
            ),
            self.statement(
                "grant_privileges",
                format!("GRANT ALL PRIVILEGES ON DATABASE \"{db}\" TO \"{db}\""),
            ),
        ])
    }

    fn load_dump(&self, config: &TenantConfig, dump: &Path) -> Result<RestoreStatement, DbError> {
        let db = checked_identifier(&config.db_name)?;
        Ok(RestoreStatement::new(
            "load_dump",
            self.client(Some(db)).stdin(dump),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn engine() -> PostgresEngine {
        PostgresEngine::new(
            DbTarget {
                host: "pg".into(),
                port: 5432,
            },
            RootCredentials {
                user: "postgres".into(),
                password: "admin".into(),
            },
        )
    }

    #[test]
    fn test_statement_order() {
        let config = TenantConfig::new("_abc", "o'brien");
        let statements = engine().prepare(&config).unwrap();
        let sql: Vec<_> = statements
            .iter()
            .map(|s| s.command.statement().unwrap())
            .collect();
        assert_eq!(
            sql,
            [
                "DROP DATABASE IF EXISTS \"_abc\"",
                "DROP USER IF EXISTS \"_abc\"",
                "CREATE DATABASE \"_abc\"",
                "CREATE USER \"_abc\" PASSWORD 'o''brien'",
                "GRANT ALL PRIVILEGES ON DATABASE \"_abc\" TO \"_abc\"",
            ]
        );
        assert_eq!(statements[0].command.args[2], "postgres://postgres@pg:5432");
    }

    #[test]
    fn test_load_targets_tenant_database() {
        let config = TenantConfig::new("_abc", "pw");
        let load = engine()
            .load_dump(&config, Path::new("/tmp/dump.sql"))
            .unwrap();
        assert_eq!(
            load.command.args,
            ["-v", "ON_ERROR_STOP=1", "postgres://postgres@pg:5432/_abc"]
        );
        assert_eq!(load.command.env, [("PGPASSWORD".to_string(), "admin".to_string())]);
        assert!(load.command.stdin.is_some());
    }

    #[test]
    fn test_failing_statement_in_dump_fails_the_load() {
        let config = TenantConfig::new("_abc", "pw");
        let load = engine()
            .load_dump(&config, Path::new("/tmp/dump.sql"))
            .unwrap();
        let stop = load.command.args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(load.command.args[stop + 1], "ON_ERROR_STOP=1");
    }
}
