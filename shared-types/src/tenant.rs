use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    Mariadb,
    Postgres,
}

impl DbType {
    pub fn default_port(self) -> u16 {
        match self {
            Self::Mariadb => 3306,
            Self::Postgres => 5432,
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mariadb => f.write_str("mariadb"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Contents of a tenant's `site_config.json`.
///
/// Keys this crate does not know about are kept in `extra` so a rewrite
/// never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<DbType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(rename = "rds_db", default, skip_serializing_if = "is_false", with = "flag")]
    pub rds_restricted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TenantConfig {
    pub fn new(db_name: impl Into<String>, db_password: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            db_password: db_password.into(),
            ..Self::default()
        }
    }

    /// Backups taken before `db_type` existed are MariaDB backups.
    pub fn db_type(&self) -> DbType {
        self.db_type.unwrap_or_default()
    }
}

/// Bench-wide `common_site_config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<DbType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
    #[serde(default, with = "flag")]
    pub maintenance_mode: bool,
    #[serde(default, with = "flag")]
    pub pause_scheduler: bool,
    #[serde(rename = "rds_db", default, skip_serializing_if = "is_false", with = "flag")]
    pub rds_restricted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_cache: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_socketio: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommonConfig {
    pub fn db_type(&self) -> DbType {
        self.db_type.unwrap_or_default()
    }

    pub fn set_maintenance(&mut self, enabled: bool) {
        self.maintenance_mode = enabled;
        self.pause_scheduler = enabled;
    }
}

/// One site on the bench, loaded once per invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant {
    pub name: String,
    pub local_dir: PathBuf,
    pub config: TenantConfig,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

/// Integer 0/1 flags, also accepting JSON booleans written by hand.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
            Value::String(s) => matches!(s.trim(), "1" | "true"),
            _ => false,
        })
    }
}
