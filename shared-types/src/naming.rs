//! Naming scheme shared by local backup files and remote object keys.
//!
//! A backup artifact is always named `{timestamp}-{tenant_slug}{suffix}` and
//! stored remotely under `{bucket_prefix}/{tenant_slug}/{timestamp}/`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Format of every backup timestamp. Fixed width, so string order is time order.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const TIMESTAMP_LEN: usize = 15;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactParseError {
    #[error("invalid backup timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unrecognised backup artifact name: {0}")]
    UnknownArtifact(String),

    #[error("malformed remote backup key: {0}")]
    MalformedKey(String),
}

/// Timestamp of one backup run, e.g. `20240131_235959`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(String);

impl Timestamp {
    pub fn parse(raw: &str) -> Result<Self, ArtifactParseError> {
        if raw.len() != TIMESTAMP_LEN {
            return Err(ArtifactParseError::InvalidTimestamp(raw.to_string()));
        }
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .map_err(|_| ArtifactParseError::InvalidTimestamp(raw.to_string()))?;
        Ok(Self(raw.to_string()))
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self(datetime.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn now() -> Self {
        Self::from_datetime(chrono::Utc::now().naive_utc())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = ArtifactParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

/// The four members of a backup set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Database,
    PrivateFiles,
    PublicFiles,
    SiteConfig,
}

impl ArtifactKind {
    /// Matching order matters: `-private-files.tar` also ends with `-files.tar`.
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Database,
        ArtifactKind::PrivateFiles,
        ArtifactKind::PublicFiles,
        ArtifactKind::SiteConfig,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::Database => "-database.sql.gz",
            Self::PrivateFiles => "-private-files.tar",
            Self::PublicFiles => "-files.tar",
            Self::SiteConfig => "-site_config_backup.json",
        }
    }

    fn split_suffix(rest: &str) -> Option<(&str, Self)> {
        Self::ALL
            .into_iter()
            .find_map(|kind| rest.strip_suffix(kind.suffix()).map(|head| (head, kind)))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Database => "database",
            Self::PrivateFiles => "private files",
            Self::PublicFiles => "public files",
            Self::SiteConfig => "site config",
        };
        f.write_str(name)
    }
}

/// Slug used in file names and remote keys: `site1.example.com` -> `site1_example_com`.
pub fn tenant_slug(tenant: &str) -> String {
    tenant.replace('.', "_")
}

/// A parsed backup file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    pub timestamp: Timestamp,
    pub tenant_slug: String,
    pub kind: ArtifactKind,
}

impl ArtifactName {
    pub fn new(timestamp: Timestamp, tenant_slug: impl Into<String>, kind: ArtifactKind) -> Self {
        Self {
            timestamp,
            tenant_slug: tenant_slug.into(),
            kind,
        }
    }

    pub fn parse(file_name: &str) -> Result<Self, ArtifactParseError> {
        let unknown = || ArtifactParseError::UnknownArtifact(file_name.to_string());

        let ts = file_name.get(..TIMESTAMP_LEN).ok_or_else(unknown)?;
        let timestamp = Timestamp::parse(ts)?;
        let rest = file_name[TIMESTAMP_LEN..]
            .strip_prefix('-')
            .ok_or_else(unknown)?;
        let (tenant_slug, kind) = ArtifactKind::split_suffix(rest).ok_or_else(unknown)?;
        if tenant_slug.is_empty() {
            return Err(unknown());
        }

        Ok(Self::new(timestamp, tenant_slug, kind))
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}-{}{}",
            self.timestamp,
            self.tenant_slug,
            self.kind.suffix()
        )
    }
}

/// Identity of one uploaded backup file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteBackupKey {
    pub bucket_prefix: String,
    pub tenant_slug: String,
    pub timestamp: Timestamp,
    pub filename: String,
}

impl RemoteBackupKey {
    pub fn new(
        bucket_prefix: impl Into<String>,
        tenant_slug: impl Into<String>,
        timestamp: Timestamp,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            bucket_prefix: normalize_prefix(&bucket_prefix.into()),
            tenant_slug: tenant_slug.into(),
            timestamp,
            filename: filename.into(),
        }
    }

    pub fn for_artifact(bucket_prefix: &str, artifact: &ArtifactName) -> Self {
        Self::new(
            bucket_prefix,
            artifact.tenant_slug.clone(),
            artifact.timestamp.clone(),
            artifact.file_name(),
        )
    }

    /// Parses `{bucket_prefix}/{tenant_slug}/{timestamp}/{filename}`.
    pub fn parse(bucket_prefix: &str, key: &str) -> Result<Self, ArtifactParseError> {
        let malformed = || ArtifactParseError::MalformedKey(key.to_string());
        let prefix = normalize_prefix(bucket_prefix);

        let relative = if prefix.is_empty() {
            key
        } else {
            key.strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .ok_or_else(malformed)?
        };

        let parts: Vec<&str> = relative.split('/').collect();
        let [slug, ts, filename] = parts.as_slice() else {
            return Err(malformed());
        };
        if slug.is_empty() || filename.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            bucket_prefix: prefix,
            tenant_slug: (*slug).to_string(),
            timestamp: Timestamp::parse(ts)?,
            filename: (*filename).to_string(),
        })
    }

    pub fn to_key(&self) -> String {
        format!(
            "{}/{}/{}",
            tenant_prefix(&self.bucket_prefix, &self.tenant_slug),
            self.timestamp,
            self.filename
        )
    }
}

impl fmt::Display for RemoteBackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// Prefix under which every backup of one tenant lives.
pub fn tenant_prefix(bucket_prefix: &str, tenant_slug: &str) -> String {
    let prefix = normalize_prefix(bucket_prefix);
    if prefix.is_empty() {
        tenant_slug.to_string()
    } else {
        format!("{prefix}/{tenant_slug}")
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> Timestamp {
        Timestamp::parse(raw).unwrap()
    }

    #[test]
    fn test_timestamp_rejects_malformed() {
        assert!(Timestamp::parse("20240101_120000").is_ok());
        assert!(Timestamp::parse("2024-01-01").is_err());
        assert!(Timestamp::parse("20241301_120000").is_err());
        assert!(Timestamp::parse("20240101-120000").is_err());
    }

    #[test]
    fn test_timestamp_order_is_chronological() {
        assert!(ts("20231231_235959") < ts("20240101_000000"));
        assert!(ts("20240101_090000") < ts("20240101_100000"));
    }

    #[test]
    fn test_slug_replaces_dots() {
        assert_eq!(tenant_slug("site1.example.com"), "site1_example_com");
        assert_eq!(tenant_slug("acme"), "acme");
    }

    #[test]
    fn test_parse_each_kind() {
        let cases = [
            ("20240101_120000-acme-database.sql.gz", ArtifactKind::Database),
            ("20240101_120000-acme-private-files.tar", ArtifactKind::PrivateFiles),
            ("20240101_120000-acme-files.tar", ArtifactKind::PublicFiles),
            ("20240101_120000-acme-site_config_backup.json", ArtifactKind::SiteConfig),
        ];

        for (name, kind) in cases {
            let parsed = ArtifactName::parse(name).unwrap();
            assert_eq!(parsed.kind, kind, "{name}");
            assert_eq!(parsed.tenant_slug, "acme");
            assert_eq!(parsed.file_name(), name);
        }
    }

    #[test]
    fn test_parse_slug_with_hyphens() {
        let parsed = ArtifactName::parse("20240101_120000-new-tenant-private-files.tar").unwrap();
        assert_eq!(parsed.tenant_slug, "new-tenant");
        assert_eq!(parsed.kind, ArtifactKind::PrivateFiles);
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert!(ArtifactName::parse("notes.txt").is_err());
        assert!(ArtifactName::parse("20240101_120000-acme.zip").is_err());
        assert!(ArtifactName::parse("garbage_000000-acme-files.tar").is_err());
        assert!(ArtifactName::parse("20240101_120000--files.tar").is_err());
    }

    #[test]
    fn test_remote_key_layout() {
        let artifact = ArtifactName::new(ts("20240101_120000"), "site1_local", ArtifactKind::Database);
        let key = RemoteBackupKey::for_artifact("backups/", &artifact);
        assert_eq!(
            key.to_key(),
            "backups/site1_local/20240101_120000/20240101_120000-site1_local-database.sql.gz"
        );

        let parsed = RemoteBackupKey::parse("backups", &key.to_key()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_remote_key_without_prefix() {
        let parsed = RemoteBackupKey::parse("", "acme/20240101_120000/file.tar").unwrap();
        assert_eq!(parsed.tenant_slug, "acme");
        assert_eq!(parsed.to_key(), "acme/20240101_120000/file.tar");
    }

    #[test]
    fn test_remote_key_rejects_wrong_shape() {
        assert!(RemoteBackupKey::parse("backups", "backups/acme/file.tar").is_err());
        assert!(RemoteBackupKey::parse("backups", "other/acme/20240101_120000/f").is_err());
        assert!(RemoteBackupKey::parse("backups", "backups/acme/latest/f").is_err());
        assert!(RemoteBackupKey::parse("backups", "backups/acme/20240101_120000/a/b").is_err());
    }
}
