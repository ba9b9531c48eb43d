use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::naming::{ArtifactKind, Timestamp};

/// Files produced by one backup run of a tenant, joined by their timestamp.
///
/// Members are only ever added through [`BackupSet::insert`], which refuses
/// a file whose timestamp differs from the set's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSet {
    pub tenant: String,
    pub timestamp: Timestamp,
    pub database_dump: Option<PathBuf>,
    pub public_files: Option<PathBuf>,
    pub private_files: Option<PathBuf>,
    pub config_backup: Option<PathBuf>,
}

impl BackupSet {
    pub fn new(tenant: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            tenant: tenant.into(),
            timestamp,
            database_dump: None,
            public_files: None,
            private_files: None,
            config_backup: None,
        }
    }

    /// Adds a member. Returns `false` (and leaves the set untouched) when the
    /// timestamp does not match.
    pub fn insert(&mut self, timestamp: &Timestamp, kind: ArtifactKind, path: PathBuf) -> bool {
        if *timestamp != self.timestamp {
            return false;
        }
        *self.slot_mut(kind) = Some(path);
        true
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&Path> {
        match kind {
            ArtifactKind::Database => self.database_dump.as_deref(),
            ArtifactKind::PrivateFiles => self.private_files.as_deref(),
            ArtifactKind::PublicFiles => self.public_files.as_deref(),
            ArtifactKind::SiteConfig => self.config_backup.as_deref(),
        }
    }

    fn slot_mut(&mut self, kind: ArtifactKind) -> &mut Option<PathBuf> {
        match kind {
            ArtifactKind::Database => &mut self.database_dump,
            ArtifactKind::PrivateFiles => &mut self.private_files,
            ArtifactKind::PublicFiles => &mut self.public_files,
            ArtifactKind::SiteConfig => &mut self.config_backup,
        }
    }

    /// Present members in upload order.
    pub fn files(&self) -> Vec<(ArtifactKind, &Path)> {
        ArtifactKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|path| (kind, path)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files().is_empty()
    }
}

/// Maximum number of distinct backup timestamps kept per tenant remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionLimit(NonZeroUsize);

impl RetentionLimit {
    pub const DEFAULT: RetentionLimit = RetentionLimit(NonZeroUsize::MIN.saturating_add(2));

    pub fn new(limit: usize) -> Option<Self> {
        NonZeroUsize::new(limit).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for RetentionLimit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for RetentionLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RetentionLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: usize = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid retention limit: {s}"))?;
        Self::new(n).ok_or_else(|| "retention limit must be at least 1".to_string())
    }
}
