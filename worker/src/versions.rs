//! Installed application versions: what is running now and what was
//! recorded at the last migration.

use async_trait::async_trait;
use git2::Repository;
use regex::Regex;
use shared_types::{AppVersion, AppVersionRecord};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::{BoxError, Result};
use crate::sites::{read_json, write_json};

/// One installed app as currently checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveApp {
    pub name: String,
    /// Checked-out branch, `None` on a detached head or without a repository.
    pub branch: Option<String>,
    pub version: AppVersion,
}

#[async_trait]
pub trait VersionProbe: Send + Sync {
    /// Versions of `apps`, in the same order. Unknown parts are left empty.
    async fn probe(&self, apps: &[String]) -> std::result::Result<Vec<LiveApp>, BoxError>;
}

/// Reads each app's git checkout under `apps_dir` and its `__version__`
/// from `{app}/{app}/__init__.py`.
#[derive(Debug, Clone)]
pub struct GitVersionProbe {
    apps_dir: PathBuf,
}

impl GitVersionProbe {
    pub fn new(apps_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
        }
    }

    fn inspect(apps_dir: &Path, app: &str) -> LiveApp {
        let path = apps_dir.join(app);
        let mut live = LiveApp {
            name: app.to_string(),
            branch: None,
            version: AppVersion {
                semver: read_module_version(&path.join(app).join("__init__.py")),
                git_hash: None,
            },
        };

        match Repository::open(&path) {
            Ok(repo) => match repo.head() {
                Ok(head) => {
                    if head.is_branch() {
                        live.branch = head.shorthand().map(String::from);
                    }
                    live.version.git_hash = head.peel_to_commit().ok().map(|c| c.id().to_string());
                }
                Err(e) => debug!("{} has no readable HEAD: {}", app, e),
            },
            Err(e) => debug!("{} is not a git checkout: {}", app, e),
        }
        live
    }
}

#[async_trait]
impl VersionProbe for GitVersionProbe {
    async fn probe(&self, apps: &[String]) -> std::result::Result<Vec<LiveApp>, BoxError> {
        let apps_dir = self.apps_dir.clone();
        let apps = apps.to_vec();
        let live = tokio::task::spawn_blocking(move || {
            apps.iter()
                .map(|app| Self::inspect(&apps_dir, app))
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(live)
    }
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(?m)^__version__\s*=\s*["']([^"']+)["']"#).ok())
        .as_ref()
}

fn read_module_version(path: &Path) -> Option<String> {
    let source = fs::read_to_string(path).ok()?;
    version_pattern()?
        .captures(&source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// The versions as a record, ready to persist.
pub fn to_record(live: &[LiveApp]) -> AppVersionRecord {
    let mut record = AppVersionRecord::new();
    for app in live {
        if app.version.semver.is_some() || app.version.git_hash.is_some() {
            record.insert(app.name.clone(), app.version.clone());
        }
    }
    record
}

/// `None` when the file is missing or unreadable, in which case the caller
/// seeds a new one.
pub fn load_record(path: &Path) -> Option<AppVersionRecord> {
    if !path.is_file() {
        return None;
    }
    match read_json(path) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Ignoring {}: {}", path.display(), e);
            None
        }
    }
}

pub fn save_record(path: &Path, record: &AppVersionRecord) -> Result<()> {
    write_json(path, record)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit(repo: &Repository, message: &str) -> git2::Oid {
        let sig = git2::Signature::now("bench", "bench@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let parents: Vec<git2::Commit<'_>> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    #[tokio::test]
    async fn test_git_probe_reads_hash_branch_and_version() {
        let dir = TempDir::new().unwrap();
        let app_dir = dir.path().join("frappe");
        fs::create_dir_all(app_dir.join("frappe")).unwrap();
        fs::write(
            app_dir.join("frappe/__init__.py"),
            "import os\n__version__ = \"15.4.1\"\n",
        )
        .unwrap();
        let repo = Repository::init(&app_dir).unwrap();
        let oid = commit(&repo, "initial");
        let branch = repo.head().unwrap().shorthand().unwrap().to_string();

        let probe = GitVersionProbe::new(dir.path());
        let live = probe
            .probe(&["frappe".to_string(), "missing".to_string()])
            .await
            .unwrap();

        assert_eq!(live[0].version.semver.as_deref(), Some("15.4.1"));
        assert_eq!(live[0].version.git_hash, Some(oid.to_string()));
        assert_eq!(live[0].branch, Some(branch));

        assert_eq!(live[1].version, AppVersion::default());
        assert_eq!(to_record(&live).iter().count(), 1);
    }

    #[test]
    fn test_record_load_and_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app_versions.json");
        assert!(load_record(&path).is_none());

        let mut record = AppVersionRecord::new();
        record.insert(
            "frappe",
            AppVersion {
                semver: Some("15.0.0".into()),
                git_hash: Some("abc".into()),
            },
        );
        save_record(&path, &record).unwrap();
        assert_eq!(load_record(&path), Some(record));

        fs::write(&path, "{not json").unwrap();
        assert!(load_record(&path).is_none());
    }
}
