//! The bench's `sites/` directory: per-tenant folders and the JSON files
//! the worker reads once per invocation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use shared_types::{CommonConfig, Tenant, TenantConfig, tenant_slug};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, WorkerError};

pub const COMMON_SITE_CONFIG_FILE: &str = "common_site_config.json";
pub const SITE_CONFIG_FILE: &str = "site_config.json";
pub const APPS_TXT_FILE: &str = "apps.txt";
pub const APP_VERSIONS_JSON_FILE: &str = "app_versions.json";

/// Sub-directories every site needs before anything can be restored into it.
const SITE_DIRS: [&str; 5] = [
    "private/backups",
    "private/files",
    "public/files",
    "locks",
    "logs",
];

#[derive(Debug, Clone)]
pub struct SitesDir {
    root: PathBuf,
}

impl SitesDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn site_path(&self, site: &str) -> PathBuf {
        self.root.join(site)
    }

    pub fn site_config_path(&self, site: &str) -> PathBuf {
        self.site_path(site).join(SITE_CONFIG_FILE)
    }

    pub fn site_backup_dir(&self, site: &str) -> PathBuf {
        self.site_path(site).join("private").join("backups")
    }

    pub fn common_config_path(&self) -> PathBuf {
        self.root.join(COMMON_SITE_CONFIG_FILE)
    }

    pub fn app_versions_path(&self) -> PathBuf {
        self.root.join(APP_VERSIONS_JSON_FILE)
    }

    /// A site exists once its `site_config.json` does.
    pub fn exists(&self, site: &str) -> bool {
        self.site_config_path(site).is_file()
    }

    /// Installed sites, sorted by name.
    pub fn list_sites(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| WorkerError::io(&self.root, e))?;
        let mut sites = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| WorkerError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && self.exists(&name) {
                sites.push(name);
            }
        }
        sites.sort();
        Ok(sites)
    }

    /// Maps a slug back to an installed site (`site1_localhost` -> `site1.localhost`).
    pub fn resolve_slug(&self, slug: &str) -> Result<Option<String>> {
        Ok(self
            .list_sites()?
            .into_iter()
            .find(|site| site == slug || tenant_slug(site) == slug))
    }

    pub fn load_tenant(&self, site: &str) -> Result<Tenant> {
        let config: TenantConfig = read_json(&self.site_config_path(site))?;
        Ok(Tenant {
            name: site.to_string(),
            local_dir: self.site_path(site),
            config,
        })
    }

    pub fn save_tenant(&self, tenant: &Tenant) -> Result<()> {
        write_json(&self.site_config_path(&tenant.name), &tenant.config)
    }

    /// Creates the site's directory tree and writes its initial config.
    pub fn provision(&self, site: &str, config: TenantConfig) -> Result<Tenant> {
        let site_path = self.site_path(site);
        for dir in SITE_DIRS {
            let path = site_path.join(dir);
            fs::create_dir_all(&path).map_err(|e| WorkerError::io(&path, e))?;
        }

        let tenant = Tenant {
            name: site.to_string(),
            local_dir: site_path,
            config,
        };
        self.save_tenant(&tenant)?;
        info!("Provisioned site {}", site);
        Ok(tenant)
    }

    pub fn load_common(&self) -> Result<CommonConfig> {
        let path = self.common_config_path();
        if !path.is_file() {
            return Err(WorkerError::Configuration(format!(
                "{} not found",
                path.display()
            )));
        }
        read_json(&path)
    }

    /// A bench without `common_site_config.json` yet gets an empty one.
    pub fn load_common_or_default(&self) -> Result<CommonConfig> {
        let path = self.common_config_path();
        if path.is_file() {
            read_json(&path)
        } else {
            Ok(CommonConfig::default())
        }
    }

    pub fn save_common(&self, config: &CommonConfig) -> Result<()> {
        write_json(&self.common_config_path(), config)
    }

    /// Apps listed in `apps.txt`, in install order.
    pub fn apps(&self) -> Result<Vec<String>> {
        let path = self.root.join(APPS_TXT_FILE);
        let contents = fs::read_to_string(&path).map_err(|e| WorkerError::io(&path, e))?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| WorkerError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| WorkerError::json(path, e))
}

/// Writes through a sibling temp file so readers never see a half-written config.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value).map_err(|e| WorkerError::json(path, e))?;
    json.push(b'\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).map_err(|e| WorkerError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| WorkerError::io(path, e))?;
    debug!("Wrote {}", path.display());
    Ok(())
}
