use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const GIT_HASH_SUFFIX: &str = "_git_hash";

/// What is known about one installed application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppVersion {
    pub semver: Option<String>,
    pub git_hash: Option<String>,
}

/// App versions keyed by app name.
///
/// Persisted as the flat `app_versions.json` document:
/// `{"frappe": "15.2.0", "frappe_git_hash": "abc123..."}`, keys sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppVersionRecord {
    apps: BTreeMap<String, AppVersion>,
}

impl AppVersionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, app: impl Into<String>, version: AppVersion) {
        self.apps.insert(app.into(), version);
    }

    pub fn get(&self, app: &str) -> Option<&AppVersion> {
        self.apps.get(app)
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AppVersion)> {
        self.apps.iter()
    }

    pub fn from_flat(map: &Map<String, Value>) -> Self {
        let mut record = Self::new();
        for (key, value) in map {
            let Some(value) = value.as_str() else {
                continue;
            };
            if let Some(app) = key.strip_suffix(GIT_HASH_SUFFIX) {
                record.apps.entry(app.to_string()).or_default().git_hash = Some(value.to_string());
            } else {
                record.apps.entry(key.clone()).or_default().semver = Some(value.to_string());
            }
        }
        record
    }

    pub fn to_flat(&self) -> BTreeMap<String, String> {
        let mut flat = BTreeMap::new();
        for (app, version) in &self.apps {
            if let Some(semver) = &version.semver {
                flat.insert(app.clone(), semver.clone());
            }
            if let Some(hash) = &version.git_hash {
                flat.insert(format!("{app}{GIT_HASH_SUFFIX}"), hash.clone());
            }
        }
        flat
    }
}

impl Serialize for AppVersionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_flat().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AppVersionRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_flat(&map))
    }
}
