//! Remote backup garbage collection.
//!
//! Keeps at most `limit` distinct backup timestamps under one tenant's
//! prefix. Whole timestamps are removed oldest first until exactly `limit`
//! remain, however far over the limit the tenant currently is.

use shared_types::{tenant_prefix, RemoteBackupKey, RetentionLimit, Timestamp};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::RemoteObjectStore;

#[derive(Debug, Clone)]
pub struct DeleteFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub failures: Vec<DeleteFailure>,
    /// Timestamps still present after the pass, oldest first.
    pub retained: Vec<Timestamp>,
}

impl PruneReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    limit: RetentionLimit,
}

impl RetentionPolicy {
    pub fn new(limit: RetentionLimit) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> RetentionLimit {
        self.limit
    }

    /// Groups keys by the timestamp directory they live in. Keys that do
    /// not follow the backup layout are dropped.
    pub fn group(
        bucket_prefix: &str,
        keys: &[String],
    ) -> BTreeMap<Timestamp, BTreeSet<String>> {
        let mut groups: BTreeMap<Timestamp, BTreeSet<String>> = BTreeMap::new();
        for key in keys {
            match RemoteBackupKey::parse(bucket_prefix, key) {
                Ok(parsed) => {
                    groups.entry(parsed.timestamp).or_default().insert(key.clone());
                }
                Err(e) => debug!("Ignoring {}: {}", key, e),
            }
        }
        groups
    }

    /// Timestamps that must go, oldest first, each with its keys in
    /// lexicographic order.
    pub fn plan(
        &self,
        groups: BTreeMap<Timestamp, BTreeSet<String>>,
    ) -> (Vec<(Timestamp, Vec<String>)>, Vec<Timestamp>) {
        let mut groups: Vec<(Timestamp, Vec<String>)> = groups
            .into_iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(ts, keys)| (ts, keys.into_iter().collect()))
            .collect();

        let excess = groups.len().saturating_sub(self.limit.get());
        let retained = groups.split_off(excess);
        (groups, retained.into_iter().map(|(ts, _)| ts).collect())
    }

    /// Deletes whole backup timestamps under `{bucket_prefix}/{tenant_slug}`
    /// until at most `limit` remain.
    ///
    /// A failed listing aborts. A failed delete is recorded and the pass
    /// carries on; the failures are in the returned report.
    #[instrument(skip(self, store))]
    pub async fn prune(
        &self,
        store: &dyn RemoteObjectStore,
        bucket_prefix: &str,
        tenant_slug: &str,
    ) -> Result<PruneReport> {
        let prefix = tenant_prefix(bucket_prefix, tenant_slug);
        let keys = store.list(&prefix).await?;
        let groups = Self::group(bucket_prefix, &keys);

        let mut report = PruneReport::default();
        let (doomed, retained) = self.plan(groups);
        report.retained = retained;

        if doomed.is_empty() {
            debug!(
                "{} has {} backups, within limit {}",
                tenant_slug,
                report.retained.len(),
                self.limit
            );
            return Ok(report);
        }

        for (timestamp, keys) in doomed {
            info!("Deleting backup {} of {}", timestamp, tenant_slug);
            for key in keys {
                match store.delete(&key).await {
                    Ok(()) => report.deleted.push(key),
                    Err(e) => {
                        warn!("Failed to delete {}: {}", key, e);
                        report.failures.push(DeleteFailure {
                            key,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(report)
    }
}
