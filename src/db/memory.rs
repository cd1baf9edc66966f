use std::collections;
use std::fs;
use std::path;

use crate::db::model;
use crate::db::RecordStore;
use crate::error::Error;
use crate::model::Category;

/// Records captured from the store, as read by `MemoryStore::open`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Snapshot {
    #[serde(default)]
    pub telemetry: Vec<model::TelemetryRecord>,
    #[serde(default)]
    pub errors: Vec<model::ErrorRecord>,
}

/// A record store over an in-memory snapshot, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Snapshot,
    unavailable: collections::HashSet<String>,
}

impl MemoryStore {
    pub fn new(snapshot: Snapshot) -> Self {
        MemoryStore {
            snapshot,
            unavailable: collections::HashSet::new(),
        }
    }

    pub fn open(file: &path::Path) -> Result<Self, Error> {
        let raw = fs::read_to_string(file).map_err(|e| {
            Error::configuration(format!("cannot read snapshot {}: {}", file.display(), e))
        })?;
        let snapshot = serde_json::from_str(&raw).map_err(|e| {
            Error::configuration(format!("invalid snapshot {}: {}", file.display(), e))
        })?;

        Ok(MemoryStore::new(snapshot))
    }

    /// Makes every query for `site_id` fail, the way an unreachable partition would.
    pub fn with_unavailable_site(mut self, site_id: &str) -> Self {
        self.unavailable.insert(site_id.to_owned());
        self
    }

    fn check_available(&self, site_id: &str, query: &'static str) -> Result<(), Error> {
        if self.unavailable.contains(site_id) {
            Err(Error::store_query(site_id, query, "site partition unavailable"))
        } else {
            Ok(())
        }
    }
}

impl RecordStore for MemoryStore {
    fn latest(
        &self,
        site_id: &str,
        _category: Category,
        limit: usize,
    ) -> Result<Vec<model::TelemetryRecord>, Error> {
        self.check_available(site_id, "telemetry")?;

        let mut records = self
            .snapshot
            .telemetry
            .iter()
            .filter(|r| r.site_id == site_id)
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);

        Ok(records)
    }

    fn errors_since(
        &self,
        site_id: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<model::ErrorRecord>, Error> {
        self.check_available(site_id, "error")?;

        Ok(self
            .snapshot
            .errors
            .iter()
            .filter(|r| r.site_id == site_id && r.timestamp >= since)
            .cloned()
            .collect())
    }
}
