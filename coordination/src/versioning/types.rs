//! Version store records and manifest schema

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable version entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub name: String,
    /// Producing agent/stage tag
    pub agent: String,
    pub parent: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Monotonic creation order; breaks timestamp ties
    #[serde(default)]
    pub sequence: u64,
    pub content_hash: String,
    pub files: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl VersionRecord {
    /// Creation ordering key.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.sequence)
    }

    /// Read a numeric metadata field.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(serde_json::Value::as_f64)
    }
}

/// Durable index of every version in a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionManifest {
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub current_version: Option<String>,
    #[serde(default)]
    pub next_sequence: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl VersionManifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            versions: BTreeMap::new(),
            latest_version: None,
            current_version: None,
            next_sequence: 0,
            created_at: now,
            last_updated: now,
        }
    }

    /// Versions in creation order.
    pub fn ordered(&self) -> Vec<&VersionRecord> {
        let mut records: Vec<&VersionRecord> = self.versions.values().collect();
        records.sort_by_key(|r| r.order_key());
        records
    }

    /// Most recently created remaining version.
    pub fn newest(&self) -> Option<&VersionRecord> {
        self.versions.values().max_by_key(|r| r.order_key())
    }
}

impl Default for VersionManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate statistics, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStats {
    pub total_versions: usize,
    pub earliest_version: Option<String>,
    pub latest_version: Option<String>,
    pub current_version: Option<String>,
    pub agents_used: Vec<String>,
    pub total_files: usize,
    pub average_files_per_version: f64,
}

/// Full history dump written by `VersionStore::export_history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionHistoryExport {
    pub exported_at: DateTime<Utc>,
    pub stats: VersionStats,
    pub manifest: VersionManifest,
    /// Root-to-leaf lineage of every version
    pub lineages: BTreeMap<String, Vec<String>>,
}
