//! Change tracker: compares stored versions and persists the results
//!
//! Files written under the artifacts root:
//!
//! ```text
//! version_history/changes/<old>_to_<new>.json
//! version_history/changes/<old>_to_<new>_summary.md
//! version_history/diffs/<file>_<old>_<new>.diff
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::report::ComparisonReport;
use crate::versioning::{VersionError, VersionStore};

/// Error type for change tracker operations
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Version(#[from] VersionError),
}

impl TrackerError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for change tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Paths of a saved comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedComparison {
    pub comparison_path: PathBuf,
    pub summary_path: PathBuf,
    pub diff_paths: Vec<PathBuf>,
}

/// Persists comparison reports next to the version history.
pub struct ChangeTracker {
    changes_dir: PathBuf,
    diffs_dir: PathBuf,
}

impl ChangeTracker {
    /// Create a tracker writing under `base_dir/version_history`.
    pub fn new(base_dir: impl AsRef<Path>) -> TrackerResult<Self> {
        let history = base_dir.as_ref().join(crate::versioning::store::HISTORY_DIR);
        let changes_dir = history.join("changes");
        let diffs_dir = history.join("diffs");
        for dir in [&changes_dir, &diffs_dir] {
            fs::create_dir_all(dir).map_err(|e| TrackerError::io(dir, e))?;
        }
        Ok(Self {
            changes_dir,
            diffs_dir,
        })
    }

    pub fn changes_dir(&self) -> &Path {
        &self.changes_dir
    }

    /// Compare two versions already registered in `store`.
    pub fn compare_versions(
        &self,
        store: &VersionStore,
        old_version: &str,
        new_version: &str,
    ) -> TrackerResult<ComparisonReport> {
        let old = store.get_content(old_version)?;
        let new = store.get_content(new_version)?;
        let report = ComparisonReport::compare(&old, &new, old_version, new_version);
        debug!(
            old = old_version,
            new = new_version,
            modified = report.summary.files_modified.len(),
            similarity = report.summary.average_similarity,
            "Compared versions"
        );
        Ok(report)
    }

    /// Write the JSON report, the markdown summary, and optionally one
    /// `.diff` file per modified file.
    pub fn save_comparison(
        &self,
        report: &ComparisonReport,
        save_diffs: bool,
    ) -> TrackerResult<SavedComparison> {
        let stem = report.file_stem();

        let comparison_path = self.changes_dir.join(format!("{stem}.json"));
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&comparison_path, json).map_err(|e| TrackerError::io(&comparison_path, e))?;

        let mut diff_paths = Vec::new();
        if save_diffs {
            for (name, diff) in &report.file_changes {
                if diff.unified_diff.is_empty() {
                    continue;
                }
                let flat = name.replace('/', "_");
                let path = self.diffs_dir.join(format!(
                    "{}_{}_{}.diff",
                    flat, report.old_version, report.new_version
                ));
                fs::write(&path, diff.unified_text()).map_err(|e| TrackerError::io(&path, e))?;
                diff_paths.push(path);
            }
        }

        let summary_path = self.changes_dir.join(format!("{stem}_summary.md"));
        fs::write(&summary_path, report.to_markdown())
            .map_err(|e| TrackerError::io(&summary_path, e))?;

        info!(
            comparison = %comparison_path.display(),
            diffs = diff_paths.len(),
            "Saved comparison"
        );
        Ok(SavedComparison {
            comparison_path,
            summary_path,
            diff_paths,
        })
    }

    /// Compare two versions, attach the quality delta when both scores are
    /// known, and save everything.
    pub fn create_change_report(
        &self,
        store: &VersionStore,
        old_version: &str,
        new_version: &str,
        old_quality: Option<f64>,
        new_quality: Option<f64>,
    ) -> TrackerResult<(ComparisonReport, SavedComparison)> {
        let mut report = self.compare_versions(store, old_version, new_version)?;
        if let (Some(old), Some(new)) = (old_quality, new_quality) {
            report = report.with_quality(old, new);
        }
        let saved = self.save_comparison(&report, true)?;
        Ok((report, saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn seeded() -> (TempDir, VersionStore, ChangeTracker) {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        let mut v1 = BTreeMap::new();
        v1.insert("doc.md".to_string(), "intro\nbody\n".to_string());
        let mut v2 = BTreeMap::new();
        v2.insert("doc.md".to_string(), "intro\nbetter body\n".to_string());
        store.create(&v1, "v1", "content", None, json!({})).unwrap();
        store
            .create(&v2, "v2", "format", Some("v1"), json!({}))
            .unwrap();
        let tracker = ChangeTracker::new(dir.path()).unwrap();
        (dir, store, tracker)
    }

    #[test]
    fn test_save_comparison_writes_all_files() {
        let (_dir, store, tracker) = seeded();
        let report = tracker.compare_versions(&store, "v1", "v2").unwrap();
        let saved = tracker.save_comparison(&report, true).unwrap();

        assert!(saved.comparison_path.ends_with("v1_to_v2.json"));
        assert!(saved.summary_path.ends_with("v1_to_v2_summary.md"));
        assert_eq!(saved.diff_paths.len(), 1);
        let diff = fs::read_to_string(&saved.diff_paths[0]).unwrap();
        assert!(diff.contains("+better body"));

        let back: ComparisonReport =
            serde_json::from_str(&fs::read_to_string(&saved.comparison_path).unwrap()).unwrap();
        assert_eq!(back.summary.files_modified, vec!["doc.md"]);
    }

    #[test]
    fn test_create_change_report_with_quality() {
        let (_dir, store, tracker) = seeded();
        let (report, saved) = tracker
            .create_change_report(&store, "v1", "v2", Some(78.0), Some(86.0))
            .unwrap();
        assert!(report.quality_analysis.is_some());
        let md = fs::read_to_string(saved.summary_path).unwrap();
        assert!(md.contains("## Quality"));
        assert!(md.contains("78 → 86"));
    }

    #[test]
    fn test_compare_unknown_version_fails() {
        let (_dir, store, tracker) = seeded();
        let err = tracker.compare_versions(&store, "v1", "v9").unwrap_err();
        assert!(matches!(err, TrackerError::Version(VersionError::NotFound(_))));
    }
}
