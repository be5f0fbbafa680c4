//! File-backed version store
//!
//! Layout under the store root:
//!
//! ```text
//! reviewed_content/<version>/<file>          raw file content
//! version_history/version_manifest.json      index + latest/current pointers
//! ```
//!
//! The manifest is re-read on every operation so that versions registered by
//! stage collaborators running in other processes are visible. Every
//! manifest access holds an advisory lock on
//! `version_history/version_manifest.lock`, so handles in different threads
//! or processes never interleave a read-modify-write.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, info, warn};

use super::error::{VersionError, VersionResult};
use super::types::{VersionHistoryExport, VersionManifest, VersionRecord, VersionStats};

pub const CONTENT_DIR: &str = "reviewed_content";
pub const HISTORY_DIR: &str = "version_history";
pub const MANIFEST_FILE: &str = "version_manifest.json";
pub const LOCK_FILE: &str = "version_manifest.lock";

/// Hex characters kept from the content digest.
const CONTENT_HASH_LEN: usize = 16;

/// Shared reference to VersionStore
pub type SharedVersionStore = Arc<VersionStore>;

/// Exclusive access to the manifest, within and across processes.
struct ManifestLock<'a> {
    _guard: MutexGuard<'a, ()>,
    file: File,
}

impl Drop for ManifestLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(error = %e, "Failed to release manifest lock");
        }
    }
}

/// On-disk registry of immutable, named document snapshots.
pub struct VersionStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl VersionStore {
    /// Open or create a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> VersionResult<Self> {
        let root = root.into();
        for dir in [root.join(CONTENT_DIR), root.join(HISTORY_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| VersionError::io(&dir, e))?;
        }
        debug!(root = %root.display(), "Opened version store");
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedVersionStore {
        Arc::new(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(HISTORY_DIR).join(MANIFEST_FILE)
    }

    /// Directory holding a version's files. Does not check existence.
    pub fn version_dir(&self, name: &str) -> PathBuf {
        self.root.join(CONTENT_DIR).join(name)
    }

    fn guard(&self) -> VersionResult<ManifestLock<'_>> {
        let guard = self.lock.lock().map_err(|_| VersionError::LockPoisoned)?;
        let path = self.root.join(HISTORY_DIR).join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| VersionError::io(&path, e))?;
        file.lock_exclusive()
            .map_err(|e| VersionError::io(&path, e))?;
        Ok(ManifestLock {
            _guard: guard,
            file,
        })
    }

    fn manifest_tmp_path(&self) -> PathBuf {
        self.manifest_path()
            .with_extension(format!("json.{}.tmp", std::process::id()))
    }

    fn load_manifest(&self) -> VersionResult<VersionManifest> {
        let path = self.manifest_path();
        match fs::read_to_string(&path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(VersionManifest::new()),
            Err(e) => Err(VersionError::io(path, e)),
        }
    }

    fn save_manifest(&self, manifest: &mut VersionManifest) -> VersionResult<()> {
        manifest.last_updated = Utc::now();
        let path = self.manifest_path();
        let tmp = self.manifest_tmp_path();
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(&tmp, json).map_err(|e| VersionError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| VersionError::io(&path, e))
    }

    /// Register a new version with the given file set.
    ///
    /// Fails with [`VersionError::Duplicate`] if `name` exists; the store is
    /// left untouched in that case. A content directory with no manifest
    /// entry is left over from an interrupted create and is replaced. On any
    /// failure after the directory is made, the directory is removed again.
    /// Updates both the latest and current pointers.
    pub fn create(
        &self,
        files: &BTreeMap<String, String>,
        name: &str,
        agent: &str,
        parent: Option<&str>,
        metadata: serde_json::Value,
    ) -> VersionResult<VersionRecord> {
        validate_version_name(name)?;
        for file in files.keys() {
            validate_file_name(file)?;
        }
        let content_hash = content_hash(files)?;

        let _lock = self.guard()?;
        let mut manifest = self.load_manifest()?;
        if manifest.versions.contains_key(name) {
            return Err(VersionError::Duplicate(name.to_string()));
        }

        let dir = self.version_dir(name);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(version = name, "Reclaiming unregistered version directory");
                fs::remove_dir_all(&dir).map_err(|e| VersionError::io(&dir, e))?;
                fs::create_dir(&dir).map_err(|e| VersionError::io(&dir, e))?;
            }
            Err(e) => return Err(VersionError::io(&dir, e)),
        }

        if let Err(e) = write_files(&dir, files) {
            discard_partial(&dir, name);
            return Err(e);
        }

        let record = VersionRecord {
            name: name.to_string(),
            agent: agent.to_string(),
            parent: parent.map(str::to_string),
            created_at: Utc::now(),
            sequence: manifest.next_sequence,
            content_hash,
            files: files.keys().cloned().collect(),
            metadata,
        };

        manifest.next_sequence += 1;
        manifest.versions.insert(name.to_string(), record.clone());
        manifest.latest_version = Some(name.to_string());
        manifest.current_version = Some(name.to_string());
        if let Err(e) = self.save_manifest(&mut manifest) {
            discard_partial(&dir, name);
            return Err(e);
        }

        info!(
            version = name,
            agent,
            parent = ?parent,
            files = record.files.len(),
            hash = %record.content_hash,
            "Created version"
        );
        Ok(record)
    }

    /// Look up a version record.
    pub fn get(&self, name: &str) -> VersionResult<Option<VersionRecord>> {
        let _lock = self.guard()?;
        Ok(self.load_manifest()?.versions.remove(name))
    }

    pub fn exists(&self, name: &str) -> VersionResult<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// Read every file of a version back from disk.
    pub fn get_content(&self, name: &str) -> VersionResult<BTreeMap<String, String>> {
        let record = self
            .get(name)?
            .ok_or_else(|| VersionError::NotFound(name.to_string()))?;
        let dir = self.version_dir(name);

        let mut content = BTreeMap::new();
        for file in &record.files {
            let path = dir.join(file);
            match fs::read_to_string(&path) {
                Ok(text) => {
                    content.insert(file.clone(), text);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(VersionError::MissingFile {
                        version: name.to_string(),
                        file: file.clone(),
                    });
                }
                Err(e) => return Err(VersionError::io(path, e)),
            }
        }
        Ok(content)
    }

    /// All versions in creation order.
    pub fn list(&self) -> VersionResult<Vec<VersionRecord>> {
        let _lock = self.guard()?;
        let manifest = self.load_manifest()?;
        Ok(manifest.ordered().into_iter().cloned().collect())
    }

    pub fn latest(&self) -> VersionResult<Option<VersionRecord>> {
        let _lock = self.guard()?;
        let mut manifest = self.load_manifest()?;
        Ok(manifest
            .latest_version
            .clone()
            .and_then(|name| manifest.versions.remove(&name)))
    }

    pub fn current(&self) -> VersionResult<Option<VersionRecord>> {
        let _lock = self.guard()?;
        let mut manifest = self.load_manifest()?;
        Ok(manifest
            .current_version
            .clone()
            .and_then(|name| manifest.versions.remove(&name)))
    }

    /// Root-to-leaf chain of version names ending at `name`.
    ///
    /// Stops at the first parent that is absent from the store and at the
    /// first repeated name, so a corrupted manifest cannot loop the walk.
    pub fn lineage(&self, name: &str) -> VersionResult<Vec<String>> {
        let _lock = self.guard()?;
        let manifest = self.load_manifest()?;
        lineage_in(&manifest, name)
    }

    /// Move the latest and current pointers to `name`. No content is copied.
    pub fn rollback(&self, name: &str) -> VersionResult<VersionRecord> {
        let _lock = self.guard()?;
        let mut manifest = self.load_manifest()?;
        let record = manifest
            .versions
            .get(name)
            .cloned()
            .ok_or_else(|| VersionError::NotFound(name.to_string()))?;

        let previous = manifest.current_version.replace(name.to_string());
        manifest.latest_version = Some(name.to_string());
        self.save_manifest(&mut manifest)?;

        info!(version = name, previous = ?previous, "Rolled back to version");
        Ok(record)
    }

    /// Remove a version's snapshot and registry entry.
    ///
    /// Returns `false` if no such version exists. Pointers that named the
    /// deleted version move to the newest remaining version.
    pub fn delete(&self, name: &str) -> VersionResult<bool> {
        let _lock = self.guard()?;
        let mut manifest = self.load_manifest()?;
        if manifest.versions.remove(name).is_none() {
            return Ok(false);
        }

        let dir = self.version_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(version = name, "Version content already missing on delete");
            }
            Err(e) => return Err(VersionError::io(dir, e)),
        }

        let newest = manifest.newest().map(|r| r.name.clone());
        if manifest.latest_version.as_deref() == Some(name) {
            manifest.latest_version = newest.clone();
        }
        if manifest.current_version.as_deref() == Some(name) {
            manifest.current_version = newest;
        }
        self.save_manifest(&mut manifest)?;

        info!(version = name, latest = ?manifest.latest_version, "Deleted version");
        Ok(true)
    }

    /// Aggregate statistics over the whole store.
    pub fn stats(&self) -> VersionResult<VersionStats> {
        let _lock = self.guard()?;
        let manifest = self.load_manifest()?;
        Ok(stats_of(&manifest))
    }

    /// Write stats, the manifest, and every lineage to a JSON file.
    pub fn export_history(&self, path: &Path) -> VersionResult<VersionHistoryExport> {
        let export = {
            let _lock = self.guard()?;
            let manifest = self.load_manifest()?;
            let mut lineages = BTreeMap::new();
            for name in manifest.versions.keys() {
                lineages.insert(name.clone(), lineage_in(&manifest, name)?);
            }
            VersionHistoryExport {
                exported_at: Utc::now(),
                stats: stats_of(&manifest),
                manifest,
                lineages,
            }
        };

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| VersionError::io(dir, e))?;
        }
        let json = serde_json::to_string_pretty(&export)?;
        fs::write(path, json).map_err(|e| VersionError::io(path, e))?;
        info!(path = %path.display(), versions = export.stats.total_versions, "Exported version history");
        Ok(export)
    }
}

fn discard_partial(dir: &Path, name: &str) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!(version = name, error = %e, "Failed to clean up partial version");
    }
}

fn write_files(dir: &Path, files: &BTreeMap<String, String>) -> VersionResult<()> {
    for (file, text) in files {
        let path = dir.join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| VersionError::io(parent, e))?;
        }
        fs::write(&path, text).map_err(|e| VersionError::io(&path, e))?;
    }
    Ok(())
}

fn lineage_in(manifest: &VersionManifest, name: &str) -> VersionResult<Vec<String>> {
    if !manifest.versions.contains_key(name) {
        return Err(VersionError::NotFound(name.to_string()));
    }

    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(name.to_string());
    while let Some(current) = cursor {
        if !seen.insert(current.clone()) {
            warn!(version = name, at = %current, "Cycle in version lineage");
            break;
        }
        cursor = manifest
            .versions
            .get(&current)
            .and_then(|r| r.parent.clone())
            .filter(|p| manifest.versions.contains_key(p));
        chain.push(current);
    }
    chain.reverse();
    Ok(chain)
}

fn stats_of(manifest: &VersionManifest) -> VersionStats {
    let ordered = manifest.ordered();
    let total_files: usize = ordered.iter().map(|r| r.files.len()).sum();
    let agents: BTreeSet<String> = ordered.iter().map(|r| r.agent.clone()).collect();
    VersionStats {
        total_versions: ordered.len(),
        earliest_version: ordered.first().map(|r| r.name.clone()),
        latest_version: manifest.latest_version.clone(),
        current_version: manifest.current_version.clone(),
        agents_used: agents.into_iter().collect(),
        total_files,
        average_files_per_version: if ordered.is_empty() {
            0.0
        } else {
            total_files as f64 / ordered.len() as f64
        },
    }
}

/// Digest over the full file-name → content mapping.
///
/// `BTreeMap` serializes with sorted keys, so equal file sets hash equally.
pub fn content_hash(files: &BTreeMap<String, String>) -> VersionResult<String> {
    let canonical = serde_json::to_vec(files)?;
    let digest = blake3::hash(&canonical).to_hex();
    Ok(digest.as_str()[..CONTENT_HASH_LEN].to_string())
}

fn validate_version_name(name: &str) -> VersionResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(VersionError::invalid_version(name))
    }
}

fn validate_file_name(name: &str) -> VersionResult<()> {
    let path = Path::new(name);
    let valid = !name.is_empty()
        && !name.contains('\\')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(VersionError::invalid_file(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn files(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store() -> (TempDir, VersionStore) {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_and_read_back() {
        let (_dir, store) = store();
        let f = files(&[("doc.md", "# Title\n"), ("sub/notes.txt", "x")]);
        let record = store
            .create(&f, "v1", "content_review", None, json!({"quality_score": 88}))
            .unwrap();
        assert_eq!(record.files, vec!["doc.md", "sub/notes.txt"]);
        assert_eq!(record.content_hash.len(), 16);
        assert_eq!(record.metadata_f64("quality_score"), Some(88.0));
        assert_eq!(store.get_content("v1").unwrap(), f);
    }

    #[test]
    fn test_duplicate_create_leaves_store_unchanged() {
        let (_dir, store) = store();
        store
            .create(&files(&[("a", "one")]), "v1", "a", None, json!({}))
            .unwrap();
        let err = store
            .create(&files(&[("a", "two")]), "v1", "b", None, json!({}))
            .unwrap_err();
        assert!(matches!(err, VersionError::Duplicate(ref n) if n == "v1"));
        assert_eq!(store.get_content("v1").unwrap()["a"], "one");
        assert_eq!(store.get("v1").unwrap().unwrap().agent, "a");
    }

    #[test]
    fn test_get_unknown_is_none_and_content_is_not_found() {
        let (_dir, store) = store();
        assert!(store.get("nope").unwrap().is_none());
        assert!(matches!(
            store.get_content("nope"),
            Err(VersionError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_backing_file_is_detected() {
        let (dir, store) = store();
        store
            .create(&files(&[("a.md", "x"), ("b.md", "y")]), "v1", "a", None, json!({}))
            .unwrap();
        fs::remove_file(dir.path().join(CONTENT_DIR).join("v1").join("b.md")).unwrap();
        match store.get_content("v1") {
            Err(VersionError::MissingFile { version, file }) => {
                assert_eq!(version, "v1");
                assert_eq!(file, "b.md");
            }
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[test]
    fn test_lineage_chain_and_root() {
        let (_dir, store) = store();
        let f = files(&[("a", "x")]);
        store.create(&f, "A", "s", None, json!({})).unwrap();
        store.create(&f, "B", "s", Some("A"), json!({})).unwrap();
        store.create(&f, "C", "s", Some("B"), json!({})).unwrap();
        assert_eq!(store.lineage("A").unwrap(), vec!["A"]);
        assert_eq!(store.lineage("C").unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_lineage_stops_at_external_parent() {
        let (_dir, store) = store();
        store
            .create(&files(&[("a", "x")]), "v1", "s", Some("original"), json!({}))
            .unwrap();
        assert_eq!(store.lineage("v1").unwrap(), vec!["v1"]);
    }

    #[test]
    fn test_lineage_cycle_is_bounded() {
        let (_dir, store) = store();
        let f = files(&[("a", "x")]);
        store.create(&f, "A", "s", None, json!({})).unwrap();
        store.create(&f, "B", "s", Some("A"), json!({})).unwrap();

        let mut manifest = store.load_manifest().unwrap();
        manifest.versions.get_mut("A").unwrap().parent = Some("B".to_string());
        store.save_manifest(&mut manifest).unwrap();

        let chain = store.lineage("B").unwrap();
        assert_eq!(chain, vec!["A", "B"]);
    }

    #[test]
    fn test_rollback_moves_pointers_only() {
        let (_dir, store) = store();
        let f = files(&[("a", "x")]);
        store.create(&f, "v1", "s", None, json!({})).unwrap();
        store.create(&f, "v2", "s", Some("v1"), json!({})).unwrap();

        let record = store.rollback("v1").unwrap();
        assert_eq!(record.name, "v1");
        assert_eq!(store.current().unwrap().unwrap().name, "v1");
        assert_eq!(store.latest().unwrap().unwrap().name, "v1");
        assert_eq!(store.list().unwrap().len(), 2);
        assert!(matches!(
            store.rollback("v9"),
            Err(VersionError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_recomputes_latest() {
        let (dir, store) = store();
        let f = files(&[("a", "x")]);
        store.create(&f, "v1", "s", None, json!({})).unwrap();
        store.create(&f, "v2", "s", None, json!({})).unwrap();

        assert!(store.delete("v2").unwrap());
        assert!(!store.delete("v2").unwrap());
        assert_eq!(store.latest().unwrap().unwrap().name, "v1");
        assert_eq!(store.current().unwrap().unwrap().name, "v1");
        assert!(!dir.path().join(CONTENT_DIR).join("v2").exists());

        assert!(store.delete("v1").unwrap());
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = store();
        store
            .create(&files(&[("a", "x"), ("b", "y")]), "v1", "content", None, json!({}))
            .unwrap();
        store
            .create(&files(&[("a", "z")]), "v2", "format", Some("v1"), json!({}))
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_versions, 2);
        assert_eq!(stats.earliest_version.as_deref(), Some("v1"));
        assert_eq!(stats.latest_version.as_deref(), Some("v2"));
        assert_eq!(stats.agents_used, vec!["content", "format"]);
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.average_files_per_version, 1.5);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let (_dir, store) = store();
        let f = files(&[("a", "x")]);
        assert!(matches!(
            store.create(&f, "../escape", "s", None, json!({})),
            Err(VersionError::InvalidName { kind: "version", .. })
        ));
        assert!(matches!(
            store.create(&files(&[("../x", "y")]), "v1", "s", None, json!({})),
            Err(VersionError::InvalidName { kind: "file", .. })
        ));
        assert!(store.get("v1").unwrap().is_none());
    }

    #[test]
    fn test_content_hash_is_order_independent() {
        let a = files(&[("a", "1"), ("b", "2")]);
        let mut b = BTreeMap::new();
        b.insert("b".to_string(), "2".to_string());
        b.insert("a".to_string(), "1".to_string());
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_ne!(
            content_hash(&a).unwrap(),
            content_hash(&files(&[("a", "1")])).unwrap()
        );
    }

    #[test]
    fn test_second_handle_sees_versions() {
        let (dir, store) = store();
        store
            .create(&files(&[("a", "x")]), "v1", "s", None, json!({}))
            .unwrap();
        let other = VersionStore::open(dir.path()).unwrap();
        assert!(other.exists("v1").unwrap());
    }

    #[test]
    fn test_failed_manifest_save_removes_version_dir() {
        let (_dir, store) = store();
        // A directory at the temp path makes the manifest write fail.
        let blocker = store.manifest_tmp_path();
        fs::create_dir(&blocker).unwrap();

        let f = files(&[("a", "x")]);
        assert!(matches!(
            store.create(&f, "v1", "s", None, json!({})),
            Err(VersionError::Io { .. })
        ));
        assert!(!store.version_dir("v1").exists());
        assert!(store.get("v1").unwrap().is_none());

        fs::remove_dir(&blocker).unwrap();
        store.create(&f, "v1", "s", None, json!({})).unwrap();
        assert_eq!(store.get_content("v1").unwrap(), f);
    }

    #[test]
    fn test_unregistered_dir_is_reclaimed() {
        let (_dir, store) = store();
        let orphan = store.version_dir("v1");
        fs::create_dir(&orphan).unwrap();
        fs::write(orphan.join("stale.md"), "half written").unwrap();

        let record = store
            .create(&files(&[("a.md", "fresh")]), "v1", "s", None, json!({}))
            .unwrap();
        assert_eq!(record.files, vec!["a.md"]);
        assert!(!orphan.join("stale.md").exists());
        assert_eq!(store.get_content("v1").unwrap()["a.md"], "fresh");
    }

    #[test]
    fn test_export_history() {
        let (dir, store) = store();
        let f = files(&[("a", "x")]);
        store.create(&f, "v1", "s", None, json!({})).unwrap();
        store.create(&f, "v2", "s", Some("v1"), json!({})).unwrap();

        let out = dir.path().join("exports").join("history.json");
        let export = store.export_history(&out).unwrap();
        assert_eq!(export.lineages["v2"], vec!["v1", "v2"]);

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["stats"]["total_versions"], 2);
    }
}
