//! On-disk layout of a file store.
//!
//! ```text
//! <root>/
//!   .watermark                                  allocator record
//!   <group>/<resource>/<namespace>/<name>.json  namespaced object
//!   <group>/<resource>/_cluster/<name>.json     cluster-scoped object
//! ```
//!
//! The core (empty) group is stored under `_core`. Neither `_core` nor
//! `_cluster` can collide with a real group or namespace because those never
//! contain `_`. In-flight writes live next to their target as
//! `.<name>.json.tmp*` and are never treated as objects.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use rvstore_types::{ObjectKey, ResourceKind};

pub const WATERMARK_FILE: &str = ".watermark";
pub const CLUSTER_DIR: &str = "_cluster";
pub const CORE_GROUP_DIR: &str = "_core";
const OBJECT_EXT: &str = ".json";

/// Path arithmetic and atomic file I/O under a store root.
#[derive(Clone, Debug)]
pub struct Layout {
    root: PathBuf,
}

/// Result of a full-tree scan at open.
#[derive(Debug, Default)]
pub struct TreeScan {
    pub objects: Vec<PathBuf>,
    pub temp_files: Vec<PathBuf>,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn watermark_path(&self) -> PathBuf {
        self.root.join(WATERMARK_FILE)
    }

    pub fn kind_dir(&self, kind: &ResourceKind) -> PathBuf {
        let group = if kind.group.is_empty() {
            CORE_GROUP_DIR
        } else {
            kind.group.as_str()
        };
        self.root.join(group).join(&kind.resource)
    }

    pub fn scope_dir(&self, kind: &ResourceKind, namespace: Option<&str>) -> PathBuf {
        self.kind_dir(kind).join(namespace.unwrap_or(CLUSTER_DIR))
    }

    pub fn object_path(&self, key: &ObjectKey) -> PathBuf {
        self.scope_dir(&key.kind, key.namespace.as_deref())
            .join(format!("{}{OBJECT_EXT}", key.name))
    }

    /// Read a file, mapping absence to `None`.
    pub fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace `path` with `bytes` atomically: write a sibling temp file,
    /// fsync it, then rename over the target.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "object path has no parent"))?;
        fs::create_dir_all(dir)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}.tmp"))
            .tempfile_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove a file. Returns whether it existed.
    pub fn remove(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Object files of one kind, optionally limited to one scope.
    pub fn object_files(&self, kind: &ResourceKind, namespace: Option<&str>) -> io::Result<Vec<PathBuf>> {
        let (base, depth) = match namespace {
            Some(ns) => (self.scope_dir(kind, Some(ns)), 1),
            None => (self.kind_dir(kind), 2),
        };
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&base).min_depth(depth).max_depth(depth) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() && is_object_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Walk the whole tree once, classifying object and temp files.
    pub fn scan(&self) -> io::Result<TreeScan> {
        let mut scan = TreeScan::default();
        if !self.root.is_dir() {
            return Ok(scan);
        }
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_temp_file(path) {
                scan.temp_files.push(entry.into_path());
            } else if entry.depth() == 4 && is_object_file(path) {
                scan.objects.push(entry.into_path());
            } else if path != self.watermark_path() {
                warn!(path = %path.display(), "ignoring unexpected file in store tree");
            }
        }
        Ok(scan)
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

pub fn is_object_file(path: &Path) -> bool {
    let name = file_name(path);
    !name.starts_with('.') && name.len() > OBJECT_EXT.len() && name.ends_with(OBJECT_EXT)
}

pub fn is_temp_file(path: &Path) -> bool {
    let name = file_name(path);
    name.starts_with('.') && name.contains(".tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind() -> ResourceKind {
        ResourceKind::new("dashboard.grafana.app", "v1", "dashboards")
    }

    #[test]
    fn paths() {
        let layout = Layout::new("/data");
        let key = ObjectKey::namespaced(kind(), "ns", "a");
        assert_eq!(
            layout.object_path(&key),
            PathBuf::from("/data/dashboard.grafana.app/dashboards/ns/a.json")
        );
        let cluster = ObjectKey::cluster(ResourceKind::new("", "v1", "namespaces"), "ns");
        assert_eq!(
            layout.object_path(&cluster),
            PathBuf::from("/data/_core/namespaces/_cluster/ns.json")
        );
        assert_eq!(layout.watermark_path(), PathBuf::from("/data/.watermark"));
    }

    #[test]
    fn version_does_not_change_path() {
        let layout = Layout::new("/data");
        let v2 = ResourceKind::new("dashboard.grafana.app", "v2", "dashboards");
        assert_eq!(
            layout.object_path(&ObjectKey::namespaced(kind(), "ns", "a")),
            layout.object_path(&ObjectKey::namespaced(v2, "ns", "a"))
        );
    }

    #[test]
    fn atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let path = layout.object_path(&ObjectKey::namespaced(kind(), "ns", "a"));
        layout.write_atomic(&path, b"one").unwrap();
        layout.write_atomic(&path, b"two").unwrap();
        assert_eq!(layout.read(&path).unwrap().unwrap(), b"two");

        let scan = layout.scan().unwrap();
        assert_eq!(scan.objects, vec![path.clone()]);
        assert!(scan.temp_files.is_empty());

        assert!(layout.remove(&path).unwrap());
        assert!(!layout.remove(&path).unwrap());
        assert!(layout.read(&path).unwrap().is_none());
    }

    #[test]
    fn scans_skip_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let scope = layout.scope_dir(&kind(), Some("ns"));
        fs::create_dir_all(&scope).unwrap();
        fs::write(scope.join("a.json"), b"{}").unwrap();
        fs::write(scope.join(".b.json.tmpXYZ"), b"partial").unwrap();
        fs::create_dir_all(layout.scope_dir(&kind(), Some("other"))).unwrap();
        fs::write(layout.scope_dir(&kind(), Some("other")).join("c.json"), b"{}").unwrap();

        assert_eq!(layout.object_files(&kind(), Some("ns")).unwrap().len(), 1);
        assert_eq!(layout.object_files(&kind(), None).unwrap().len(), 2);
        let scan = layout.scan().unwrap();
        assert_eq!(scan.objects.len(), 2);
        assert_eq!(scan.temp_files.len(), 1);
    }

    #[test]
    fn missing_kind_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        assert!(layout.object_files(&kind(), None).unwrap().is_empty());
    }
}
