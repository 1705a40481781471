//! Runtime directories and recovery snapshots.
//!
//! A container exists exactly as long as its runtime directory. The snapshot
//! in it is written once, after the monitor has been started.

use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use kennel_common::paths::files;
use kennel_common::{ContainerId, KennelError, KennelResult};

use super::container::Container;

/// Manages the runtime directories below the runtime root.
#[derive(Debug, Clone)]
pub struct StateManager {
    root: PathBuf,
}

impl StateManager {
    /// Create a state manager for a runtime root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Runtime root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runtime directory of a container.
    #[must_use]
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Whether a runtime directory exists.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.container_dir(id).is_dir()
    }

    /// Create the runtime directory. The directory must not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::AlreadyExists`] if the container exists.
    pub fn create_dir(&self, id: &ContainerId) -> KennelResult<PathBuf> {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o711)
            .create(&self.root)?;

        let dir = self.container_dir(id.as_str());
        match std::fs::DirBuilder::new().mode(0o700).create(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(KennelError::AlreadyExists { id: id.to_string() });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(container_id = %id, path = %dir.display(), "Created runtime directory");
        Ok(dir)
    }

    /// Write the recovery snapshot. An existing snapshot is never replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists or can't be written.
    pub fn save(&self, container: &Container) -> KennelResult<()> {
        let path = container.runtime_path(files::SNAPSHOT);
        let json = serde_json::to_vec_pretty(container)?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o440)
            .open(&path)?;
        file.write_all(&json)?;
        file.sync_all()?;

        tracing::debug!(
            container_id = %container.id,
            path = %path.display(),
            "Saved container snapshot"
        );
        Ok(())
    }

    /// Load a container from its snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::ContainerNotFound`] if there is no runtime
    /// directory, or an error if the snapshot can't be read.
    pub fn load(&self, id: &str) -> KennelResult<Container> {
        let dir = self.container_dir(id);
        if !dir.is_dir() {
            return Err(KennelError::ContainerNotFound { id: id.to_string() });
        }

        let path = dir.join(files::SNAPSHOT);
        let json = std::fs::read(&path)?;
        let container: Container = serde_json::from_slice(&json)?;

        tracing::debug!(container_id = %id, path = %path.display(), "Loaded container snapshot");
        Ok(container)
    }

    /// Remove a runtime directory with everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but can't be removed.
    pub fn remove_dir(&self, id: &str) -> KennelResult<()> {
        let dir = self.container_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(container_id = %id, path = %dir.display(), "Removed runtime directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// IDs of all containers, sorted. Hidden entries are skipped, and so are
    /// names that are not UTF-8, with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime root exists but can't be read.
    pub fn list(&self) -> KennelResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            match file_name.to_str() {
                Some(name) if name.starts_with('.') => {}
                Some(name) => ids.push(name.to_string()),
                None => tracing::warn!(
                    root = %self.root.display(),
                    name = %file_name.to_string_lossy(),
                    "Skipping runtime directory entry with a non UTF-8 name"
                ),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::{capture_warnings, test_container};
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_snapshot() {
        let temp = tempdir().unwrap();
        let mut container = test_container(temp.path());
        container.pid = Some(4242);
        container.created_at = Some(chrono::Utc::now());
        let manager = StateManager::new(temp.path().join("run"));

        manager.save(&container).unwrap();
        let snapshot = container.runtime_path(files::SNAPSHOT);
        let mode = std::fs::metadata(&snapshot).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o440);

        let loaded = manager.load("c1").unwrap();
        assert_eq!(loaded.id, container.id);
        assert_eq!(loaded.pid, Some(4242));
        assert_eq!(loaded.created_at, container.created_at);
        assert_eq!(loaded.cgroup_dir, "kennel/c1");
    }

    #[test]
    fn snapshot_is_written_once() {
        let temp = tempdir().unwrap();
        let container = test_container(temp.path());
        let manager = StateManager::new(temp.path().join("run"));

        manager.save(&container).unwrap();
        assert!(manager.save(&container).is_err());
    }

    #[test]
    fn missing_container() {
        let temp = tempdir().unwrap();
        let manager = StateManager::new(temp.path());
        assert!(manager.load("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn exclusive_create() {
        let temp = tempdir().unwrap();
        let manager = StateManager::new(temp.path().join("run"));
        let id = ContainerId::new("web").unwrap();

        let dir = manager.create_dir(&id).unwrap();
        assert!(dir.is_dir());
        assert!(matches!(
            manager.create_dir(&id),
            Err(KennelError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn list_containers() {
        let temp = tempdir().unwrap();
        let manager = StateManager::new(temp.path().join("run"));
        assert!(manager.list().unwrap().is_empty());

        for id in ["web", "db", "cache"] {
            manager.create_dir(&ContainerId::new(id).unwrap()).unwrap();
        }
        std::fs::create_dir(temp.path().join("run/.lock")).unwrap();

        assert_eq!(manager.list().unwrap(), vec!["cache", "db", "web"]);
    }

    #[test]
    fn list_reports_non_utf8_names() {
        let temp = tempdir().unwrap();
        let manager = StateManager::new(temp.path().join("run"));
        manager.create_dir(&ContainerId::new("web").unwrap()).unwrap();
        std::fs::create_dir(temp.path().join("run").join(OsStr::from_bytes(b"bad\xff"))).unwrap();

        let (ids, logs) = capture_warnings(|| manager.list());
        assert_eq!(ids.unwrap(), vec!["web"]);
        assert!(logs.contains("non UTF-8 name"));
        assert!(logs.contains("bad\u{FFFD}"));
    }

    #[test]
    fn remove_runtime_dir() {
        let temp = tempdir().unwrap();
        let manager = StateManager::new(temp.path().join("run"));
        let id = ContainerId::new("web").unwrap();
        let dir = manager.create_dir(&id).unwrap();
        std::fs::write(dir.join(files::CONFIG), "lxc.uts.name = web\n").unwrap();

        manager.remove_dir("web").unwrap();
        assert!(!manager.exists("web"));
        manager.remove_dir("web").unwrap();
    }
}
