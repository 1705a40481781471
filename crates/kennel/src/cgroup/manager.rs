//! Cgroup manager implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kennel_common::{ContainerId, KennelError, KennelResult};
use kennel_oci::Spec;
use kennel_oci::runtime::DeviceCgroup;
use tokio::time::Instant;

use super::CgroupEvents;
use super::resources;
use crate::compiler::CompiledConfig;
use crate::runtime::RuntimeConfig;

/// Default cgroup root path.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Interval between two reads of `cgroup.events` and other polled state.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Manages container cgroups below the unified hierarchy.
///
/// The root is resolved once and never changes for the lifetime of the
/// manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupManager {
    root: PathBuf,
}

impl CgroupManager {
    /// Use the cgroup2 mount of the calling process.
    ///
    /// Falls back to `/sys/fs/cgroup` when no cgroup2 mount is found.
    #[must_use]
    pub fn detect() -> Self {
        let root = match std::fs::read_to_string("/proc/self/mountinfo") {
            Ok(mountinfo) => parse_cgroup2_mount(&mountinfo),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read mountinfo");
                None
            }
        };
        let root = root.unwrap_or_else(|| {
            tracing::warn!(default = CGROUP_ROOT, "cgroup2 mount not found, using default");
            PathBuf::from(CGROUP_ROOT)
        });
        tracing::info!(root = %root.display(), "Using cgroup root");
        Self { root }
    }

    /// Use a fixed cgroup root.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cgroup root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a cgroup directory relative to the root.
    #[must_use]
    pub fn path(&self, dir: &str) -> PathBuf {
        self.root.join(dir.trim_start_matches('/'))
    }

    /// Emit the cgroup directives for a container.
    ///
    /// Device rules are only emitted when the `cgroup_devices` feature is
    /// enabled.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid rules or limits.
    pub fn configure(
        &self,
        config: &mut CompiledConfig,
        settings: &RuntimeConfig,
        dir: &str,
        spec: &Spec,
        device_rules: &[DeviceCgroup],
    ) -> KennelResult<()> {
        config.set("lxc.cgroup.relative", "0")?;

        let monitor = settings
            .monitor_cgroup
            .clone()
            .unwrap_or_else(|| format!("{dir}/monitor"));
        config.set("lxc.cgroup.dir.monitor", monitor)?;
        config.set("lxc.cgroup.dir.container", dir)?;

        if settings.features.cgroup_devices {
            for rule in device_rules {
                let (key, value) = resources::device_rule(rule)?;
                config.set(key, value)?;
            }
        } else {
            tracing::warn!("cgroup_devices feature is disabled - access to all devices is granted");
        }

        if let Some(res) = spec.linux().and_then(|l| l.resources.as_ref()) {
            for (file, value) in resources::limits(res)? {
                config.set(format!("lxc.cgroup2.{file}"), value)?;
            }
        }
        Ok(())
    }

    /// PIDs listed in `cgroup.procs`. A missing cgroup has no processes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but can't be read.
    pub fn procs(&self, dir: &str) -> KennelResult<Vec<i32>> {
        let path = self.path(dir).join("cgroup.procs");
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    /// Poll `cgroup.events` until `done` accepts the events.
    ///
    /// A missing events file counts as done, the cgroup is already gone.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::Timeout`] when the deadline passes first.
    pub async fn wait_events<F>(&self, dir: &str, deadline: Instant, done: F) -> KennelResult<()>
    where
        F: Fn(&CgroupEvents) -> bool,
    {
        let path = self.path(dir).join("cgroup.events");
        loop {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    if done(&CgroupEvents::parse(&content)?) {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(KennelError::timeout(format!(
                    "waiting for {}",
                    path.display()
                )));
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + POLL_INTERVAL)).await;
        }
    }

    /// Wait until no process is left in the cgroup subtree.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::Timeout`] when the deadline passes first.
    pub async fn wait_drained(&self, dir: &str, deadline: Instant) -> KennelResult<()> {
        self.wait_events(dir, deadline, |ev| !ev.populated).await
    }

    /// Remove a cgroup and all child cgroups, deepest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory can't be removed, e.g. while it
    /// still contains processes.
    pub fn delete(&self, dir: &str) -> KennelResult<()> {
        let path = self.path(dir);
        if !path.exists() {
            return Ok(());
        }
        for entry in walkdir::WalkDir::new(&path).contents_first(true) {
            let entry = entry.map_err(|e| KennelError::Io(e.into()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            match std::fs::remove_dir(entry.path()) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(path = %path.display(), "Deleted cgroup");
        Ok(())
    }
}

/// Cgroup directory of a container, relative to the cgroup root.
///
/// `slice:prefix:name` paths use the systemd naming scheme and map to
/// `slice/prefix-name.scope`.
#[must_use]
pub fn cgroup_dir(id: &ContainerId, spec: &Spec) -> String {
    let Some(path) = spec.linux().and_then(|l| l.cgroups_path.as_deref()) else {
        return format!("kennel/{id}");
    };
    if path.is_empty() {
        return format!("kennel/{id}");
    }
    let parts: Vec<&str> = path.split(':').collect();
    if let [slice, prefix, name] = parts.as_slice() {
        return format!("{slice}/{prefix}-{name}.scope");
    }
    path.trim_start_matches('/').to_string()
}

/// Mount point of the cgroup2 filesystem in `/proc/<pid>/mountinfo` format.
fn parse_cgroup2_mount(mountinfo: &str) -> Option<PathBuf> {
    mountinfo.lines().find_map(|line| {
        let (mount, fs) = line.split_once(" - ")?;
        let fstype = fs.split_whitespace().next()?;
        if fstype != "cgroup2" {
            return None;
        }
        mount.split_whitespace().nth(4).map(PathBuf::from)
    })
}
