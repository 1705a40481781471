//! Runtime configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file,
//! then command line flags and environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kennel_common::{KennelError, KennelPaths, KennelResult};
use serde::{Deserialize, Serialize};

/// Default mount point of the container rootfs inside the backend's mount namespace.
const DEFAULT_ROOTFS_MOUNT: &str = "/var/lib/kennel/rootfs";

/// System-wide settings file.
pub const SYSTEM_SETTINGS_FILE: &str = "/etc/kennel/kennel.toml";

/// Runtime-wide settings shared by every container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime root and helper executable locations.
    pub paths: KennelPaths,
    /// Cgroup for all monitor processes. When unset every monitor is placed
    /// in a `monitor` child of its container cgroup.
    pub monitor_cgroup: Option<String>,
    /// Unified cgroup hierarchy mount point. Detected when unset.
    pub cgroup_root: Option<PathBuf>,
    /// Where the backend mounts the container rootfs.
    pub rootfs_mount: PathBuf,
    /// Security and cgroup features.
    pub features: Features,
    /// Operation deadlines.
    pub timeouts: Timeouts,
    /// Backend log settings for containers.
    pub container_log: ContainerLog,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            paths: KennelPaths::new(),
            monitor_cgroup: None,
            cgroup_root: None,
            rootfs_mount: PathBuf::from(DEFAULT_ROOTFS_MOUNT),
            features: Features::default(),
            timeouts: Timeouts::default(),
            container_log: ContainerLog::default(),
        }
    }
}

/// Runtime features. A disabled feature is always reported with a warning
/// when a container is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    /// Apply AppArmor profiles.
    pub apparmor: bool,
    /// Apply seccomp profiles.
    pub seccomp: bool,
    /// Restrict capabilities.
    pub capabilities: bool,
    /// Apply device cgroup rules.
    pub cgroup_devices: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            apparmor: true,
            seccomp: true,
            capabilities: true,
            cgroup_devices: true,
        }
    }
}

/// Operation timeouts in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Create, from validation until the container is created.
    pub create: u64,
    /// Start, until the init process is released.
    pub start: u64,
    /// Delete, bounding the monitor and cgroup waits.
    pub delete: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: 60,
            start: 30,
            delete: 10,
        }
    }
}

impl Timeouts {
    /// Longest accepted timeout, one day.
    pub const MAX_SECS: u64 = 24 * 60 * 60;

    /// Deadline for an operation starting now. Timeouts past
    /// [`Timeouts::MAX_SECS`] are clamped.
    #[must_use]
    pub fn deadline(seconds: u64) -> tokio::time::Instant {
        let now = tokio::time::Instant::now();
        now.checked_add(Duration::from_secs(seconds))
            .filter(|_| seconds <= Self::MAX_SECS)
            .unwrap_or_else(|| now + Duration::from_secs(Self::MAX_SECS))
    }

    /// Reject timeouts longer than [`Timeouts::MAX_SECS`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first offending timeout.
    pub fn validate(&self) -> KennelResult<()> {
        for (name, secs) in [("create", self.create), ("start", self.start), ("delete", self.delete)] {
            if secs > Self::MAX_SECS {
                return Err(KennelError::config(format!(
                    "timeouts.{name} = {secs} exceeds {} seconds",
                    Self::MAX_SECS
                )));
            }
        }
        Ok(())
    }
}

/// Backend log level for a container.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ContainerLogLevel {
    /// Trace.
    Trace,
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Notice.
    Notice,
    /// Warn.
    #[default]
    Warn,
    /// Error.
    Error,
    /// Critical.
    Crit,
    /// Alert.
    Alert,
    /// Fatal.
    Fatal,
}

impl ContainerLogLevel {
    /// Numeric priority understood by the backend.
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Trace => 0,
            Self::Debug => 1,
            Self::Info => 2,
            Self::Notice => 3,
            Self::Warn => 4,
            Self::Error => 5,
            Self::Crit => 6,
            Self::Alert => 7,
            Self::Fatal => 8,
        }
    }
}

/// Backend log settings for a container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerLog {
    /// Log level.
    pub level: ContainerLogLevel,
    /// Log file. The backend only logs to memory when unset.
    pub file: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Settings file used when none is given: the user's
    /// `kennel/kennel.toml` below the XDG config directory, then
    /// [`SYSTEM_SETTINGS_FILE`]. Only existing files are returned.
    #[must_use]
    pub fn default_file() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("kennel").join("kennel.toml"))
            .into_iter()
            .chain(std::iter::once(PathBuf::from(SYSTEM_SETTINGS_FILE)))
            .find(|path| path.is_file())
    }

    /// Load settings from a TOML file, falling back to defaults for
    /// missing keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or parsed.
    pub fn from_file(path: &Path) -> KennelResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KennelError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| KennelError::config(format!("invalid {}: {e}", path.display())))?;
        config.timeouts.validate()?;
        Ok(config)
    }

    /// Set the runtime root directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths.root = root.into();
        self
    }

    /// Set the helper executable directory.
    #[must_use]
    pub fn with_libexec(mut self, libexec: impl Into<PathBuf>) -> Self {
        self.paths.libexec = libexec.into();
        self
    }

    /// Use a fixed cgroup root instead of detecting it.
    #[must_use]
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = Some(root.into());
        self
    }

    /// Place all monitor processes into one cgroup.
    #[must_use]
    pub fn with_monitor_cgroup(mut self, cgroup: impl Into<String>) -> Self {
        self.monitor_cgroup = Some(cgroup.into());
        self
    }

    /// Set the runtime features.
    #[must_use]
    pub const fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Set the operation timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the container log settings.
    #[must_use]
    pub fn with_container_log(mut self, log: ContainerLog) -> Self {
        self.container_log = log;
        self
    }
}
