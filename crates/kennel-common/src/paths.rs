//! Standard filesystem paths for Kennel.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory holding one runtime directory per container.
pub static KENNEL_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KENNEL_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/run/kennel"))
});

/// Default directory containing the runtime helper executables.
pub static KENNEL_LIBEXEC: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("KENNEL_LIBEXEC")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/libexec/kennel"))
});

/// Monitor executable, started once per container.
pub const EXEC_START: &str = "kennel-start";
/// Mount hook executable run by the backend inside the container namespaces.
pub const EXEC_HOOK: &str = "kennel-hook";
/// Container init executable, bind mounted into the container.
pub const EXEC_INIT: &str = "kennel-init";

/// Files inside a container runtime directory.
pub mod files {
    /// Compiled backend configuration.
    pub const CONFIG: &str = "config";
    /// Recovery snapshot of the container record.
    pub const SNAPSHOT: &str = "kennel.json";
    /// Device table consumed by the mount hook.
    pub const DEVICES: &str = "devices.txt";
    /// Masked paths consumed by the mount hook.
    pub const MASKED: &str = "masked.txt";
    /// Seccomp profile in backend format.
    pub const SECCOMP: &str = "seccomp.conf";
    /// FIFO used to release the init process.
    pub const SYNC_FIFO: &str = "syncfifo";
    /// NUL separated container process arguments.
    pub const CMDLINE: &str = "cmdline";
    /// NUL separated container process environment.
    pub const ENVIRON: &str = "environ";
    /// Bind mount target for the init executable.
    pub const INIT: &str = "init";
}

/// Standard paths used by the Kennel runtime.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct KennelPaths {
    /// Runtime root (default: /run/kennel).
    pub root: PathBuf,
    /// Helper executables (default: /usr/libexec/kennel).
    pub libexec: PathBuf,
}

impl KennelPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of a helper executable.
    #[must_use]
    pub fn libexec(&self, name: &str) -> PathBuf {
        self.libexec.join(name)
    }
}

impl Default for KennelPaths {
    fn default() -> Self {
        Self {
            root: KENNEL_ROOT.clone(),
            libexec: KENNEL_LIBEXEC.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libexec_path() {
        let paths = KennelPaths {
            root: PathBuf::from("/run/kennel"),
            libexec: PathBuf::from("/opt/kennel/libexec"),
        };
        assert_eq!(
            paths.libexec(EXEC_START),
            PathBuf::from("/opt/kennel/libexec/kennel-start")
        );
    }
}
