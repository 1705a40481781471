//! The OCI state document printed by `kennel state` and fed to hooks.
//!
//! <https://github.com/opencontainers/runtime-spec/blob/main/runtime.md#state>

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::runtime::OCI_VERSION;

/// Container runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// OCI version.
    pub oci_version: String,
    /// Container ID.
    pub id: String,
    /// Container status.
    pub status: ContainerStatus,
    /// Process ID of the container init process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    /// Path to the OCI bundle.
    pub bundle: PathBuf,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Container status values.
///
/// `Stopped` is terminal: no operation moves a container out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The monitor is running but the init process is not ready yet.
    Creating,
    /// The init process waits for `start`.
    Created,
    /// The container process is running.
    Running,
    /// The monitor process has exited.
    Stopped,
}

impl ContainerStatus {
    /// Only a created container can be started.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self, Self::Created)
    }

    /// Anything but a stopped container can be signalled.
    #[must_use]
    pub const fn can_kill(&self) -> bool {
        !self.is_stopped()
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl ContainerState {
    /// A state report without pid or annotations.
    #[must_use]
    pub fn new(id: impl Into<String>, bundle: impl Into<PathBuf>, status: ContainerStatus) -> Self {
        Self {
            oci_version: OCI_VERSION.to_string(),
            id: id.into(),
            status,
            pid: None,
            bundle: bundle.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// Set the reported process ID.
    #[must_use]
    pub const fn with_pid(mut self, pid: Option<i32>) -> Self {
        self.pid = pid;
        self
    }

    /// Set the annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }
}
