//! `cgroup.events` parsing.

use kennel_common::{KennelError, KennelResult};

/// Contents of a cgroup's `cgroup.events` file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CgroupEvents {
    /// The cgroup or one of its descendants contains live processes.
    pub populated: bool,
    /// The cgroup is frozen.
    pub frozen: bool,
}

impl CgroupEvents {
    /// Parse the `key value` lines of `cgroup.events`.
    ///
    /// Unknown keys are ignored, newer kernels add fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a known key has a value other than `0` or `1`.
    pub fn parse(content: &str) -> KennelResult<Self> {
        let mut events = Self::default();
        for line in content.lines() {
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            let slot = match key {
                "populated" => &mut events.populated,
                "frozen" => &mut events.frozen,
                _ => continue,
            };
            *slot = match value.trim() {
                "0" => false,
                "1" => true,
                other => {
                    return Err(KennelError::Internal {
                        message: format!("invalid cgroup.events value {other:?} for {key}"),
                    });
                }
            };
        }
        Ok(events)
    }
}
