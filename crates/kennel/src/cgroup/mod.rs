//! Cgroup v2 management.
//!
//! Containers live below the unified hierarchy. The backend creates the
//! cgroups from the compiled directives; this module names them, reads their
//! state and removes them after the container is gone.

mod events;
mod manager;
mod resources;

pub use events::CgroupEvents;
pub use manager::{CgroupManager, cgroup_dir};
pub(crate) use manager::POLL_INTERVAL;
