//! # Kennel Container Runtime
//!
//! Kennel is an OCI runtime that drives an LXC-style backend. It compiles a
//! bundle's `config.json` into the backend's `key = value` configuration,
//! starts the backend monitor and reads the container status back from the
//! monitor process and the container cgroup.
//!
//! ## Usage
//!
//! ```no_run
//! use kennel::runtime::{ContainerConfig, Runtime, RuntimeConfig};
//! use kennel_common::ContainerId;
//!
//! # async fn example() -> kennel_common::KennelResult<()> {
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//!
//! let config = ContainerConfig::from_bundle(ContainerId::new("web")?, "/bundles/web")?;
//! let container = runtime.create(config).await?;
//! runtime.start(&container).await?;
//!
//! runtime.kill(&container, libc::SIGTERM)?;
//! runtime.delete("web", false).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod compiler;
pub mod exec;
pub mod filesystem;
pub mod namespace;
pub mod runtime;
pub mod security;

pub use runtime::{Container, Runtime};
