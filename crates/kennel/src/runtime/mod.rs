//! Container runtime core.
//!
//! This module provides the container record, the runtime settings and the
//! lifecycle operations.

mod config;
mod container;
mod lifecycle;
mod state;
mod validate;

pub use config::{ContainerLog, ContainerLogLevel, Features, RuntimeConfig, Timeouts};
pub use container::{Container, ContainerConfig, Observation};
pub use lifecycle::{AfterCreateHook, Runtime, RuntimeHooks};
pub use state::StateManager;
pub use validate::validate;
