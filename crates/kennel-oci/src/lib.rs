//! # kennel-oci
//!
//! OCI (Open Container Initiative) specification types for Kennel.
//!
//! This crate provides Rust types for:
//! - OCI Runtime Specification (config.json)
//! - Container state as reported by `kennel state`

#![warn(missing_docs)]

pub mod runtime;
pub mod state;

pub use runtime::Spec;
pub use state::{ContainerState, ContainerStatus};
