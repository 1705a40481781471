//! # kennel-common
//!
//! Shared utilities and types for the Kennel container runtime.
//!
//! This crate provides common functionality used across all Kennel crates:
//! - Container ID validation
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{KennelError, KennelResult};
pub use id::ContainerId;
pub use paths::KennelPaths;
