//! # cask-common
//!
//! Shared types for the cask container runtime:
//! - Container ids and name validation
//! - Filesystem layout
//! - Container records and resource limits
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;
pub mod record;
pub mod resource;

pub use error::{CaskError, CaskResult};
pub use id::{ContainerId, validate_name};
pub use paths::CaskPaths;
pub use record::{ContainerRecord, ContainerStatus};
pub use resource::ResourceConfig;
