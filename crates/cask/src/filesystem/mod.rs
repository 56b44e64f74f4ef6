//! Filesystem operations for containers.
//!
//! This module handles:
//! - Image layers and the per-container workspace
//! - OverlayFS and volume mounts
//! - pivot_root

mod archive;
mod mounts;
mod overlay;
mod pivot;
mod volume;
mod workspace;

pub use archive::{extract, pack};
pub use mounts::{MountOptions, bind_mount, is_mount_point, make_private, mount, unmount};
pub use overlay::OverlayFs;
pub use pivot::pivot_root;
pub use volume::VolumeSpec;
pub use workspace::{Workspace, commit};
