//! OverlayFS merge mount.

use std::path::PathBuf;

use cask_common::{CaskError, CaskResult};

use super::mounts::{self, MountOptions};

/// One read-only layer under one writable layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayFs {
    /// Read-only image layer.
    pub lower_dir: PathBuf,
    /// Writable layer.
    pub upper_dir: PathBuf,
    /// Work directory (required by overlayfs).
    pub work_dir: PathBuf,
    /// Merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayFs {
    /// Create a new OverlayFS configuration.
    pub fn new(
        lower_dir: impl Into<PathBuf>,
        upper_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        merged_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lower_dir: lower_dir.into(),
            upper_dir: upper_dir.into(),
            work_dir: work_dir.into(),
            merged_dir: merged_dir.into(),
        }
    }

    /// The `lowerdir=..,upperdir=..,workdir=..` mount data.
    #[must_use]
    pub fn mount_options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }

    /// Create the merge directory and mount the overlay on it.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or the mount fails.
    pub fn mount(&self) -> CaskResult<()> {
        std::fs::create_dir_all(&self.merged_dir).map_err(|e| {
            CaskError::io_context(format!("create {}", self.merged_dir.display()), e)
        })?;

        let options = self.mount_options();
        mounts::mount(
            "overlay",
            &self.merged_dir,
            "overlay",
            &MountOptions::default(),
            Some(&options),
        )?;

        tracing::info!(merged = %self.merged_dir.display(), "OverlayFS mounted");
        Ok(())
    }

    /// Unmount the merge directory.
    ///
    /// # Errors
    ///
    /// Fails when the kernel refuses the unmount.
    pub fn unmount(&self) -> CaskResult<()> {
        mounts::unmount(&self.merged_dir, false)?;
        tracing::debug!(merged = %self.merged_dir.display(), "OverlayFS unmounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_mount_options() {
        let overlay = OverlayFs::new("/root/busybox", "/root/writeLayer/c1", "/root/work/c1", "/root/mnt/c1");
        assert_eq!(
            overlay.mount_options(),
            "lowerdir=/root/busybox,upperdir=/root/writeLayer/c1,workdir=/root/work/c1"
        );
    }
}
