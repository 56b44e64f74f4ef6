//! Resource controller abstraction.

use std::path::PathBuf;

use cask_common::{CaskError, CaskResult, ResourceConfig};

use super::hierarchy::{CgroupHierarchy, remove_cgroup_dir};

/// Task list file of a v1 cgroup.
pub const TASKS_FILE: &str = "tasks";

/// One cgroup v1 controller.
///
/// `path` is relative to the controller's hierarchy root, e.g.
/// `cask/0123456789`.
pub trait Subsystem: Send + Sync {
    /// Controller name as it appears in the mount options.
    fn name(&self) -> &'static str;

    /// Write this controller's limit from `res`, if one is configured.
    ///
    /// # Errors
    ///
    /// Fails when the cgroup cannot be resolved or the limit is rejected.
    fn set(&self, hierarchy: &CgroupHierarchy, path: &str, res: &ResourceConfig) -> CaskResult<()>;

    /// Resolve the cgroup directory.
    ///
    /// # Errors
    ///
    /// See [`CgroupHierarchy::cgroup_path`].
    fn cgroup_dir(
        &self,
        hierarchy: &CgroupHierarchy,
        path: &str,
        auto_create: bool,
    ) -> CaskResult<PathBuf> {
        hierarchy.cgroup_path(self.name(), path, auto_create)
    }

    /// Move `pid` into the cgroup.
    ///
    /// # Errors
    ///
    /// Fails when the cgroup cannot be resolved or the task file write fails.
    fn apply(&self, hierarchy: &CgroupHierarchy, path: &str, pid: u32) -> CaskResult<()> {
        let dir = self.cgroup_dir(hierarchy, path, true)?;
        write_control(self.name(), &dir, TASKS_FILE, &pid.to_string())?;
        tracing::debug!(subsystem = self.name(), pid, path, "Process added to cgroup");
        Ok(())
    }

    /// Remove the cgroup; a missing one is not an error.
    ///
    /// # Errors
    ///
    /// Fails when the directory exists but cannot be removed.
    fn remove(&self, hierarchy: &CgroupHierarchy, path: &str) -> CaskResult<()> {
        let dir = match self.cgroup_dir(hierarchy, path, false) {
            Ok(dir) => dir,
            Err(CaskError::CgroupPath { message, .. }) => {
                tracing::debug!(subsystem = self.name(), path, message, "No cgroup to remove");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        remove_cgroup_dir(&dir).map_err(|e| CaskError::CgroupPath {
            subsystem: self.name().to_string(),
            message: format!("remove {}: {e}", dir.display()),
        })?;
        tracing::debug!(subsystem = self.name(), path, "Cgroup removed");
        Ok(())
    }
}

/// Write `value` to the control file `file` of cgroup `dir`.
pub(crate) fn write_control(
    subsystem: &str,
    dir: &std::path::Path,
    file: &str,
    value: &str,
) -> CaskResult<()> {
    let target = dir.join(file);
    std::fs::write(&target, value).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            CaskError::PermissionDenied {
                operation: format!("write {}", target.display()),
            }
        } else {
            CaskError::CgroupPath {
                subsystem: subsystem.to_string(),
                message: format!("write {value:?} to {}: {e}", target.display()),
            }
        }
    })
}
