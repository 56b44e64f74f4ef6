//! CPU set controller.

use std::path::{Path, PathBuf};

use cask_common::{CaskResult, ResourceConfig};

use super::hierarchy::CgroupHierarchy;
use super::subsystem::{Subsystem, write_control};

/// Files a new cpuset cgroup must have populated before it accepts tasks.
const INHERITED_FILES: [&str; 2] = ["cpuset.cpus", "cpuset.mems"];

/// Writes `cpuset.cpus`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpusetSubsystem;

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn cgroup_dir(
        &self,
        hierarchy: &CgroupHierarchy,
        path: &str,
        auto_create: bool,
    ) -> CaskResult<PathBuf> {
        let dir = hierarchy.cgroup_path(self.name(), path, auto_create)?;
        if auto_create {
            inherit_from_parents(&hierarchy.mount_point(self.name())?, path)?;
        }
        Ok(dir)
    }

    fn set(&self, hierarchy: &CgroupHierarchy, path: &str, res: &ResourceConfig) -> CaskResult<()> {
        if res.cpu_set.is_empty() {
            return Ok(());
        }
        let dir = self.cgroup_dir(hierarchy, path, true)?;
        write_control(self.name(), &dir, "cpuset.cpus", &res.cpu_set)?;
        tracing::debug!(cpus = %res.cpu_set, path, "Set cpuset");
        Ok(())
    }
}

/// Copy empty `cpuset.cpus`/`cpuset.mems` from the parent, level by level
/// from `root` down to `path`.
fn inherit_from_parents(root: &Path, path: &str) -> CaskResult<()> {
    let mut parent = root.to_path_buf();
    for component in Path::new(path).components() {
        let child = parent.join(component);
        for file in INHERITED_FILES {
            let empty = std::fs::read_to_string(child.join(file))
                .map(|v| v.trim().is_empty())
                .unwrap_or(false);
            if !empty {
                continue;
            }
            let value = std::fs::read_to_string(parent.join(file))?;
            write_control("cpuset", &child, file, value.trim())?;
        }
        parent = child;
    }
    Ok(())
}
