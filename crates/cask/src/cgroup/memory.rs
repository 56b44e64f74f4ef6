//! Memory controller.

use cask_common::{CaskResult, ResourceConfig};

use super::hierarchy::CgroupHierarchy;
use super::subsystem::{Subsystem, write_control};

/// Writes `memory.limit_in_bytes`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemorySubsystem;

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn set(&self, hierarchy: &CgroupHierarchy, path: &str, res: &ResourceConfig) -> CaskResult<()> {
        if res.memory_limit.is_empty() {
            return Ok(());
        }
        let dir = self.cgroup_dir(hierarchy, path, true)?;
        write_control(self.name(), &dir, "memory.limit_in_bytes", &res.memory_limit)?;
        tracing::debug!(limit = %res.memory_limit, path, "Set memory limit");
        Ok(())
    }
}
