//! CPU share controller.

use cask_common::{CaskResult, ResourceConfig};

use super::hierarchy::CgroupHierarchy;
use super::subsystem::{Subsystem, write_control};

/// Writes `cpu.shares`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuSubsystem;

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn set(&self, hierarchy: &CgroupHierarchy, path: &str, res: &ResourceConfig) -> CaskResult<()> {
        if res.cpu_share.is_empty() {
            return Ok(());
        }
        let dir = self.cgroup_dir(hierarchy, path, true)?;
        write_control(self.name(), &dir, "cpu.shares", &res.cpu_share)?;
        tracing::debug!(shares = %res.cpu_share, path, "Set cpu shares");
        Ok(())
    }
}
