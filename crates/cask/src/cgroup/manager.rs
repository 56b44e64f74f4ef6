//! Cgroup manager implementation.

use cask_common::{CaskResult, ResourceConfig};

use super::cpu::CpuSubsystem;
use super::cpuset::CpusetSubsystem;
use super::hierarchy::CgroupHierarchy;
use super::memory::MemorySubsystem;
use super::subsystem::Subsystem;

/// Parent cgroup of every container.
pub const CGROUP_PARENT: &str = "cask";

/// The registered controllers, in the order they are applied.
#[must_use]
pub fn default_subsystems() -> Vec<Box<dyn Subsystem>> {
    vec![
        Box::new(CpusetSubsystem),
        Box::new(MemorySubsystem),
        Box::new(CpuSubsystem),
    ]
}

/// Manages one cgroup path across every registered controller.
pub struct CgroupManager {
    /// Path relative to each hierarchy root.
    path: String,
    hierarchy: CgroupHierarchy,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl std::fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupManager")
            .field("path", &self.path)
            .field("hierarchy", &self.hierarchy)
            .field(
                "subsystems",
                &self.subsystems.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl CgroupManager {
    /// Manager for `path` on the mounted hierarchies.
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_hierarchy(path, CgroupHierarchy::MountInfo)
    }

    /// Manager for `path` on an explicit hierarchy.
    pub fn with_hierarchy(path: impl Into<String>, hierarchy: CgroupHierarchy) -> Self {
        Self {
            path: path.into(),
            hierarchy,
            subsystems: default_subsystems(),
        }
    }

    /// Cgroup path of a container: `cask/<id>`.
    #[must_use]
    pub fn container_path(container_id: &str) -> String {
        format!("{CGROUP_PARENT}/{container_id}")
    }

    /// The managed path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Add `pid` to the cgroup of every controller, stopping at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns the first controller error.
    pub fn apply(&self, pid: u32) -> CaskResult<()> {
        for subsystem in &self.subsystems {
            subsystem.apply(&self.hierarchy, &self.path, pid)?;
        }
        tracing::debug!(path = %self.path, pid, "Process attached to cgroups");
        Ok(())
    }

    /// Write every configured limit. Empty fields are left alone.
    ///
    /// # Errors
    ///
    /// Returns the first controller error.
    pub fn set(&self, res: &ResourceConfig) -> CaskResult<()> {
        for subsystem in &self.subsystems {
            subsystem.set(&self.hierarchy, &self.path, res)?;
        }
        Ok(())
    }

    /// Remove the cgroup from every controller. Failures are logged and the
    /// remaining controllers are still cleaned up.
    pub fn destroy(&self) {
        for subsystem in &self.subsystems {
            if let Err(e) = subsystem.remove(&self.hierarchy, &self.path) {
                tracing::warn!(
                    subsystem = subsystem.name(),
                    path = %self.path,
                    error = %e,
                    "Failed to remove cgroup"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixed(dir: &tempfile::TempDir) -> CgroupHierarchy {
        CgroupHierarchy::Fixed(dir.path().to_path_buf())
    }

    #[test]
    fn test_subsystem_order() {
        let names: Vec<_> = default_subsystems().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["cpuset", "memory", "cpu"]);
    }

    #[test]
    fn test_set_writes_only_configured_limits() {
        let dir = tempdir().unwrap();
        let manager = CgroupManager::with_hierarchy("cask/c1", fixed(&dir));

        manager
            .set(&ResourceConfig::new().with_memory_limit("100m"))
            .unwrap();

        let memory = dir.path().join("memory/cask/c1/memory.limit_in_bytes");
        assert_eq!(std::fs::read_to_string(memory).unwrap(), "100m");
        assert!(!dir.path().join("cpu/cask/c1/cpu.shares").exists());
        assert!(!dir.path().join("cpuset/cask/c1/cpuset.cpus").exists());
    }

    #[test]
    fn test_set_cpu_share_and_cpuset() {
        let dir = tempdir().unwrap();
        let manager = CgroupManager::with_hierarchy("cask/c2", fixed(&dir));

        manager
            .set(&ResourceConfig::new().with_cpu_share("512").with_cpu_set("0-1"))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("cpu/cask/c2/cpu.shares")).unwrap(),
            "512"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("cpuset/cask/c2/cpuset.cpus")).unwrap(),
            "0-1"
        );
        assert!(!dir.path().join("memory/cask/c2/memory.limit_in_bytes").exists());
    }

    #[test]
    fn test_apply_writes_tasks_everywhere() {
        let dir = tempdir().unwrap();
        let manager = CgroupManager::with_hierarchy("cask/c3", fixed(&dir));

        manager.apply(4242).unwrap();
        manager.apply(4242).unwrap();

        for subsystem in ["cpuset", "memory", "cpu"] {
            let tasks = dir.path().join(subsystem).join("cask/c3/tasks");
            assert_eq!(std::fs::read_to_string(tasks).unwrap(), "4242");
        }
    }

    #[test]
    fn test_cpuset_inherits_parent_values() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("cpuset");
        std::fs::create_dir_all(root.join("cask/c4")).unwrap();
        std::fs::write(root.join("cpuset.cpus"), "0-3\n").unwrap();
        std::fs::write(root.join("cpuset.mems"), "0\n").unwrap();
        for file in ["cpuset.cpus", "cpuset.mems"] {
            std::fs::write(root.join("cask").join(file), "").unwrap();
            std::fs::write(root.join("cask/c4").join(file), "\n").unwrap();
        }

        let manager = CgroupManager::with_hierarchy("cask/c4", fixed(&dir));
        manager.apply(1).unwrap();

        assert_eq!(std::fs::read_to_string(root.join("cask/cpuset.cpus")).unwrap(), "0-3");
        assert_eq!(std::fs::read_to_string(root.join("cask/c4/cpuset.mems")).unwrap(), "0");
    }

    #[test]
    fn test_destroy_removes_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let manager = CgroupManager::with_hierarchy("cask/c5", fixed(&dir));
        manager.apply(7).unwrap();

        manager.destroy();
        for subsystem in ["cpuset", "memory", "cpu"] {
            assert!(!dir.path().join(subsystem).join("cask/c5").exists());
        }

        manager.destroy();
    }

    #[test]
    fn test_container_path() {
        assert_eq!(CgroupManager::container_path("0123456789"), "cask/0123456789");
    }
}
