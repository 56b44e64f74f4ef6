//! Resource limits written through the cgroup manager.

use cask::cgroup::{CgroupHierarchy, CgroupManager, TASKS_FILE};
use cask_common::ResourceConfig;
use tempfile::TempDir;

fn manager(root: &TempDir, id: &str) -> CgroupManager {
    CgroupManager::with_hierarchy(
        CgroupManager::container_path(id),
        CgroupHierarchy::Fixed(root.path().to_path_buf()),
    )
}

#[test_log::test]
fn memory_limit_and_tasks_are_written() {
    let root = TempDir::new().unwrap();
    let cgroup = manager(&root, "0123456789");

    cgroup
        .set(&ResourceConfig::new().with_memory_limit("100m"))
        .unwrap();
    cgroup.apply(4242).unwrap();

    let memory = root.path().join("memory/cask/0123456789");
    assert_eq!(
        std::fs::read_to_string(memory.join("memory.limit_in_bytes")).unwrap(),
        "100m"
    );
    for subsystem in ["cpuset", "memory", "cpu"] {
        let tasks = root.path().join(subsystem).join("cask/0123456789").join(TASKS_FILE);
        assert_eq!(std::fs::read_to_string(tasks).unwrap(), "4242");
    }
    assert!(!root.path().join("cpu/cask/0123456789/cpu.shares").exists());
    assert!(!root.path().join("cpuset/cask/0123456789/cpuset.cpus").exists());
}

#[test_log::test]
fn every_configured_limit_lands_in_its_controller() {
    let root = TempDir::new().unwrap();
    let cgroup = manager(&root, "9876543210");

    cgroup
        .set(
            &ResourceConfig::new()
                .with_memory_limit("64m")
                .with_cpu_share("512")
                .with_cpu_set("0-1"),
        )
        .unwrap();

    let read = |path: &str| std::fs::read_to_string(root.path().join(path)).unwrap();
    assert_eq!(read("memory/cask/9876543210/memory.limit_in_bytes"), "64m");
    assert_eq!(read("cpu/cask/9876543210/cpu.shares"), "512");
    assert_eq!(read("cpuset/cask/9876543210/cpuset.cpus"), "0-1");
}

#[test_log::test]
fn destroy_removes_every_controller_directory() {
    let root = TempDir::new().unwrap();
    let cgroup = manager(&root, "0123456789");
    cgroup.apply(1).unwrap();

    cgroup.destroy();
    for subsystem in ["cpuset", "memory", "cpu"] {
        assert!(!root.path().join(subsystem).join("cask/0123456789").exists());
        assert!(root.path().join(subsystem).join("cask").exists());
    }

    // a second destroy finds nothing to do
    cgroup.destroy();
}

#[test]
#[ignore = "requires root and cgroup v1 memory controller"]
fn memory_limit_on_host_hierarchy() {
    let cgroup = CgroupManager::new(CgroupManager::container_path("cask-test"));
    cgroup
        .set(&ResourceConfig::new().with_memory_limit("100m"))
        .unwrap();
    cgroup.apply(std::process::id()).unwrap();

    let dir = CgroupHierarchy::MountInfo
        .cgroup_path("memory", cgroup.path(), false)
        .unwrap();
    let limit = std::fs::read_to_string(dir.join("memory.limit_in_bytes")).unwrap();
    assert_eq!(limit.trim(), (100 * 1024 * 1024).to_string());

    // move back out before removing
    let root = CgroupHierarchy::MountInfo.mount_point("memory").unwrap();
    std::fs::write(root.join(TASKS_FILE), std::process::id().to_string()).unwrap();
    cgroup.destroy();
}
