//! Cgroup v1 resource limits.
//!
//! A [`CgroupManager`] fans every operation out to the registered
//! [`Subsystem`]s for a single cgroup path such as `cask/<id>`.

mod cpu;
mod cpuset;
mod hierarchy;
mod manager;
mod memory;
mod subsystem;

pub use cpu::CpuSubsystem;
pub use cpuset::CpusetSubsystem;
pub use hierarchy::{CgroupHierarchy, parse_mountpoint};
pub use manager::{CGROUP_PARENT, CgroupManager, default_subsystems};
pub use memory::MemorySubsystem;
pub use subsystem::{Subsystem, TASKS_FILE};
