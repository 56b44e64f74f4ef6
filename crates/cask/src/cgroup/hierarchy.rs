//! Locating cgroup v1 controller hierarchies.

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use cask_common::{CaskError, CaskResult};

/// Mount table of the calling process.
const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Where controller hierarchies are mounted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CgroupHierarchy {
    /// Look controllers up in `/proc/self/mountinfo`.
    #[default]
    MountInfo,
    /// Every controller lives at `<root>/<controller>`.
    Fixed(PathBuf),
}

impl CgroupHierarchy {
    /// Mount point of the `subsystem` hierarchy.
    ///
    /// # Errors
    ///
    /// Fails when the mount table cannot be read or has no such controller.
    pub fn mount_point(&self, subsystem: &str) -> CaskResult<PathBuf> {
        match self {
            Self::Fixed(root) => Ok(root.join(subsystem)),
            Self::MountInfo => {
                let content = std::fs::read_to_string(MOUNTINFO)
                    .map_err(|e| CaskError::io_context(format!("read {MOUNTINFO}"), e))?;
                parse_mountpoint(&content, subsystem).ok_or_else(|| CaskError::CgroupPath {
                    subsystem: subsystem.to_string(),
                    message: "controller is not mounted".to_string(),
                })
            }
        }
    }

    /// Directory of cgroup `path` in the `subsystem` hierarchy.
    ///
    /// With `auto_create` the directory and its parents are created with
    /// mode 0755; otherwise a missing directory is an error.
    ///
    /// # Errors
    ///
    /// Fails when the hierarchy is not mounted, or the directory is missing
    /// and cannot (or may not) be created.
    pub fn cgroup_path(&self, subsystem: &str, path: &str, auto_create: bool) -> CaskResult<PathBuf> {
        let dir = self.mount_point(subsystem)?.join(path);
        if dir.is_dir() {
            return Ok(dir);
        }
        if !auto_create {
            return Err(CaskError::CgroupPath {
                subsystem: subsystem.to_string(),
                message: format!("{} does not exist", dir.display()),
            });
        }

        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&dir)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    CaskError::PermissionDenied {
                        operation: format!("create cgroup {}", dir.display()),
                    }
                } else {
                    CaskError::CgroupPath {
                        subsystem: subsystem.to_string(),
                        message: format!("create {}: {e}", dir.display()),
                    }
                }
            })?;

        tracing::debug!(subsystem, path = %dir.display(), "Created cgroup");
        Ok(dir)
    }
}

/// Find the mount point of `subsystem` in mountinfo `content`.
///
/// A line matches when its last field, the super options, lists the
/// subsystem; the mount point is the fifth field.
#[must_use]
pub fn parse_mountpoint(content: &str, subsystem: &str) -> Option<PathBuf> {
    content.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let options = fields.last()?;
        options
            .split(',')
            .any(|opt| opt == subsystem)
            .then(|| fields.get(4).map(PathBuf::from))
            .flatten()
    })
}

/// Remove a cgroup directory, children first.
///
/// cgroupfs rejects unlinking its control files, so file removal errors are
/// ignored and only directory removal is checked.
pub(crate) fn remove_cgroup_dir(dir: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(dir).contents_first(true) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())?;
        } else {
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MOUNTINFO_SAMPLE: &str = "\
25 30 0:23 / /sys rw,nosuid,nodev,noexec,relatime shared:7 - sysfs sysfs rw
33 25 0:28 / /sys/fs/cgroup ro,nosuid,nodev,noexec shared:9 - tmpfs tmpfs ro,mode=755
36 33 0:31 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid,nodev,noexec,relatime shared:15 - cgroup cgroup rw,cpu,cpuacct
37 33 0:32 / /sys/fs/cgroup/cpuset rw,nosuid,nodev,noexec,relatime shared:16 - cgroup cgroup rw,cpuset
38 33 0:33 / /sys/fs/cgroup/memory rw,nosuid,nodev,noexec,relatime shared:17 - cgroup cgroup rw,memory
";

    #[test]
    fn test_parse_mountpoint() {
        assert_eq!(
            parse_mountpoint(MOUNTINFO_SAMPLE, "memory"),
            Some(PathBuf::from("/sys/fs/cgroup/memory"))
        );
        assert_eq!(
            parse_mountpoint(MOUNTINFO_SAMPLE, "cpu"),
            Some(PathBuf::from("/sys/fs/cgroup/cpu,cpuacct"))
        );
        assert_eq!(
            parse_mountpoint(MOUNTINFO_SAMPLE, "cpuset"),
            Some(PathBuf::from("/sys/fs/cgroup/cpuset"))
        );
        assert_eq!(parse_mountpoint(MOUNTINFO_SAMPLE, "pids"), None);
        assert_eq!(parse_mountpoint("", "memory"), None);
    }

    #[test]
    fn test_cgroup_path_auto_create() {
        let dir = tempdir().unwrap();
        let hierarchy = CgroupHierarchy::Fixed(dir.path().to_path_buf());

        assert!(matches!(
            hierarchy.cgroup_path("memory", "cask/c1", false),
            Err(CaskError::CgroupPath { .. })
        ));

        let path = hierarchy.cgroup_path("memory", "cask/c1", true).unwrap();
        assert_eq!(path, dir.path().join("memory/cask/c1"));
        assert!(path.is_dir());

        assert_eq!(hierarchy.cgroup_path("memory", "cask/c1", false).unwrap(), path);
    }

    #[test]
    fn test_remove_cgroup_dir_children_first() {
        let dir = tempdir().unwrap();
        let cgroup = dir.path().join("cask/c1");
        std::fs::create_dir_all(cgroup.join("child")).unwrap();
        std::fs::write(cgroup.join("tasks"), "1\n").unwrap();
        std::fs::write(cgroup.join("child/tasks"), "").unwrap();

        remove_cgroup_dir(&cgroup).unwrap();
        assert!(!cgroup.exists());
        assert!(dir.path().join("cask").exists());
    }
}
