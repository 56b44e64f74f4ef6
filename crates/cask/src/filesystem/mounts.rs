//! Mount operations.

use std::ffi::CString;
use std::path::Path;

use cask_common::{CaskError, CaskResult};
use rustix::mount::{MountFlags, MountPropagationFlags};

/// Mount options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Read-only mount.
    pub readonly: bool,
    /// No exec.
    pub noexec: bool,
    /// No suid.
    pub nosuid: bool,
    /// No dev.
    pub nodev: bool,
    /// Always update access times.
    pub strictatime: bool,
}

impl MountOptions {
    /// Options for `/proc`.
    #[must_use]
    pub const fn proc() -> Self {
        Self {
            readonly: false,
            noexec: true,
            nosuid: true,
            nodev: true,
            strictatime: false,
        }
    }

    /// Options for the tmpfs on `/dev`.
    #[must_use]
    pub const fn dev() -> Self {
        Self {
            readonly: false,
            noexec: false,
            nosuid: true,
            nodev: false,
            strictatime: true,
        }
    }

    /// Kernel mount flags.
    #[must_use]
    pub fn flags(&self) -> MountFlags {
        let mut flags = MountFlags::empty();
        if self.readonly {
            flags |= MountFlags::RDONLY;
        }
        if self.noexec {
            flags |= MountFlags::NOEXEC;
        }
        if self.nosuid {
            flags |= MountFlags::NOSUID;
        }
        if self.nodev {
            flags |= MountFlags::NODEV;
        }
        if self.strictatime {
            flags |= MountFlags::STRICTATIME;
        }
        flags
    }
}

/// Mount a filesystem of type `fstype`.
///
/// # Errors
///
/// Fails when `data` contains a NUL byte or the kernel refuses the mount.
pub fn mount(
    source: &str,
    target: &Path,
    fstype: &str,
    options: &MountOptions,
    data: Option<&str>,
) -> CaskResult<()> {
    tracing::debug!(
        source,
        target = %target.display(),
        fstype,
        ?options,
        "Mounting filesystem"
    );

    let data = data
        .map(|d| {
            CString::new(d).map_err(|_| CaskError::Config {
                message: format!("mount data contains a NUL byte: {d:?}"),
            })
        })
        .transpose()?;

    rustix::mount::mount(source, target, fstype, options.flags(), data.as_deref()).map_err(|e| {
        CaskError::io_context(format!("mount {source} on {}", target.display()), e.into())
    })
}

/// Make `target` and everything below it private.
///
/// # Errors
///
/// Fails when the kernel refuses the propagation change.
pub fn make_private(target: &Path) -> CaskResult<()> {
    tracing::debug!(target = %target.display(), "Making mount private");

    rustix::mount::mount_change(
        target,
        MountPropagationFlags::PRIVATE | MountPropagationFlags::REC,
    )
    .map_err(|e| {
        CaskError::io_context(format!("make {} private", target.display()), e.into())
    })
}

/// Bind mount `source` onto `target`.
///
/// # Errors
///
/// Fails when the kernel refuses the mount.
pub fn bind_mount(source: &Path, target: &Path, recursive: bool) -> CaskResult<()> {
    use rustix::mount::{mount_bind, mount_bind_recursive};

    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        recursive,
        "Creating bind mount"
    );

    let result = if recursive {
        mount_bind_recursive(source, target)
    } else {
        mount_bind(source, target)
    };
    result.map_err(|e| {
        CaskError::io_context(
            format!("bind {} to {}", source.display(), target.display()),
            e.into(),
        )
    })
}

/// Unmount `target`, lazily when `detach` is set.
///
/// # Errors
///
/// Fails when the kernel refuses the unmount.
pub fn unmount(target: &Path, detach: bool) -> CaskResult<()> {
    use rustix::mount::UnmountFlags;

    tracing::debug!(target = %target.display(), detach, "Unmounting filesystem");

    let flags = if detach {
        UnmountFlags::DETACH
    } else {
        UnmountFlags::empty()
    };
    rustix::mount::unmount(target, flags)
        .map_err(|e| CaskError::io_context(format!("unmount {}", target.display()), e.into()))
}

/// Whether `path` is a mount point of the calling process.
#[must_use]
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(path) = path.canonicalize() else {
        return false;
    };
    std::fs::read_to_string("/proc/self/mountinfo")
        .map(|content| mounted_at(&content, &path))
        .unwrap_or(false)
}

fn mounted_at(mountinfo: &str, path: &Path) -> bool {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount_point| Path::new(mount_point) == path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_flags() {
        assert_eq!(
            MountOptions::proc().flags(),
            MountFlags::NOEXEC | MountFlags::NOSUID | MountFlags::NODEV
        );
    }

    #[test]
    fn test_dev_flags() {
        assert_eq!(
            MountOptions::dev().flags(),
            MountFlags::NOSUID | MountFlags::STRICTATIME
        );
        assert_eq!(MountOptions::default().flags(), MountFlags::empty());
    }

    #[test]
    fn test_mounted_at() {
        let mountinfo = "36 33 0:31 / /var/lib/cask/mnt/c1 rw,relatime - overlay overlay rw\n";
        assert!(mounted_at(mountinfo, Path::new("/var/lib/cask/mnt/c1")));
        assert!(!mounted_at(mountinfo, Path::new("/var/lib/cask/mnt")));
    }

    #[test]
    fn test_plain_directory_is_not_a_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        assert!(!is_mount_point(&sub));
        assert!(!is_mount_point(&dir.path().join("missing")));
    }

    #[test]
    fn test_nul_byte_in_data_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = mount(
            "tmpfs",
            dir.path(),
            "tmpfs",
            &MountOptions::default(),
            Some("mode=7\055"),
        );
        assert!(matches!(err, Err(CaskError::Config { .. })));
        assert!(!is_mount_point(dir.path()));
    }

    #[test]
    fn test_make_private_missing_target_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = make_private(&missing).unwrap_err();
        assert!(err.to_string().contains("missing"), "{err}");
    }
}
