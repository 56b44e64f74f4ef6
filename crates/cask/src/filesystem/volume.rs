//! Host directories bind-mounted into containers.

use std::path::{Component, Path, PathBuf};

use cask_common::{CaskError, CaskResult};

use super::mounts;

/// A parsed `host:container` volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host, created if missing.
    pub host: PathBuf,
    /// Absolute path inside the container.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Parse `host:container`.
    ///
    /// Returns `None` unless the spec splits on `:` into exactly two
    /// non-empty parts and the container part has no `..` component.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split(':');
        let (Some(host), Some(container), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        if host.is_empty() || container.is_empty() {
            return None;
        }
        let container = PathBuf::from(container);
        if container.components().any(|c| c == Component::ParentDir) {
            return None;
        }
        Some(Self {
            host: PathBuf::from(host),
            container,
        })
    }

    /// Where the container path lands under `mount_point`.
    #[must_use]
    pub fn target(&self, mount_point: &Path) -> PathBuf {
        mount_point.join(self.container.strip_prefix("/").unwrap_or(&self.container))
    }

    /// Bind the host directory into the merged tree at `mount_point`.
    ///
    /// # Errors
    ///
    /// Fails when a directory cannot be created or the bind mount fails.
    pub fn mount(&self, mount_point: &Path) -> CaskResult<()> {
        create_dir(&self.host)?;
        let target = self.target(mount_point);
        create_dir(&target)?;

        mounts::bind_mount(&self.host, &target, false)?;
        tracing::info!(
            host = %self.host.display(),
            container = %self.container.display(),
            "Volume mounted"
        );
        Ok(())
    }

    /// Undo [`Self::mount`].
    ///
    /// # Errors
    ///
    /// Fails when the kernel refuses the unmount.
    pub fn unmount(&self, mount_point: &Path) -> CaskResult<()> {
        mounts::unmount(&self.target(mount_point), false)
    }
}

fn create_dir(path: &Path) -> CaskResult<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| CaskError::io_context(format!("create {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let spec = VolumeSpec::parse("/root/volume:/containerVolume").unwrap();
        assert_eq!(spec.host, PathBuf::from("/root/volume"));
        assert_eq!(spec.container, PathBuf::from("/containerVolume"));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(VolumeSpec::parse(""), None);
        assert_eq!(VolumeSpec::parse("/a"), None);
        assert_eq!(VolumeSpec::parse("/a:"), None);
        assert_eq!(VolumeSpec::parse(":/b"), None);
        assert_eq!(VolumeSpec::parse("/a:/b:/c"), None);
    }

    #[test]
    fn test_parent_dir_in_container_path_rejected() {
        assert_eq!(VolumeSpec::parse("/host:/../etc"), None);
        assert_eq!(VolumeSpec::parse("/host:/data/../../etc"), None);
        assert_eq!(VolumeSpec::parse("/host:.."), None);
        assert!(VolumeSpec::parse("/host:/data..x").is_some());
    }

    #[test]
    fn test_mount_error_names_host_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("afile");
        std::fs::write(&file, "").unwrap();
        let mount_point = dir.path().join("mnt");

        let spec = VolumeSpec::parse(&format!("{}:/data", file.join("sub").display())).unwrap();
        let err = spec.mount(&mount_point).unwrap_err();
        assert!(err.to_string().contains("afile/sub"), "{err}");
        assert!(!mount_point.join("data").exists());
    }

    #[test]
    fn test_target_is_below_mount_point() {
        let spec = VolumeSpec::parse("/host/data:/data/inner").unwrap();
        assert_eq!(
            spec.target(Path::new("/root/mnt/c1")),
            PathBuf::from("/root/mnt/c1/data/inner")
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_two_nonempty_parts_parse(host in "[a-z/]{1,20}", container in "[a-z/]{1,20}") {
            let spec = VolumeSpec::parse(&format!("{host}:{container}")).unwrap();
            proptest::prop_assert_eq!(spec.host, PathBuf::from(host));
            proptest::prop_assert_eq!(spec.container, PathBuf::from(container));
        }

        #[test]
        fn prop_extra_separator_rejected(parts in proptest::collection::vec("[a-z]{0,5}", 3..6)) {
            proptest::prop_assert_eq!(VolumeSpec::parse(&parts.join(":")), None);
        }
    }
}
