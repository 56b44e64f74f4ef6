//! Per-container layered root filesystem.

use std::path::{Path, PathBuf};

use cask_common::{CaskError, CaskPaths, CaskResult};

use super::archive;
use super::mounts::is_mount_point;
use super::overlay::OverlayFs;
use super::volume::VolumeSpec;

/// The directories and mounts backing one container's root filesystem.
#[derive(Debug, Clone)]
pub struct Workspace {
    paths: CaskPaths,
    container: String,
    image: String,
    volume: Option<VolumeSpec>,
}

impl Workspace {
    /// Workspace of `container` on `image`, with an optional
    /// `host:container` volume.
    ///
    /// A malformed volume is logged and ignored.
    pub fn new(paths: &CaskPaths, container: &str, image: &str, volume: &str) -> Self {
        let spec = VolumeSpec::parse(volume);
        if spec.is_none() && !volume.is_empty() {
            tracing::warn!(volume, "Ignoring malformed volume, expected host:container");
        }
        Self {
            paths: paths.clone(),
            container: container.to_string(),
            image: image.to_string(),
            volume: spec,
        }
    }

    /// Merged root of the container.
    #[must_use]
    pub fn mount_point(&self) -> PathBuf {
        self.paths.mount_point(&self.container)
    }

    /// Parsed volume, if one is configured.
    #[must_use]
    pub const fn volume(&self) -> Option<&VolumeSpec> {
        self.volume.as_ref()
    }

    fn overlay(&self) -> OverlayFs {
        OverlayFs::new(
            self.paths.image_layer(&self.image),
            self.paths.write_layer(&self.container),
            self.paths.work_dir(&self.container),
            self.mount_point(),
        )
    }

    /// Build the whole workspace: image layer, write layer, overlay and
    /// volume.
    ///
    /// A volume that cannot be mounted is logged and skipped.
    ///
    /// # Errors
    ///
    /// Fails at the first layer or overlay step that fails.
    pub fn create(&self) -> CaskResult<()> {
        self.create_read_only_layer()?;
        self.create_write_layer()?;
        self.create_mount_point()?;
        if let Some(volume) = &self.volume {
            if let Err(e) = volume.mount(&self.mount_point()) {
                tracing::error!(
                    container = %self.container,
                    host = %volume.host.display(),
                    error = %e,
                    "Failed to mount volume"
                );
            }
        }
        tracing::info!(container = %self.container, image = %self.image, "Workspace created");
        Ok(())
    }

    /// Unpack the image archive unless the image directory already exists.
    ///
    /// # Errors
    ///
    /// Returns [`CaskError::ImageNotFound`] when neither exists, or the
    /// extraction error.
    pub fn create_read_only_layer(&self) -> CaskResult<PathBuf> {
        validate_image(&self.image)?;
        let layer = self.paths.image_layer(&self.image);
        if layer.is_dir() {
            tracing::debug!(layer = %layer.display(), "Reusing image layer");
            return Ok(layer);
        }

        let archive_path = self.paths.image_archive(&self.image);
        if !archive_path.is_file() {
            return Err(CaskError::ImageNotFound {
                image: self.image.clone(),
            });
        }

        std::fs::create_dir_all(&layer)?;
        if let Err(e) = archive::extract(&archive_path, &layer) {
            let _ = std::fs::remove_dir_all(&layer);
            return Err(e);
        }
        tracing::info!(image = %self.image, layer = %layer.display(), "Image layer unpacked");
        Ok(layer)
    }

    /// Recreate an empty write layer and overlay work directory.
    ///
    /// # Errors
    ///
    /// Fails when the old directories cannot be removed or new ones created.
    pub fn create_write_layer(&self) -> CaskResult<()> {
        for dir in [
            self.paths.write_layer(&self.container),
            self.paths.work_dir(&self.container),
        ] {
            remove_dir_if_exists(&dir)?;
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Mount the overlay on the merge directory.
    ///
    /// # Errors
    ///
    /// Fails when the mount fails.
    pub fn create_mount_point(&self) -> CaskResult<()> {
        self.overlay().mount()
    }

    /// Tear the workspace down: volume, overlay, then the directories.
    ///
    /// Every step is attempted; failures are logged. The merge directory
    /// is only removed once nothing is mounted below it.
    pub fn delete(&self) {
        let mount_point = self.mount_point();
        let mut busy = false;

        if let Some(volume) = &self.volume {
            busy |= !unmount_logged(&volume.target(&mount_point), || {
                volume.unmount(&mount_point)
            });
        }
        let overlay = self.overlay();
        busy |= !unmount_logged(&mount_point, || overlay.unmount());

        if busy {
            tracing::error!(
                mount_point = %mount_point.display(),
                "Leaving merge directory in place, it is still mounted"
            );
        } else if let Err(e) = remove_dir_if_exists(&mount_point) {
            tracing::warn!(path = %mount_point.display(), error = %e, "Failed to remove merge directory");
        }

        for dir in [
            self.paths.write_layer(&self.container),
            self.paths.work_dir(&self.container),
        ] {
            if let Err(e) = remove_dir_if_exists(&dir) {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to remove layer directory");
            }
        }
        tracing::info!(container = %self.container, "Workspace deleted");
    }
}

/// Run `unmount` if `path` is mounted; true when nothing is left mounted.
fn unmount_logged(path: &Path, unmount: impl FnOnce() -> CaskResult<()>) -> bool {
    if !is_mount_point(path) {
        return true;
    }
    match unmount() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to unmount");
            false
        }
    }
}

fn remove_dir_if_exists(dir: &Path) -> CaskResult<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CaskError::io_context(format!("remove {}", dir.display()), e)),
    }
}

fn validate_image(image: &str) -> CaskResult<()> {
    if image.is_empty() || image.starts_with('.') || image.contains('/') {
        return Err(CaskError::ImageNotFound {
            image: image.to_string(),
        });
    }
    Ok(())
}

/// Pack the merged root of `container` into `<root>/<image>.tar`.
///
/// # Errors
///
/// Fails when the image name is unusable, the container has no merged
/// root, or packing fails.
pub fn commit(paths: &CaskPaths, container: &str, image: &str) -> CaskResult<PathBuf> {
    validate_image(image)?;
    let mount_point = paths.mount_point(container);
    if !mount_point.is_dir() {
        return Err(CaskError::ContainerNotFound {
            name: container.to_string(),
        });
    }

    let archive_path = paths.image_archive(image);
    archive::pack(&mount_point, &archive_path)?;
    tracing::info!(container, image, archive = %archive_path.display(), "Container committed");
    Ok(archive_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_layer_is_recreated_empty() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());
        let ws = Workspace::new(&paths, "c1", "busybox", "");

        let stale = paths.write_layer("c1").join("stale");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("file"), "old").unwrap();

        ws.create_write_layer().unwrap();
        let layer = paths.write_layer("c1");
        assert!(layer.is_dir());
        assert_eq!(std::fs::read_dir(&layer).unwrap().count(), 0);
        assert!(paths.work_dir("c1").is_dir());
    }

    #[test]
    fn test_read_only_layer_unpacked_once() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());

        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        std::fs::write(src.join("bin/sh"), "#!").unwrap();
        archive::pack(&src, &paths.image_archive("busybox")).unwrap();

        let ws = Workspace::new(&paths, "c1", "busybox", "");
        let layer = ws.create_read_only_layer().unwrap();
        assert!(layer.join("bin/sh").is_file());

        std::fs::write(layer.join("marker"), "").unwrap();
        ws.create_read_only_layer().unwrap();
        assert!(layer.join("marker").exists());
    }

    #[test]
    fn test_missing_image() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());
        let ws = Workspace::new(&paths, "c1", "nothing", "");
        assert!(matches!(
            ws.create_read_only_layer(),
            Err(CaskError::ImageNotFound { .. })
        ));
        assert!(!paths.image_layer("nothing").exists());

        let ws = Workspace::new(&paths, "c1", "../etc", "");
        assert!(matches!(
            ws.create_read_only_layer(),
            Err(CaskError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_volume_is_ignored() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());
        assert!(Workspace::new(&paths, "c1", "busybox", "/only-host").volume().is_none());
        assert!(Workspace::new(&paths, "c1", "busybox", "/a:/b").volume().is_some());
    }

    #[test]
    fn test_delete_removes_unmounted_directories() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());
        let ws = Workspace::new(&paths, "c1", "busybox", "");

        ws.create_write_layer().unwrap();
        std::fs::create_dir_all(paths.mount_point("c1")).unwrap();

        ws.delete();
        assert!(!paths.mount_point("c1").exists());
        assert!(!paths.write_layer("c1").exists());
        assert!(!paths.work_dir("c1").exists());
    }

    #[test]
    #[ignore = "requires root"]
    fn test_failed_volume_keeps_overlay_until_delete() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());

        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        archive::pack(&src, &paths.image_archive("busybox")).unwrap();

        let afile = dir.path().join("afile");
        std::fs::write(&afile, "").unwrap();
        let volume = format!("{}:/data", afile.join("sub").display());
        let ws = Workspace::new(&paths, "c1", "busybox", &volume);

        ws.create().unwrap();
        let mount_point = paths.mount_point("c1");
        assert!(is_mount_point(&mount_point));
        assert!(!is_mount_point(&mount_point.join("data")));

        ws.delete();
        assert!(!is_mount_point(&mount_point));
        assert!(!mount_point.exists());
        assert!(!paths.write_layer("c1").exists());
    }

    #[test]
    #[ignore = "requires root"]
    fn test_delete_unmounts_volume_and_overlay() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());

        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        archive::pack(&src, &paths.image_archive("busybox")).unwrap();

        let host = dir.path().join("host");
        let volume = format!("{}:/data", host.display());
        let ws = Workspace::new(&paths, "c1", "busybox", &volume);

        ws.create().unwrap();
        let mount_point = paths.mount_point("c1");
        assert!(is_mount_point(&mount_point.join("data")));

        ws.delete();
        assert!(!is_mount_point(&mount_point.join("data")));
        assert!(!is_mount_point(&mount_point));
        assert!(!mount_point.exists());
        assert!(host.is_dir());
    }

    #[test]
    fn test_commit_packs_merge_dir() {
        let dir = tempdir().unwrap();
        let paths = CaskPaths::with_root(dir.path());
        let mnt = paths.mount_point("c1");
        std::fs::create_dir_all(&mnt).unwrap();
        std::fs::write(mnt.join("data"), "x").unwrap();

        let archive_path = commit(&paths, "c1", "snapshot").unwrap();
        assert_eq!(archive_path, paths.image_archive("snapshot"));
        assert!(archive_path.is_file());

        assert!(matches!(
            commit(&paths, "missing", "snapshot"),
            Err(CaskError::ContainerNotFound { .. })
        ));
    }
}
