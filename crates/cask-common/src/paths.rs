//! Standard filesystem paths for cask.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for image and container layers.
pub static CASK_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CASK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/cask"))
});

/// Default runtime directory for records, logs and network state.
pub static CASK_RUNTIME_DIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("CASK_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/cask"))
});

/// File name of a container record inside its directory.
pub const CONFIG_NAME: &str = "config.json";

/// File name of the redirected output of a detached container.
pub const LOG_NAME: &str = "container.log";

/// Paths used by the cask runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaskPaths {
    /// Layer root (default: /var/lib/cask).
    pub root: PathBuf,
    /// Runtime directory (default: /var/run/cask).
    pub runtime: PathBuf,
}

impl CaskPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory; the runtime directory
    /// moves to `<root>/run`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let runtime = root.join("run");
        Self { root, runtime }
    }

    /// Override the runtime directory.
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Image archive (`<root>/<image>.tar`).
    #[must_use]
    pub fn image_archive(&self, image: &str) -> PathBuf {
        self.root.join(format!("{image}.tar"))
    }

    /// Extracted read-only image layer.
    #[must_use]
    pub fn image_layer(&self, image: &str) -> PathBuf {
        self.root.join(image)
    }

    /// Writable layer of a container.
    #[must_use]
    pub fn write_layer(&self, container: &str) -> PathBuf {
        self.root.join("writeLayer").join(container)
    }

    /// Overlay work directory of a container.
    #[must_use]
    pub fn work_dir(&self, container: &str) -> PathBuf {
        self.root.join("work").join(container)
    }

    /// Merge mount point of a container.
    #[must_use]
    pub fn mount_point(&self, container: &str) -> PathBuf {
        self.root.join("mnt").join(container)
    }

    /// Directory holding all container records.
    #[must_use]
    pub fn containers(&self) -> PathBuf {
        self.runtime.join("containers")
    }

    /// Directory of one container record.
    #[must_use]
    pub fn container(&self, name: &str) -> PathBuf {
        self.containers().join(name)
    }

    /// Container record file.
    #[must_use]
    pub fn container_config(&self, name: &str) -> PathBuf {
        self.container(name).join(CONFIG_NAME)
    }

    /// Container log file.
    #[must_use]
    pub fn container_log(&self, name: &str) -> PathBuf {
        self.container(name).join(LOG_NAME)
    }

    /// Directory of persisted network records.
    #[must_use]
    pub fn networks(&self) -> PathBuf {
        self.runtime.join("network").join("network")
    }

    /// Persisted record of one network.
    #[must_use]
    pub fn network(&self, name: &str) -> PathBuf {
        self.networks().join(name)
    }

    /// IPAM allocation file.
    #[must_use]
    pub fn ipam(&self) -> PathBuf {
        self.runtime.join("network").join("ipam").join("subnet.json")
    }

    /// Create the top-level directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.containers())?;
        std::fs::create_dir_all(self.networks())?;
        Ok(())
    }
}

impl Default for CaskPaths {
    fn default() -> Self {
        Self {
            root: CASK_ROOT.clone(),
            runtime: CASK_RUNTIME_DIR.clone(),
        }
    }
}
