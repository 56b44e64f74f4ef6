//! Runtime configuration.

use std::path::PathBuf;

use cask_common::CaskPaths;

use crate::cgroup::CgroupHierarchy;

/// Runtime configuration options.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Paths for layers, records and network state.
    pub paths: CaskPaths,
    /// Where cgroup controllers are found.
    pub hierarchy: CgroupHierarchy,
}

impl RuntimeConfig {
    /// Set the layer root; the runtime directory follows it.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = CaskPaths::with_root(root);
        self
    }

    /// Set the runtime directory.
    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.paths = self.paths.with_runtime(runtime);
        self
    }

    /// Use a fixed cgroup hierarchy instead of the mount table.
    #[must_use]
    pub fn with_hierarchy(mut self, hierarchy: CgroupHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.paths, CaskPaths::new());
        assert_eq!(config.hierarchy, CgroupHierarchy::MountInfo);
    }

    #[test]
    fn builder_pattern() {
        let config = RuntimeConfig::default()
            .with_root("/custom/root")
            .with_runtime("/custom/run")
            .with_hierarchy(CgroupHierarchy::Fixed(PathBuf::from("/tmp/cg")));

        assert_eq!(config.paths.root, PathBuf::from("/custom/root"));
        assert_eq!(config.paths.runtime, PathBuf::from("/custom/run"));
        assert_eq!(
            config.hierarchy,
            CgroupHierarchy::Fixed(PathBuf::from("/tmp/cg"))
        );
    }
}
