//! Resource limits handed to the cgroup subsystems.

use serde::{Deserialize, Serialize};

/// Resource limits for one container.
///
/// Values are passed to the kernel verbatim. An empty string leaves the
/// corresponding controller at its default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Memory limit, e.g. `100m`.
    pub memory_limit: String,
    /// Relative CPU weight, e.g. `512`.
    pub cpu_share: String,
    /// Allowed CPUs, e.g. `0-1`.
    pub cpu_set: String,
}

impl ResourceConfig {
    /// Create an unconstrained configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory limit.
    #[must_use]
    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = limit.into();
        self
    }

    /// Set the cpu share.
    #[must_use]
    pub fn with_cpu_share(mut self, share: impl Into<String>) -> Self {
        self.cpu_share = share.into();
        self
    }

    /// Set the cpu set.
    #[must_use]
    pub fn with_cpu_set(mut self, cpus: impl Into<String>) -> Self {
        self.cpu_set = cpus.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unconstrained() {
        let res = ResourceConfig::new();
        assert!(res.memory_limit.is_empty());
        assert!(res.cpu_share.is_empty());
        assert!(res.cpu_set.is_empty());
    }

    #[test]
    fn builder_sets_fields() {
        let res = ResourceConfig::new()
            .with_memory_limit("100m")
            .with_cpu_share("512")
            .with_cpu_set("0-1");
        assert_eq!(res.memory_limit, "100m");
        assert_eq!(res.cpu_share, "512");
        assert_eq!(res.cpu_set, "0-1");
    }
}
