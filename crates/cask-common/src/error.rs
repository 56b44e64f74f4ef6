//! Common error types for cask.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`CaskError`].
pub type CaskResult<T> = Result<T, CaskError>;

/// Errors shared by every cask crate.
#[derive(Error, Diagnostic, Debug)]
pub enum CaskError {
    /// No record exists for the container name.
    #[error("Container not found: {name}")]
    #[diagnostic(code(cask::container::not_found), help("List containers with `cask ps`"))]
    ContainerNotFound {
        /// The container name that was looked up.
        name: String,
    },

    /// Container name cannot be used as a directory or cgroup component.
    #[error("Invalid container name: {name}")]
    #[diagnostic(
        code(cask::container::invalid_name),
        help("Container names must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidContainerName {
        /// The rejected name.
        name: String,
    },

    /// The operation is not allowed in the container's current status.
    #[error("Cannot {operation} container {name} with status {status}")]
    #[diagnostic(code(cask::container::invalid_state))]
    InvalidState {
        /// Container name.
        name: String,
        /// Current status.
        status: String,
        /// Refused operation.
        operation: String,
    },

    /// Image archive or directory is missing.
    #[error("Image not found: {image}")]
    #[diagnostic(
        code(cask::image::not_found),
        help("Place the image archive at <root>/<image>.tar")
    )]
    ImageNotFound {
        /// The image name.
        image: String,
    },

    /// No network with this name is registered.
    #[error("Network not found: {name}")]
    #[diagnostic(code(cask::network::not_found), help("List networks with `cask network list`"))]
    NetworkNotFound {
        /// The network name.
        name: String,
    },

    /// A network with this name already exists.
    #[error("Network already exists: {name}")]
    #[diagnostic(code(cask::network::exists))]
    NetworkExists {
        /// The network name.
        name: String,
    },

    /// No driver is registered under this name.
    #[error("Unknown network driver: {driver}")]
    #[diagnostic(code(cask::network::driver), help("Supported drivers: bridge"))]
    DriverNotFound {
        /// The driver name.
        driver: String,
    },

    /// Subnet string is not an IPv4 CIDR.
    #[error("Invalid subnet: {subnet}")]
    #[diagnostic(code(cask::network::invalid_subnet), help("Use a CIDR such as 172.18.0.0/24"))]
    InvalidSubnet {
        /// The rejected subnet.
        subnet: String,
    },

    /// Every address of the subnet is allocated.
    #[error("No free address left in subnet {subnet}")]
    #[diagnostic(code(cask::network::exhausted))]
    SubnetExhausted {
        /// The exhausted subnet.
        subnet: String,
    },

    /// A port mapping is not of the form `host:container`.
    #[error("Invalid port mapping: {mapping}")]
    #[diagnostic(code(cask::network::invalid_port), help("Use host:container, e.g. 8080:80"))]
    InvalidPortMapping {
        /// The rejected mapping.
        mapping: String,
    },

    /// Cgroup directory could not be resolved or created.
    #[error("Cgroup path error for {subsystem}: {message}")]
    #[diagnostic(
        code(cask::cgroup::path),
        help("cask needs the cgroup v1 controllers cpu, cpuset and memory mounted")
    )]
    CgroupPath {
        /// The subsystem name.
        subsystem: String,
        /// What went wrong.
        message: String,
    },

    /// Netlink request failed.
    #[error("Netlink error: {message}")]
    #[diagnostic(code(cask::netlink))]
    Netlink {
        /// The error message.
        message: String,
    },

    /// An external program exited unsuccessfully.
    #[error("{program} failed: {message}")]
    #[diagnostic(code(cask::command))]
    Command {
        /// The program that failed.
        program: String,
        /// Captured output or exit status.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(cask::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(cask::serialization))]
    Serialization(String),

    /// Permission denied.
    #[error("Permission denied: {operation}")]
    #[diagnostic(code(cask::permission_denied), help("Try running with elevated privileges (sudo)"))]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(cask::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(code(cask::internal))]
    Internal {
        /// The error message.
        message: String,
    },
}

impl CaskError {
    /// Build an [`CaskError::Io`] that keeps the OS error but names the operation.
    #[must_use]
    pub fn io_context(operation: impl std::fmt::Display, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                operation: operation.to_string(),
            };
        }
        Self::Io(std::io::Error::new(err.kind(), format!("{operation}: {err}")))
    }
}

impl From<serde_json::Error> for CaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CaskError::ContainerNotFound {
            name: "web".to_string(),
        };
        assert_eq!(err.to_string(), "Container not found: web");
    }

    #[test]
    fn invalid_state_display() {
        let err = CaskError::InvalidState {
            name: "web".to_string(),
            status: "running".to_string(),
            operation: "remove".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot remove container web with status running"
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CaskError = io_err.into();
        assert!(matches!(err, CaskError::Io(_)));
    }

    #[test]
    fn io_context_keeps_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = CaskError::io_context("open /tmp/x", io_err);
        match err {
            CaskError::Io(inner) => {
                assert_eq!(inner.kind(), std::io::ErrorKind::NotFound);
                assert!(inner.to_string().contains("open /tmp/x"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn io_context_maps_permission_denied() {
        let io_err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = CaskError::io_context("write tasks", io_err);
        assert!(matches!(err, CaskError::PermissionDenied { .. }));
    }
}
