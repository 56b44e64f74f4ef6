//! Persisted container record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CaskError, CaskResult};
use crate::id::ContainerId;

/// Timestamp format of [`ContainerRecord::create_time`].
pub const CREATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Container status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process was started and has not been stopped.
    Running,
    /// Stopped by `cask stop`.
    Stopped,
    /// The process exited on its own.
    Exited,
}

impl ContainerStatus {
    /// Status as stored on disk.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Exited => "exited",
        }
    }

    /// Whether a container in this status may be removed.
    #[must_use]
    pub const fn can_remove(self) -> bool {
        matches!(self, Self::Stopped | Self::Exited)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything cask remembers about a container between invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Host pid of the init process; empty once stopped.
    pub pid: String,
    /// Random numeric id.
    pub id: ContainerId,
    /// Unique name, defaults to the id.
    pub name: String,
    /// Space-joined command line.
    pub command: String,
    /// Creation time in [`CREATE_TIME_FORMAT`].
    #[serde(rename = "createTime")]
    pub create_time: String,
    /// Current status.
    pub status: ContainerStatus,
    /// Raw `host:container` volume spec or empty.
    #[serde(default)]
    pub volume: String,
    /// `host:container` port mappings.
    #[serde(rename = "portmapping", default)]
    pub port_mapping: Vec<String>,
    /// Network the container is connected to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Address allocated on [`Self::network`].
    #[serde(
        rename = "ipAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ip_address: Option<String>,
}

impl ContainerRecord {
    /// Create a running record stamped with the current local time.
    #[must_use]
    pub fn new(pid: u32, id: ContainerId, name: impl Into<String>, command: &[String]) -> Self {
        Self {
            pid: pid.to_string(),
            id,
            name: name.into(),
            command: command.join(" "),
            create_time: chrono::Local::now().format(CREATE_TIME_FORMAT).to_string(),
            status: ContainerStatus::Running,
            volume: String::new(),
            port_mapping: Vec::new(),
            network: None,
            ip_address: None,
        }
    }

    /// Set the volume spec.
    #[must_use]
    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volume = volume.into();
        self
    }

    /// Set the port mappings.
    #[must_use]
    pub fn with_port_mapping(mut self, port_mapping: Vec<String>) -> Self {
        self.port_mapping = port_mapping;
        self
    }

    /// Parse the recorded pid.
    ///
    /// # Errors
    ///
    /// Fails when the record holds no pid (stopped) or a malformed one.
    pub fn pid(&self) -> CaskResult<i32> {
        self.pid
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .ok_or_else(|| CaskError::Config {
                message: format!("container {} has no valid pid ({:?})", self.name, self.pid),
            })
    }

    /// Transition to `stopped` and forget the pid.
    pub fn mark_stopped(&mut self) {
        self.status = ContainerStatus::Stopped;
        self.pid.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ContainerRecord {
        ContainerRecord::new(
            4242,
            "0123456789".parse().unwrap(),
            "web",
            &["top".to_string(), "-b".to_string()],
        )
    }

    #[test]
    fn new_record_is_running() {
        let r = record();
        assert_eq!(r.status, ContainerStatus::Running);
        assert_eq!(r.pid, "4242");
        assert_eq!(r.command, "top -b");
        assert_eq!(r.create_time.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn json_field_names() {
        let r = record()
            .with_volume("/host:/data")
            .with_port_mapping(vec!["8080:80".to_string()]);
        let json: serde_json::Value = serde_json::to_value(&r).unwrap();
        assert_eq!(json["pid"], "4242");
        assert_eq!(json["id"], "0123456789");
        assert_eq!(json["createTime"], r.create_time);
        assert_eq!(json["status"], "running");
        assert_eq!(json["volume"], "/host:/data");
        assert_eq!(json["portmapping"][0], "8080:80");
        assert!(json.get("network").is_none());
        assert!(json.get("ipAddress").is_none());
    }

    #[test]
    fn reads_record_without_optional_fields() {
        let json = r#"{"pid":"1","id":"0123456789","name":"a","command":"sh",
            "createTime":"2024-01-01 00:00:00","status":"exited"}"#;
        let r: ContainerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.status, ContainerStatus::Exited);
        assert!(r.port_mapping.is_empty());
        assert!(r.network.is_none());
    }

    #[test]
    fn mark_stopped_clears_pid() {
        let mut r = record();
        assert_eq!(r.pid().unwrap(), 4242);
        r.mark_stopped();
        assert_eq!(r.status, ContainerStatus::Stopped);
        assert!(r.pid.is_empty());
        assert!(r.pid().is_err());
    }

    #[test]
    fn only_finished_containers_are_removable() {
        assert!(!ContainerStatus::Running.can_remove());
        assert!(ContainerStatus::Stopped.can_remove());
        assert!(ContainerStatus::Exited.can_remove());
    }
}
