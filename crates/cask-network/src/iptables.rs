//! NAT rules for container networks.
//!
//! Each network gets one source NAT rule so containers can reach the
//! outside world. Each `host:container` port mapping gets one DNAT rule in
//! PREROUTING. Rules are installed by running the `iptables` binary.

use std::net::Ipv4Addr;
use std::process::Command;
use std::str::FromStr;

use cask_common::{CaskError, CaskResult};

/// A TCP port forwarded from the host to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Host port.
    pub host_port: u16,
    /// Container port.
    pub container_port: u16,
}

impl PortMapping {
    /// Create a new mapping.
    #[must_use]
    pub const fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
        }
    }

    fn dnat_args(&self, op: &'static str, container_ip: Ipv4Addr) -> Vec<String> {
        [
            "-t",
            "nat",
            op,
            "PREROUTING",
            "-p",
            "tcp",
            "-m",
            "tcp",
            "--dport",
        ]
        .iter()
        .map(ToString::to_string)
        .chain([
            self.host_port.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to-destination".to_string(),
            format!("{container_ip}:{}", self.container_port),
        ])
        .collect()
    }
}

impl FromStr for PortMapping {
    type Err = CaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CaskError::InvalidPortMapping {
            mapping: s.to_string(),
        };

        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        if container.contains(':') {
            return Err(invalid());
        }
        let host_port = host.trim().parse().map_err(|_| invalid())?;
        let container_port = container.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(host_port, container_port))
    }
}

/// Forward `mapping` to `container_ip`.
///
/// # Errors
///
/// Fails when iptables cannot be run or rejects the rule.
pub fn add_port_mapping(mapping: &PortMapping, container_ip: Ipv4Addr) -> CaskResult<()> {
    tracing::debug!(
        host_port = mapping.host_port,
        container_port = mapping.container_port,
        %container_ip,
        "Adding port mapping"
    );
    run_iptables(&mapping.dnat_args("-A", container_ip))
}

/// Remove the rule installed by [`add_port_mapping`].
///
/// # Errors
///
/// Fails when iptables cannot be run or the rule does not exist.
pub fn delete_port_mapping(mapping: &PortMapping, container_ip: Ipv4Addr) -> CaskResult<()> {
    tracing::debug!(
        host_port = mapping.host_port,
        container_port = mapping.container_port,
        "Removing port mapping"
    );
    run_iptables(&mapping.dnat_args("-D", container_ip))
}

/// Install every mapping in order.
///
/// Stops at the first malformed or rejected mapping; rules installed before
/// it stay in place.
///
/// # Errors
///
/// Returns the error of the first mapping that failed.
pub fn install_port_mappings(mappings: &[String], container_ip: Ipv4Addr) -> CaskResult<()> {
    for raw in mappings {
        let mapping: PortMapping = raw.parse()?;
        add_port_mapping(&mapping, container_ip)?;
    }
    Ok(())
}

/// Remove every mapping, logging failures.
pub fn remove_port_mappings(mappings: &[String], container_ip: Ipv4Addr) {
    for raw in mappings {
        let result = raw
            .parse::<PortMapping>()
            .and_then(|mapping| delete_port_mapping(&mapping, container_ip));
        if let Err(e) = result {
            tracing::warn!(mapping = %raw, error = %e, "Failed to remove port mapping");
        }
    }
}

fn masquerade_args(op: &'static str, subnet: &str, bridge: &str) -> Vec<String> {
    [
        "-t",
        "nat",
        op,
        "POSTROUTING",
        "-s",
        subnet,
        "!",
        "-o",
        bridge,
        "-j",
        "MASQUERADE",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Masquerade traffic leaving `subnet` through any interface but `bridge`.
///
/// # Errors
///
/// Fails when iptables cannot be run or rejects the rule.
pub fn add_masquerade(subnet: &str, bridge: &str) -> CaskResult<()> {
    run_iptables(&masquerade_args("-A", subnet, bridge))?;
    tracing::info!(subnet, bridge, "Source NAT configured");
    Ok(())
}

/// Remove the rule installed by [`add_masquerade`].
///
/// # Errors
///
/// Fails when iptables cannot be run or the rule does not exist.
pub fn delete_masquerade(subnet: &str, bridge: &str) -> CaskResult<()> {
    run_iptables(&masquerade_args("-D", subnet, bridge))
}

/// Run an iptables command.
fn run_iptables<S: AsRef<str>>(args: &[S]) -> CaskResult<()> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let output = Command::new("iptables")
        .args(&args)
        .output()
        .map_err(|e| CaskError::Command {
            program: "iptables".to_string(),
            message: format!("failed to execute: {e}"),
        })?;

    if !output.status.success() {
        return Err(CaskError::Command {
            program: "iptables".to_string(),
            message: format!(
                "{} ({}): {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_mapping() {
        let mapping: PortMapping = "8080:80".parse().unwrap();
        assert_eq!(mapping, PortMapping::new(8080, 80));
    }

    #[test]
    fn test_parse_port_mapping_rejects_malformed() {
        for bad in ["8080", "8080:80:90", "http:80", "8080:", "70000:80", ""] {
            assert!(
                matches!(
                    bad.parse::<PortMapping>(),
                    Err(CaskError::InvalidPortMapping { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_dnat_rule() {
        let args = PortMapping::new(8080, 80).dnat_args("-A", Ipv4Addr::new(172, 18, 0, 2));
        assert_eq!(
            args.join(" "),
            "-t nat -A PREROUTING -p tcp -m tcp --dport 8080 -j DNAT --to-destination 172.18.0.2:80"
        );
    }

    #[test]
    fn test_masquerade_rule() {
        let args = masquerade_args("-D", "172.18.0.0/24", "testbr");
        assert_eq!(
            args.join(" "),
            "-t nat -D POSTROUTING -s 172.18.0.0/24 ! -o testbr -j MASQUERADE"
        );
    }

    #[test]
    fn test_install_stops_at_malformed_mapping() {
        let mappings = vec!["not-a-mapping".to_string(), "8080:80".to_string()];
        let err = install_port_mappings(&mappings, Ipv4Addr::new(10, 0, 0, 2)).unwrap_err();
        assert!(matches!(err, CaskError::InvalidPortMapping { .. }));
    }
}
