//! Network and endpoint records.

use std::net::Ipv4Addr;
use std::path::Path;

use cask_common::{CaskError, CaskResult, ContainerRecord};
use cidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};

use crate::ipam::parse_subnet;

/// Characters of the endpoint id used in interface names.
const VETH_ID_LENGTH: usize = 5;
/// Prefix of the container side of a veth pair.
const PEER_PREFIX: &str = "cif-";

/// A named virtual network, persisted as JSON under the network directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network name, also the bridge interface name.
    pub name: String,
    /// Subnet in CIDR notation.
    pub ip_range: String,
    /// Driver that created the network.
    pub driver: String,
    /// Gateway address, the first address of the subnet.
    pub gateway: Ipv4Addr,
}

impl Network {
    /// Parsed subnet of the network.
    ///
    /// # Errors
    ///
    /// Fails when the stored range is not a valid subnet.
    pub fn subnet(&self) -> CaskResult<Ipv4Cidr> {
        parse_subnet(&self.ip_range)
    }

    /// Write the record to `<dir>/<name>`.
    ///
    /// # Errors
    ///
    /// Fails on I/O or serialization errors.
    pub fn dump(&self, dir: &Path) -> CaskResult<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string(self)?;
        let path = dir.join(&self.name);
        std::fs::write(&path, json)
            .map_err(|e| CaskError::io_context(format!("write {}", path.display()), e))
    }

    /// Read a record from `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file is unreadable or not a network record.
    pub fn load(path: &Path) -> CaskResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CaskError::io_context(format!("read {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Delete `<dir>/<name>`; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Fails on any other I/O error.
    pub fn remove(&self, dir: &Path) -> CaskResult<()> {
        match std::fs::remove_file(dir.join(&self.name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Names of both ends of a veth pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Host side, attached to the bridge.
    pub name: String,
    /// Container side, moved into the container's network namespace.
    pub peer_name: String,
}

/// One container's attachment to a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `<container id>-<network name>`.
    pub id: String,
    /// Veth pair carrying the traffic.
    pub device: VethPair,
    /// Address allocated to the container.
    pub ip_address: Ipv4Addr,
    /// MAC of the container side, filled in by the driver.
    pub mac_address: Option<String>,
    /// Raw `host:container` mappings.
    pub port_mapping: Vec<String>,
    /// Network name.
    pub network: String,
}

impl Endpoint {
    /// Endpoint of `record` on `network` with address `ip`.
    #[must_use]
    pub fn new(record: &ContainerRecord, network: &Network, ip: Ipv4Addr) -> Self {
        let id = format!("{}-{}", record.id, network.name);
        let short = &id[..VETH_ID_LENGTH.min(id.len())];
        let device = VethPair {
            name: short.to_string(),
            peer_name: format!("{PEER_PREFIX}{short}"),
        };
        Self {
            id,
            device,
            ip_address: ip,
            mac_address: None,
            port_mapping: record.port_mapping.clone(),
            network: network.name.clone(),
        }
    }
}
