//! Network registry and container attachment.

use std::collections::BTreeMap;
use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use cask_common::{CaskError, CaskPaths, CaskResult, ContainerRecord};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::bridge::BridgeDriver;
use crate::driver::NetworkDriver;
use crate::ipam::{Ipam, parse_subnet, subnet_key};
use crate::iptables;
use crate::link::{LinkHandle, validate_interface_name};
use crate::netns::{netns_path, run_in_netns};
use crate::network::{Endpoint, Network};

/// Owns the driver registry, the allocator and the known networks.
pub struct NetworkManager {
    network_dir: PathBuf,
    ipam: Ipam,
    drivers: BTreeMap<&'static str, Box<dyn NetworkDriver>>,
    networks: BTreeMap<String, Network>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("network_dir", &self.network_dir)
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("networks", &self.networks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl NetworkManager {
    /// Register the bridge driver and load every persisted network.
    ///
    /// # Errors
    ///
    /// Fails when netlink is unavailable or the network directory cannot
    /// be read.
    pub fn init(paths: &CaskPaths) -> CaskResult<Self> {
        let bridge = BridgeDriver::new(LinkHandle::connect()?);
        Self::with_drivers(paths, vec![Box::new(bridge)])
    }

    /// Like [`Self::init`] with an explicit driver set.
    ///
    /// # Errors
    ///
    /// Fails when the network directory cannot be created or read.
    pub fn with_drivers(
        paths: &CaskPaths,
        drivers: Vec<Box<dyn NetworkDriver>>,
    ) -> CaskResult<Self> {
        let network_dir = paths.networks();
        std::fs::create_dir_all(&network_dir).map_err(|e| {
            CaskError::io_context(format!("create {}", network_dir.display()), e)
        })?;

        let mut networks = BTreeMap::new();
        for entry in std::fs::read_dir(&network_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            match Network::load(&entry.path()) {
                Ok(network) => {
                    networks.insert(network.name.clone(), network);
                }
                Err(e) => tracing::warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "Skipping unreadable network record"
                ),
            }
        }

        let drivers = drivers.into_iter().map(|d| (d.name(), d)).collect();

        Ok(Self {
            network_dir,
            ipam: Ipam::new(paths.ipam()),
            drivers,
            networks,
        })
    }

    /// Look up a network by name.
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    /// All known networks, ordered by name.
    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    fn driver(&self, name: &str) -> CaskResult<&dyn NetworkDriver> {
        self.drivers
            .get(name)
            .map(|driver| &**driver)
            .ok_or_else(|| CaskError::DriverNotFound {
                driver: name.to_string(),
            })
    }

    /// Create network `name` over `subnet` with `driver`.
    ///
    /// The first address of the subnet becomes the gateway.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken or unusable, the driver is unknown, the
    /// subnet is invalid or exhausted, or the driver fails.
    pub async fn create_network(
        &mut self,
        driver: &str,
        subnet: &str,
        name: &str,
    ) -> CaskResult<&Network> {
        validate_interface_name(name)?;
        if self.networks.contains_key(name) {
            return Err(CaskError::NetworkExists {
                name: name.to_string(),
            });
        }
        let subnet = parse_subnet(subnet)?;
        self.driver(driver)?;

        let gateway = self
            .ipam
            .allocate(&subnet)?
            .ok_or_else(|| CaskError::SubnetExhausted {
                subnet: subnet_key(&subnet),
            })?;

        let created = self.driver(driver)?.create(subnet, gateway, name).await;
        let network = match created {
            Ok(network) => network,
            Err(e) => {
                if let Err(release) = self.ipam.release(&subnet, gateway) {
                    tracing::warn!(error = %release, "Failed to release gateway address");
                }
                return Err(e);
            }
        };

        network.dump(&self.network_dir)?;
        tracing::info!(network = name, driver, subnet = %network.ip_range, "Network created");
        Ok(self.networks.entry(name.to_string()).or_insert(network))
    }

    /// Delete network `name`: release its gateway, tear down the driver's
    /// resources and forget the record.
    ///
    /// Containers still attached are not checked.
    ///
    /// # Errors
    ///
    /// Fails when the network is unknown or any step fails.
    pub async fn delete_network(&mut self, name: &str) -> CaskResult<()> {
        let network = self
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| CaskError::NetworkNotFound {
                name: name.to_string(),
            })?;

        self.ipam.release(&network.subnet()?, network.gateway)?;
        self.driver(&network.driver)?.delete(&network).await?;
        network.remove(&self.network_dir)?;
        self.networks.remove(name);

        tracing::info!(network = name, "Network deleted");
        Ok(())
    }

    /// Attach the container described by `record` to `network_name`.
    ///
    /// Allocates an address, lets the driver create and attach the veth
    /// pair, configures the container end inside the container's network
    /// namespace and installs the record's port mappings. The record's
    /// `network` and `ip_address` are set as soon as an address is
    /// allocated, so a later [`Self::disconnect`] can release it.
    ///
    /// # Errors
    ///
    /// Fails at the first failing step without undoing earlier ones.
    pub async fn connect(
        &mut self,
        network_name: &str,
        record: &mut ContainerRecord,
    ) -> CaskResult<Endpoint> {
        let network = self
            .networks
            .get(network_name)
            .cloned()
            .ok_or_else(|| CaskError::NetworkNotFound {
                name: network_name.to_string(),
            })?;
        let pid = record.pid()?;
        let subnet = network.subnet()?;

        let ip = self
            .ipam
            .allocate(&subnet)?
            .ok_or_else(|| CaskError::SubnetExhausted {
                subnet: network.ip_range.clone(),
            })?;
        record.network = Some(network.name.clone());
        record.ip_address = Some(ip.to_string());

        let mut endpoint = Endpoint::new(record, &network, ip);
        self.driver(&network.driver)?
            .connect(&network, &mut endpoint)
            .await?;

        configure_endpoint(&endpoint, &network, pid).await?;
        iptables::install_port_mappings(&endpoint.port_mapping, ip)?;

        tracing::info!(
            container = %record.name,
            network = network_name,
            %ip,
            "Container connected"
        );
        Ok(endpoint)
    }

    /// Undo [`Self::connect`] for `record`: remove its port mappings and veth
    /// pair and release its address. Each step is best effort.
    ///
    /// # Errors
    ///
    /// Fails only when the address cannot be released.
    pub async fn disconnect(&mut self, record: &ContainerRecord) -> CaskResult<()> {
        let (Some(network_name), Some(ip)) = (&record.network, &record.ip_address) else {
            return Ok(());
        };
        let Some(network) = self.networks.get(network_name).cloned() else {
            tracing::warn!(
                container = %record.name,
                network = %network_name,
                "Container attached to unknown network"
            );
            return Ok(());
        };
        let ip: Ipv4Addr = ip.parse().map_err(|_| CaskError::Config {
            message: format!("container {} has invalid address {ip}", record.name),
        })?;

        let endpoint = Endpoint::new(record, &network, ip);
        iptables::remove_port_mappings(&endpoint.port_mapping, ip);

        match self.driver(&network.driver) {
            Ok(driver) => {
                if let Err(e) = driver.disconnect(&network, &endpoint).await {
                    tracing::warn!(endpoint = %endpoint.id, error = %e, "Failed to detach endpoint");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Cannot detach endpoint"),
        }

        self.ipam.release(&network.subnet()?, ip)?;
        tracing::info!(container = %record.name, network = %network_name, %ip, "Container disconnected");
        Ok(())
    }
}

/// Move the container end of `endpoint` into the namespace of `pid` and give
/// it an address, a default route and a loopback device.
async fn configure_endpoint(endpoint: &Endpoint, network: &Network, pid: i32) -> CaskResult<()> {
    let ns_path = netns_path(pid);
    let ns_file = File::open(&ns_path)
        .map_err(|e| CaskError::io_context(format!("open {}", ns_path.display()), e))?;

    let links = LinkHandle::connect()?;
    let peer = endpoint.device.peer_name.clone();
    let peer_index = links.require_index(&peer).await?;
    links.move_to_netns(peer_index, ns_file.as_raw_fd()).await?;
    drop(ns_file);

    let ip = endpoint.ip_address;
    let prefix = network.subnet()?.network_length();
    let gateway = network.gateway;

    run_in_netns(ns_path, move || async move {
        let links = LinkHandle::connect()?;
        let index = links.require_index(&peer).await?;
        links.add_address(index, ip, prefix).await?;
        links.set_up(index).await?;

        let lo = links.require_index("lo").await?;
        links.set_up(lo).await?;

        links.add_default_route(index, gateway).await
    })
    .await?;

    tracing::debug!(peer = %endpoint.device.peer_name, %ip, pid, "Container interface configured");
    Ok(())
}

#[derive(Tabled)]
struct NetworkRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "IpRange")]
    ip_range: String,
    #[tabled(rename = "Driver")]
    driver: String,
}

/// Render networks as the `network list` table.
pub fn format_network_table<'a>(networks: impl IntoIterator<Item = &'a Network>) -> String {
    let rows: Vec<NetworkRow> = networks
        .into_iter()
        .map(|n| NetworkRow {
            name: n.name.clone(),
            ip_range: n.ip_range.clone(),
            driver: n.driver.clone(),
        })
        .collect();
    Table::new(rows).with(Style::blank()).to_string()
}
