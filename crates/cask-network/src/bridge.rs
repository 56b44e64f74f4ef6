//! Linux bridge driver.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use cask_common::CaskResult;
use cidr::Ipv4Cidr;

use crate::driver::NetworkDriver;
use crate::ipam::subnet_key;
use crate::iptables;
use crate::link::{LinkHandle, validate_interface_name};
use crate::network::{Endpoint, Network};

/// Driver name.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Lookups of a freshly created bridge before giving up.
const LINK_LOOKUP_ATTEMPTS: usize = 2;
/// Pause between lookups.
const LINK_LOOKUP_BACKOFF: Duration = Duration::from_secs(2);

/// Networks backed by a Linux bridge named after the network, with the
/// gateway address on the bridge and source NAT for the subnet.
#[derive(Debug)]
pub struct BridgeDriver {
    links: LinkHandle,
}

impl BridgeDriver {
    /// Create a driver issuing requests over `links`.
    #[must_use]
    pub const fn new(links: LinkHandle) -> Self {
        Self { links }
    }

    /// Create the bridge unless an interface of that name already exists.
    async fn ensure_bridge(&self, name: &str) -> CaskResult<()> {
        if self.links.index_of(name).await?.is_some() {
            tracing::debug!(bridge = name, "Bridge already exists");
            return Ok(());
        }
        tracing::debug!(bridge = name, "Creating bridge");
        self.links.add_bridge(name).await
    }

    /// Resolve `name`, retrying while a new device settles.
    async fn wait_for_link(&self, name: &str) -> CaskResult<u32> {
        let mut attempt = 1;
        loop {
            match self.links.require_index(name).await {
                Ok(index) => return Ok(index),
                Err(e) if attempt < LINK_LOOKUP_ATTEMPTS => {
                    tracing::debug!(link = name, attempt, error = %e, "Link not ready, retrying");
                    tokio::time::sleep(LINK_LOOKUP_BACKOFF).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        BRIDGE_DRIVER
    }

    async fn create(
        &self,
        subnet: Ipv4Cidr,
        gateway: Ipv4Addr,
        name: &str,
    ) -> CaskResult<Network> {
        validate_interface_name(name)?;
        let ip_range = subnet_key(&subnet);

        self.ensure_bridge(name).await?;

        let index = self.wait_for_link(name).await?;
        self.links
            .add_address(index, gateway, subnet.network_length())
            .await?;
        self.links.set_up(index).await?;

        iptables::add_masquerade(&ip_range, name)?;

        tracing::info!(bridge = name, subnet = %ip_range, %gateway, "Bridge network created");
        Ok(Network {
            name: name.to_string(),
            ip_range,
            driver: BRIDGE_DRIVER.to_string(),
            gateway,
        })
    }

    async fn delete(&self, network: &Network) -> CaskResult<()> {
        if let Err(e) = iptables::delete_masquerade(&network.ip_range, &network.name) {
            tracing::warn!(bridge = %network.name, error = %e, "Failed to remove source NAT rule");
        }

        match self.links.index_of(&network.name).await? {
            Some(index) => {
                self.links.delete(index).await?;
                tracing::info!(bridge = %network.name, "Bridge deleted");
            }
            None => tracing::debug!(bridge = %network.name, "Bridge already gone"),
        }
        Ok(())
    }

    async fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> CaskResult<()> {
        let bridge = self.links.require_index(&network.name).await?;

        let veth = &endpoint.device;
        self.links.add_veth(&veth.name, &veth.peer_name).await?;

        let host = self.links.require_index(&veth.name).await?;
        self.links.set_controller(host, bridge).await?;
        self.links.set_up(host).await?;

        endpoint.mac_address = self.links.mac_address(&veth.peer_name).await?;

        tracing::debug!(
            endpoint = %endpoint.id,
            veth = %veth.name,
            peer = %veth.peer_name,
            bridge = %network.name,
            "Endpoint attached to bridge"
        );
        Ok(())
    }

    async fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> CaskResult<()> {
        match self.links.index_of(&endpoint.device.name).await? {
            Some(index) => self.links.delete(index).await?,
            None => tracing::debug!(veth = %endpoint.device.name, "Veth already gone"),
        }
        tracing::debug!(endpoint = %endpoint.id, bridge = %network.name, "Endpoint detached");
        Ok(())
    }
}
