//! Network driver abstraction.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use cask_common::CaskResult;
use cidr::Ipv4Cidr;

use crate::network::{Endpoint, Network};

/// A way of realising networks on the host.
///
/// Drivers own the host side of a network: the shared device, the NAT
/// rules that belong to it and the host end of every endpoint. Moving the
/// container end into a namespace is left to the caller.
#[async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Name used on the command line and in network records.
    fn name(&self) -> &'static str;

    /// Create the host resources for a network and return its record.
    async fn create(&self, subnet: Ipv4Cidr, gateway: Ipv4Addr, name: &str)
    -> CaskResult<Network>;

    /// Tear down the host resources of `network`.
    async fn delete(&self, network: &Network) -> CaskResult<()>;

    /// Create the endpoint's device pair and attach the host end.
    async fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> CaskResult<()>;

    /// Remove the endpoint's device pair.
    async fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> CaskResult<()>;
}
