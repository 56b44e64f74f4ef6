//! # cask-network
//!
//! Container networking for cask:
//! - Bitmap IP allocation persisted as JSON
//! - A driver abstraction with a Linux bridge implementation
//! - Veth wiring across network namespaces
//! - Source NAT and port forwarding through iptables

#![warn(missing_docs)]

pub mod bridge;
pub mod driver;
pub mod ipam;
pub mod iptables;
pub mod link;
pub mod manager;
pub mod netns;
pub mod network;

pub use bridge::{BRIDGE_DRIVER, BridgeDriver};
pub use driver::NetworkDriver;
pub use ipam::{Ipam, parse_subnet};
pub use iptables::PortMapping;
pub use link::LinkHandle;
pub use manager::{NetworkManager, format_network_table};
pub use netns::{NetnsGuard, run_in_netns};
pub use network::{Endpoint, Network, VethPair};
