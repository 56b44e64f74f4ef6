//! Thin wrapper over rtnetlink for the link, address and route calls the
//! bridge driver needs.

use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::RawFd;

use cask_common::{CaskError, CaskResult};
use futures::TryStreamExt;
use rtnetlink::packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::{Handle, LinkBridge, LinkUnspec, LinkVeth, RouteMessageBuilder};

/// Linux interface names are at most 15 bytes.
pub const MAX_INTERFACE_NAME: usize = 15;

/// A netlink connection bound to the network namespace of the thread that
/// opened it.
#[derive(Clone)]
pub struct LinkHandle {
    handle: Handle,
}

impl std::fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle").finish_non_exhaustive()
    }
}

impl LinkHandle {
    /// Open a netlink socket and drive it on the current runtime.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be created.
    pub fn connect() -> CaskResult<Self> {
        let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| {
            CaskError::Netlink {
                message: format!("failed to open netlink socket: {e}"),
            }
        })?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    async fn link_by_name(&self, name: &str) -> CaskResult<Option<LinkMessage>> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(link) => Ok(link),
            Err(e) if errno(&e) == Some(libc::ENODEV) => Ok(None),
            Err(e) => Err(netlink_error(&format!("lookup link {name}"), &e)),
        }
    }

    /// Index of the interface `name`, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails on any lookup error other than a missing device.
    pub async fn index_of(&self, name: &str) -> CaskResult<Option<u32>> {
        Ok(self.link_by_name(name).await?.map(|link| link.header.index))
    }

    /// Index of the interface `name`.
    ///
    /// # Errors
    ///
    /// Fails when the interface does not exist.
    pub async fn require_index(&self, name: &str) -> CaskResult<u32> {
        self.index_of(name).await?.ok_or_else(|| CaskError::Netlink {
            message: format!("link {name} not found"),
        })
    }

    /// Hardware address of `name`, formatted `aa:bb:cc:dd:ee:ff`.
    ///
    /// # Errors
    ///
    /// Fails when the lookup fails.
    pub async fn mac_address(&self, name: &str) -> CaskResult<Option<String>> {
        let Some(link) = self.link_by_name(name).await? else {
            return Ok(None);
        };
        Ok(link.attributes.iter().find_map(|attr| match attr {
            LinkAttribute::Address(bytes) => Some(
                bytes
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect::<Vec<_>>()
                    .join(":"),
            ),
            _ => None,
        }))
    }

    /// Create a bridge device.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request.
    pub async fn add_bridge(&self, name: &str) -> CaskResult<()> {
        self.handle
            .link()
            .add(LinkBridge::new(name).build())
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("create bridge {name}"), &e))
    }

    /// Create a veth pair.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request, e.g. a name is taken.
    pub async fn add_veth(&self, name: &str, peer: &str) -> CaskResult<()> {
        self.handle
            .link()
            .add(LinkVeth::new(name, peer).build())
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("create veth {name}/{peer}"), &e))
    }

    /// Enslave `index` to the bridge `controller`.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request.
    pub async fn set_controller(&self, index: u32, controller: u32) -> CaskResult<()> {
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).controller(controller).build())
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("attach link {index} to {controller}"), &e))
    }

    /// Bring `index` up.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request.
    pub async fn set_up(&self, index: u32) -> CaskResult<()> {
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).up().build())
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("set link {index} up"), &e))
    }

    /// Move `index` into the network namespace referred to by `netns_fd`.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request.
    pub async fn move_to_netns(&self, index: u32, netns_fd: RawFd) -> CaskResult<()> {
        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).setns_by_fd(netns_fd).build())
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("move link {index} to namespace"), &e))
    }

    /// Assign `address/prefix` to `index`. An address already present is
    /// accepted.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request.
    pub async fn add_address(&self, index: u32, address: Ipv4Addr, prefix: u8) -> CaskResult<()> {
        match self
            .handle
            .address()
            .add(index, IpAddr::V4(address), prefix)
            .execute()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if errno(&e) == Some(libc::EEXIST) => {
                tracing::debug!(index, %address, prefix, "Address already assigned");
                Ok(())
            }
            Err(e) => Err(netlink_error(
                &format!("add address {address}/{prefix} to link {index}"),
                &e,
            )),
        }
    }

    /// Add a default route through `gateway` out of `index`.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request.
    pub async fn add_default_route(&self, index: u32, gateway: Ipv4Addr) -> CaskResult<()> {
        let route = RouteMessageBuilder::<Ipv4Addr>::new()
            .output_interface(index)
            .gateway(gateway)
            .build();
        self.handle
            .route()
            .add(route)
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("add default route via {gateway}"), &e))
    }

    /// Delete the link `index`. Deleting either end of a veth removes both.
    ///
    /// # Errors
    ///
    /// Fails when the kernel rejects the request.
    pub async fn delete(&self, index: u32) -> CaskResult<()> {
        self.handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| netlink_error(&format!("delete link {index}"), &e))
    }
}

/// Kernel errno carried by a netlink error reply.
fn errno(err: &rtnetlink::Error) -> Option<i32> {
    match err {
        rtnetlink::Error::NetlinkError(msg) => msg.to_io().raw_os_error(),
        _ => None,
    }
}

fn netlink_error(operation: &str, err: &rtnetlink::Error) -> CaskError {
    if errno(err) == Some(libc::EPERM) {
        return CaskError::PermissionDenied {
            operation: operation.to_string(),
        };
    }
    CaskError::Netlink {
        message: format!("{operation}: {err}"),
    }
}

/// Check that `name` fits in an interface name.
///
/// # Errors
///
/// Returns [`CaskError::Config`] for empty or overlong names.
pub fn validate_interface_name(name: &str) -> CaskResult<()> {
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME || name.contains(['/', ' ']) {
        return Err(CaskError::Config {
            message: format!(
                "{name:?} is not a valid interface name (1-{MAX_INTERFACE_NAME} characters, no '/' or spaces)"
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_names() {
        assert!(validate_interface_name("testbr").is_ok());
        assert!(validate_interface_name("cif-01234").is_ok());
        assert!(validate_interface_name(&"b".repeat(15)).is_ok());
        assert!(validate_interface_name(&"b".repeat(16)).is_err());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("a/b").is_err());
    }

    #[tokio::test]
    #[ignore = "requires a Linux host with netlink"]
    async fn test_loopback_lookup() {
        let links = LinkHandle::connect().unwrap();
        assert_eq!(links.index_of("lo").await.unwrap(), Some(1));
        assert_eq!(links.index_of("cask-none0").await.unwrap(), None);
    }
}
