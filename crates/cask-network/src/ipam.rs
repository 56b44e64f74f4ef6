//! Bitmap based IPv4 address allocation.
//!
//! Every subnet owns a string of `'0'` (free) and `'1'` (allocated)
//! characters, one per address of the subnet. Bit `i` stands for the
//! address `network + i + 1`, so bit 0 is the gateway. The whole map is
//! loaded from and written back to a single JSON file on every call.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use cask_common::{CaskError, CaskResult};
use cidr::{Ipv4Cidr, Ipv4Inet};
use serde::{Deserialize, Serialize};

/// Largest host part a bitmap is created for (a /8).
const MAX_HOST_BITS: u8 = 24;

/// Parse a subnet, accepting host bits (`172.18.0.1/24` is `172.18.0.0/24`).
///
/// # Errors
///
/// Returns [`CaskError::InvalidSubnet`] for anything that is not an IPv4 CIDR.
pub fn parse_subnet(subnet: &str) -> CaskResult<Ipv4Cidr> {
    subnet
        .trim()
        .parse::<Ipv4Inet>()
        .map(|inet| inet.network())
        .map_err(|_| CaskError::InvalidSubnet {
            subnet: subnet.to_string(),
        })
}

/// Canonical `a.b.c.d/n` key of a subnet.
#[must_use]
pub fn subnet_key(subnet: &Ipv4Cidr) -> String {
    format!("{}/{}", subnet.first_address(), subnet.network_length())
}

/// IP allocator persisted at [`Ipam::path`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipam {
    /// Location of the allocation file.
    subnet_allocator_path: PathBuf,
    /// Subnet key to bitmap.
    #[serde(default)]
    subnets: BTreeMap<String, String>,
}

impl Ipam {
    /// Create an allocator backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            subnet_allocator_path: path.into(),
            subnets: BTreeMap::new(),
        }
    }

    /// Allocation file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.subnet_allocator_path
    }

    /// Bitmap of a subnet as last loaded or written.
    #[must_use]
    pub fn bitmap(&self, subnet: &Ipv4Cidr) -> Option<&str> {
        self.subnets.get(&subnet_key(subnet)).map(String::as_str)
    }

    /// Allocate the lowest free address of `subnet`.
    ///
    /// Returns `Ok(None)` when every usable address is taken. The network
    /// and broadcast addresses are never handed out.
    ///
    /// # Errors
    ///
    /// Fails when the allocation file cannot be read or written, or the
    /// subnet is larger than a /8.
    pub fn allocate(&mut self, subnet: &Ipv4Cidr) -> CaskResult<Option<Ipv4Addr>> {
        self.load()?;

        let host_bits = 32 - subnet.network_length();
        if host_bits > MAX_HOST_BITS {
            return Err(CaskError::InvalidSubnet {
                subnet: subnet_key(subnet),
            });
        }
        let size = 1usize << host_bits;
        let key = subnet_key(subnet);

        let bitmap = self
            .subnets
            .entry(key.clone())
            .or_insert_with(|| "0".repeat(size));

        // index + 1 must stay below the broadcast address
        let usable = size.saturating_sub(2);
        let Some(index) = bitmap.bytes().take(usable).position(|b| b == b'0') else {
            tracing::warn!(subnet = %key, "No free address left in subnet");
            return Ok(None);
        };
        bitmap.replace_range(index..=index, "1");

        let ip = address_at(subnet, index);
        self.dump()?;

        tracing::debug!(subnet = %key, %ip, index, "Allocated address");
        Ok(Some(ip))
    }

    /// Return `ip` to the free pool of `subnet`.
    ///
    /// # Errors
    ///
    /// Fails when `ip` is not an allocatable address of `subnet` or the
    /// allocation file cannot be read or written.
    pub fn release(&mut self, subnet: &Ipv4Cidr, ip: Ipv4Addr) -> CaskResult<()> {
        self.load()?;

        let key = subnet_key(subnet);
        let index = index_of(subnet, ip).ok_or_else(|| CaskError::Config {
            message: format!("address {ip} does not belong to subnet {key}"),
        })?;

        let Some(bitmap) = self.subnets.get_mut(&key) else {
            tracing::warn!(subnet = %key, %ip, "Releasing address of unknown subnet");
            return Ok(());
        };
        if index >= bitmap.len() {
            return Err(CaskError::Config {
                message: format!("address {ip} is outside the bitmap of {key}"),
            });
        }
        bitmap.replace_range(index..=index, "0");

        self.dump()?;
        tracing::debug!(subnet = %key, %ip, index, "Released address");
        Ok(())
    }

    /// Replace the in-memory map with the file content.
    ///
    /// A missing file is a fresh allocator, not an error. A bitmap holding
    /// anything but `'0'` and `'1'` is.
    fn load(&mut self) -> CaskResult<()> {
        self.subnets.clear();

        let content = match std::fs::read_to_string(&self.subnet_allocator_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %self.subnet_allocator_path.display(),
                    "No allocation file yet, starting empty"
                );
                return Ok(());
            }
            Err(e) => {
                return Err(CaskError::io_context(
                    format!("read {}", self.subnet_allocator_path.display()),
                    e,
                ));
            }
        };

        let stored: Self = serde_json::from_str(&content)?;
        if let Some((key, _)) = stored
            .subnets
            .iter()
            .find(|(_, bitmap)| bitmap.bytes().any(|b| b != b'0' && b != b'1'))
        {
            return Err(CaskError::Config {
                message: format!(
                    "corrupt bitmap for subnet {key} in {}",
                    self.subnet_allocator_path.display()
                ),
            });
        }
        self.subnets = stored.subnets;
        Ok(())
    }

    /// Write the whole map back.
    fn dump(&self) -> CaskResult<()> {
        if let Some(parent) = self.subnet_allocator_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(&self.subnet_allocator_path, json).map_err(|e| {
            CaskError::io_context(
                format!("write {}", self.subnet_allocator_path.display()),
                e,
            )
        })
    }
}

/// Address represented by bitmap `index`.
fn address_at(subnet: &Ipv4Cidr, index: usize) -> Ipv4Addr {
    let base = u32::from(subnet.first_address());
    // index is bounded by the bitmap size, at most 2^24
    #[allow(clippy::cast_possible_truncation)]
    let offset = index as u32;
    Ipv4Addr::from(base + offset + 1)
}

/// Bitmap index of `ip`, if it is above the network address of `subnet`.
fn index_of(subnet: &Ipv4Cidr, ip: Ipv4Addr) -> Option<usize> {
    if !subnet.contains(&ip) {
        return None;
    }
    let offset = u32::from(ip).checked_sub(u32::from(subnet.first_address()))?;
    offset.checked_sub(1).map(|i| i as usize)
}
