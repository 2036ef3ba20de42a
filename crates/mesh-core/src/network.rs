//! The slice of the mesh network model that provisioning needs.

use alloc::vec::Vec;
use core::fmt;

use crate::address::{Address, AddressRange};
use crate::constants::{DEVICE_UUID_SIZE, NETWORK_KEY_SIZE};

/// Key Refresh procedure phase of a network key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyRefreshPhase {
    #[default]
    Normal,
    /// New key distributed; devices still transmit with the old one.
    KeyDistribution,
    UsingNewKeys,
}

/// A network key and its global index.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkKey {
    /// 12-bit global key index.
    pub index: u16,
    pub key: [u8; NETWORK_KEY_SIZE],
    pub old_key: Option<[u8; NETWORK_KEY_SIZE]>,
    pub phase: KeyRefreshPhase,
}

impl NetworkKey {
    pub fn new(index: u16, key: [u8; NETWORK_KEY_SIZE]) -> Self {
        Self {
            index: index & 0x0FFF,
            key,
            old_key: None,
            phase: KeyRefreshPhase::Normal,
        }
    }

    /// The key a newly provisioned device must receive.
    pub fn distributed_key(&self) -> &[u8; NETWORK_KEY_SIZE] {
        match (self.phase, &self.old_key) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.key,
        }
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKey")
            .field("index", &self.index)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Drop for NetworkKey {
    fn drop(&mut self) {
        self.key.fill(0);
        if let Some(old) = self.old_key.as_mut() {
            old.fill(0);
        }
    }
}

/// The IV Index and whether an IV Update is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IvIndex {
    pub index: u32,
    pub update_active: bool,
}

impl IvIndex {
    pub const fn new(index: u32, update_active: bool) -> Self {
        Self {
            index,
            update_active,
        }
    }

    /// IV Index used to transmit: during an update, the previous one.
    pub fn transmit_index(&self) -> u32 {
        if self.update_active {
            self.index.saturating_sub(1)
        } else {
            self.index
        }
    }
}

/// Flags octet of the provisioning data.
pub fn provisioning_flags(key: &NetworkKey, iv_index: &IvIndex) -> u8 {
    let mut flags = 0u8;
    if key.phase == KeyRefreshPhase::UsingNewKeys {
        flags |= 0x01;
    }
    if iv_index.update_active {
        flags |= 0x02;
    }
    flags
}

/// How the device public key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Security {
    /// Public key received out of band.
    Secure,
    #[default]
    Insecure,
}

/// A provisioned node.
#[derive(Clone, PartialEq, Eq)]
pub struct Node {
    pub uuid: [u8; DEVICE_UUID_SIZE],
    /// Address of the primary element.
    pub unicast_address: Address,
    pub element_count: u8,
    pub device_key: [u8; 16],
    pub network_key_index: u16,
    pub security: Security,
}

impl Node {
    /// Address of the last element.
    pub fn last_unicast_address(&self) -> Address {
        let count = u16::from(self.element_count.max(1));
        Address(self.unicast_address.0.saturating_add(count - 1))
    }

    pub fn address_range(&self) -> AddressRange {
        AddressRange::new(self.unicast_address, self.last_unicast_address())
    }

    pub fn contains_address(&self, address: Address) -> bool {
        self.address_range().contains(address)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("unicast_address", &self.unicast_address)
            .field("element_count", &self.element_count)
            .field("network_key_index", &self.network_key_index)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.device_key.fill(0);
    }
}

/// Network state: keys, IV Index, nodes and the local provisioner's
/// allocated unicast ranges.
#[derive(Debug, Clone, Default)]
pub struct MeshNetwork {
    pub network_keys: Vec<NetworkKey>,
    pub iv_index: IvIndex,
    pub nodes: Vec<Node>,
    pub provisioner_ranges: Vec<AddressRange>,
}

impl MeshNetwork {
    pub fn new(provisioner_ranges: Vec<AddressRange>) -> Self {
        Self {
            provisioner_ranges,
            ..Self::default()
        }
    }

    /// The primary network key (lowest index), if any.
    pub fn primary_network_key(&self) -> Option<&NetworkKey> {
        self.network_keys.iter().min_by_key(|key| key.index)
    }

    pub fn network_key(&self, index: u16) -> Option<&NetworkKey> {
        self.network_keys.iter().find(|key| key.index == index)
    }

    pub fn node(&self, uuid: &[u8; DEVICE_UUID_SIZE]) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.uuid == uuid)
    }

    pub fn node_with_address(&self, address: Address) -> Option<&Node> {
        self.nodes.iter().find(|node| node.contains_address(address))
    }

    /// Add `node`, replacing any node with the same UUID.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.retain(|existing| existing.uuid != node.uuid);
        self.nodes.push(node);
    }

    pub fn remove_node(&mut self, uuid: &[u8; DEVICE_UUID_SIZE]) -> Option<Node> {
        let position = self.nodes.iter().position(|node| &node.uuid == uuid)?;
        Some(self.nodes.remove(position))
    }

    /// Whether `element_count` addresses starting at `address` are unicast,
    /// unused, and inside the provisioner's ranges.
    pub fn is_address_range_available(&self, address: Address, element_count: u8) -> bool {
        if element_count == 0 || !address.is_unicast() {
            return false;
        }
        let Some(last) = address.0.checked_add(u16::from(element_count) - 1) else {
            return false;
        };
        let wanted = AddressRange::new(address, Address(last));
        if !Address(last).is_unicast() {
            return false;
        }
        let inside = self.provisioner_ranges.iter().any(|range| {
            range.contains(wanted.low) && range.contains(wanted.high)
        });
        inside
            && !self
                .nodes
                .iter()
                .any(|node| node.address_range().overlaps(&wanted))
    }

    /// First unicast address in the provisioner's ranges where
    /// `element_count` consecutive addresses are free.
    pub fn next_available_unicast_address(&self, element_count: u8) -> Option<Address> {
        if element_count == 0 {
            return None;
        }
        let span = u32::from(element_count);

        let mut used: Vec<(u32, u32)> = self
            .nodes
            .iter()
            .map(|node| {
                (
                    u32::from(node.unicast_address.0),
                    u32::from(node.last_unicast_address().0),
                )
            })
            .collect();
        used.sort_unstable();

        let mut ranges: Vec<AddressRange> = self
            .provisioner_ranges
            .iter()
            .filter(|range| range.is_valid())
            .copied()
            .collect();
        ranges.sort_by_key(|range| range.low);

        for range in ranges {
            let low = u32::from(range.low.0.max(Address::MIN_UNICAST.0));
            let high = u32::from(range.high.0.min(Address::MAX_UNICAST.0));
            let mut candidate = low;

            for &(first, last) in &used {
                if last < candidate {
                    continue;
                }
                if candidate + span - 1 < first {
                    break;
                }
                candidate = last + 1;
                if candidate + span - 1 > high {
                    break;
                }
            }

            if candidate + span - 1 <= high {
                return Some(Address(candidate as u16));
            }
        }
        None
    }
}
