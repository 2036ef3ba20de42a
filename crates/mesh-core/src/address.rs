//! Mesh addresses and address ranges.

use core::fmt;

/// A 16-bit mesh address.
///
/// The high bits select the class: `0x0000` unassigned, `0x0001..=0x7FFF`
/// unicast, `0x8000..=0xBFFF` virtual, `0xC000..=0xFFFF` group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub u16);

impl Address {
    pub const UNASSIGNED: Address = Address(0x0000);
    pub const MIN_UNICAST: Address = Address(0x0001);
    pub const MAX_UNICAST: Address = Address(0x7FFF);
    pub const ALL_PROXIES: Address = Address(0xFFFC);
    pub const ALL_FRIENDS: Address = Address(0xFFFD);
    pub const ALL_RELAYS: Address = Address(0xFFFE);
    pub const ALL_NODES: Address = Address(0xFFFF);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    pub const fn is_unassigned(self) -> bool {
        self.0 == 0x0000
    }

    pub const fn is_unicast(self) -> bool {
        self.0 & 0x8000 == 0x0000 && self.0 != 0x0000
    }

    pub const fn is_virtual(self) -> bool {
        self.0 & 0xC000 == 0x8000
    }

    pub const fn is_group(self) -> bool {
        self.0 & 0xC000 == 0xC000
    }

    /// Group or virtual. Messages to these are never acknowledged.
    pub const fn is_multicast(self) -> bool {
        self.0 & 0x8000 == 0x8000
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

impl From<u16> for Address {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{:04X})", self.0)
    }
}

/// An inclusive range of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    pub low: Address,
    pub high: Address,
}

impl AddressRange {
    pub const fn new(low: Address, high: Address) -> Self {
        Self { low, high }
    }

    /// The whole unicast address space.
    pub const fn all_unicast() -> Self {
        Self::new(Address::MIN_UNICAST, Address::MAX_UNICAST)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.low <= address && address <= self.high
    }

    pub fn is_valid(&self) -> bool {
        self.low <= self.high
    }

    pub fn len(&self) -> usize {
        if self.is_valid() {
            usize::from(self.high.0 - self.low.0) + 1
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}
