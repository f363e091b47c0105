//! Hashed content addresses

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Only the low 24 bits of an address are significant.
const ADDRESS_BITS: u32 = 0x00FF_FFFF;

/// A hashed identifier for one directly addressable content item.
///
/// Computed by hashing the item's logical name; the name itself is never
/// stored in a shipped catalog, so an address is recomputed by re-hashing
/// whenever it is needed. The hash is not guaranteed collision-free - the
/// catalog builder rejects any pair of live entries whose addresses collide.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(u32);

impl Address {
    /// Hash a logical name into an address.
    ///
    /// Takes the first four bytes of the SHA-256 digest as a little-endian
    /// integer and keeps the low 24 bits.
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let word = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        Self(word & ADDRESS_BITS)
    }

    /// Reconstruct an address from its stored 32-bit value.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw & ADDRESS_BITS)
    }

    /// Get the raw value as stored in the catalog.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:06x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = Address::from_name("props/old_chair");
        let b = Address::from_name("props/old_chair");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_names_differ() {
        let a = Address::from_name("props/old_chair");
        let b = Address::from_name("props/new_chair");
        assert_ne!(a, b);
    }

    #[test]
    fn test_high_byte_masked() {
        let a = Address::from_raw(0xFFFF_FFFF);
        assert_eq!(a.raw(), 0x00FF_FFFF);

        for name in ["a", "boots", "ui/title_screen"] {
            assert!(Address::from_name(name).raw() <= 0x00FF_FFFF);
        }
    }

    #[test]
    fn test_display() {
        let a = Address::from_raw(0x00_0A_0B_0C);
        assert_eq!(a.to_string(), "0a0b0c");
    }
}
