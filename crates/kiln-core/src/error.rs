//! Error types for Kiln

use crate::{Address, BundleId, BundleIndex};
use thiserror::Error;

/// The main error type for Kiln operations
#[derive(Debug, Error)]
pub enum KilnError {
    // Build invariant violations. These abort a catalog build and are never
    // recovered from.
    #[error("duplicate address {address}: claimed by bundle {first} and bundle {second}")]
    DuplicateAddress {
        address: Address,
        first: BundleId,
        second: BundleId,
    },

    #[error("dependency span for bundle {0} does not reconstruct its dependency set")]
    DepSpanMismatch(BundleId),

    #[error("catalog is missing reserved built-in bundle {0}")]
    MissingBuiltin(BundleId),

    #[error("catalog section overflow: {0}")]
    CatalogOverflow(String),

    // Run-time lookup failures.
    #[error("unknown bundle id {0}")]
    UnknownBundleId(BundleId),

    #[error("no bundle contains address {0}")]
    UnknownAddress(Address),

    #[error("bundle index {index} out of range (catalog has {count} bundles)")]
    IndexOutOfRange { index: BundleIndex, count: u16 },

    // Catalog parse failures.
    #[error("catalog truncated: {0}")]
    CatalogTruncated(String),

    #[error("catalog malformed: {0}")]
    CatalogMalformed(String),

    // Run-time load failures.
    #[error("bundle {0} failed to load")]
    LoadFailed(BundleId),

    #[error("item '{name}' failed to load from bundle {bundle}")]
    ItemLoadFailed { bundle: BundleId, name: String },

    #[error("bundle {0} has no resolution in flight")]
    NotResolving(BundleId),

    #[error("asset operation is no longer tracked")]
    StaleOperation,

    // Authoring input.
    #[error("manifest error: {0}")]
    ManifestError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Kiln operations
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = KilnError::DuplicateAddress {
            address: Address::from_raw(0x00ABCDEF),
            first: BundleId::from_raw(0x0001),
            second: BundleId::from_raw(0x0009),
        };
        let msg = err.to_string();
        assert!(msg.contains("abcdef"));
        assert!(msg.contains("#0001"));
        assert!(msg.contains("#0009"));

        let err = KilnError::LoadFailed(BundleId::from_raw(0x0401));
        assert!(err.to_string().contains("#0401"));
    }
}
