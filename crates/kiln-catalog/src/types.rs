//! Catalog input types

use kiln_core::{Address, BundleId};

/// One addressable content item assigned to a bundle.
///
/// The `address` is `None` for items that are only reachable through their
/// bundle (not directly addressable). `dependencies` lists the bundles this
/// item needs loaded besides its own; the builder folds these into the owning
/// bundle's dependency set, dropping the owner itself and the built-in
/// bundles, which are handled specially.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub bundle: BundleId,
    pub address: Option<Address>,
    pub dependencies: Vec<BundleId>,
}

impl CatalogEntry {
    /// An entry with no address and no dependencies.
    pub fn new(bundle: BundleId) -> Self {
        Self {
            bundle,
            address: None,
            dependencies: Vec::new(),
        }
    }
}
