//! Kiln Core - Foundational types for the Kiln bundle system
//!
//! This crate provides the types that all other Kiln crates depend on:
//! - `Address` - 24-bit hashed identifier for one addressable content item
//! - `BundleId` - Raw 16-bit bundle identifier (major namespace / minor slot)
//! - `BundleIndex` - Dense canonical rank of a bundle in a built catalog
//! - Error types and Result alias

mod address;
mod bundle_id;
mod error;

pub use address::Address;
pub use bundle_id::{BundleId, BundleIndex};
pub use error::{KilnError, Result};
