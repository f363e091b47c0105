//! Kiln Catalog - Binary content catalog build and read
//!
//! This crate provides both sides of the catalog wire format:
//! - `CatalogBuilder` - build-time canonicalization, dependency compression,
//!   and binary emission
//! - `CatalogReader` / `DepSpan` - run-time zero-copy parsing and lookup
//! - `BundleManifest` - the TOML authoring input consumed by the build tool

mod builder;
mod layout;
mod manifest;
mod reader;
mod types;

pub use builder::CatalogBuilder;
pub use manifest::{BundleDecl, BundleManifest, EntryDecl};
pub use reader::{CatalogReader, DepSpan};
pub use types::CatalogEntry;
