//! Kiln Resolve - Run-time bundle resolution
//!
//! This crate provides the run-time half of the Kiln bundle system:
//! - `ResolveEngine` - asynchronous bundle resolution with request
//!   deduplication and blocking completion
//! - `BundleLoader` / `ItemProvider` - the collaborator interfaces the host
//!   engine supplies
//! - `AssetOps` / `AssetOperation` - per-request handles composing bundle
//!   resolution with item loads
//! - `memory` - in-memory collaborators for tests and tooling

mod callback;
mod engine;
mod loader;
pub mod memory;
mod ops;
mod pool;
mod provider;

pub use callback::{OpCallback, ResolveCallback};
pub use engine::{ResolveEngine, ResolveStatus};
pub use loader::BundleLoader;
pub use ops::{AssetOperation, AssetOps};
pub use pool::{Pool, Reclaim};
pub use provider::ItemProvider;
