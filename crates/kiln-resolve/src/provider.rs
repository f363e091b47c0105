//! Item provider collaborator interface

/// A per-asset-type loader that pulls one concrete item out of a loaded
/// bundle.
///
/// Mirrors [`crate::loader::BundleLoader`]'s request shape so asset
/// operations can drive item loads the same way the engine drives bundle
/// loads: start, poll or wait, then finish.
pub trait ItemProvider {
    /// The bundle handle type this provider reads from.
    type Bundle;
    /// The loaded item.
    type Item;
    /// An in-flight item load.
    type Request;

    /// Begin loading `name` out of a loaded bundle. Never blocks.
    fn start_load(&mut self, bundle: &Self::Bundle, name: &str) -> Self::Request;

    /// Non-blocking completion check.
    fn poll(&mut self, request: &mut Self::Request) -> bool;

    /// Block until the request finishes.
    fn wait(&mut self, request: &mut Self::Request);

    /// Consume a finished request. `None` means the item load failed.
    fn finish(&mut self, request: Self::Request) -> Option<Self::Item>;
}
