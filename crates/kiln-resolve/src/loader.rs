//! Bundle loader collaborator interface

use kiln_core::BundleId;

/// The underlying bundle container I/O, supplied by the host engine.
///
/// The container format is opaque to the resolution engine: it only needs to
/// start a load by raw id, check and force completion, and collect the
/// result. Completion notification is pull-based - the engine polls pending
/// requests from its update pump, which is the cooperative single-threaded
/// equivalent of a completion event.
pub trait BundleLoader {
    /// The loaded bundle handle.
    type Bundle;
    /// An in-flight load request.
    type Request;

    /// Begin an asynchronous load. Never blocks.
    fn start_load(&mut self, id: BundleId) -> Self::Request;

    /// Non-blocking completion check.
    fn poll(&mut self, request: &mut Self::Request) -> bool;

    /// Block until the request finishes. The loader drives the load itself;
    /// forward progress must not depend on anything pumping `poll`.
    fn wait(&mut self, request: &mut Self::Request);

    /// Consume a finished request. `None` means the load failed.
    fn finish(&mut self, request: Self::Request) -> Option<Self::Bundle>;

    /// Load a bundle synchronously, bypassing the request machinery.
    fn load_sync(&mut self, id: BundleId) -> Option<Self::Bundle>;
}
