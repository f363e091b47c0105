//! In-memory collaborators for tests and tooling
//!
//! `MemoryLoader` and `MemoryProvider` implement the collaborator traits
//! against plain maps, with instrumentation (load counters, manual completion
//! gating) that resolution tests rely on. Not intended for shipping content.

use crate::loader::BundleLoader;
use crate::provider::ItemProvider;
use kiln_core::BundleId;
use std::collections::{HashMap, HashSet};

/// A loadable in-memory bundle: a named set of item payloads.
#[derive(Debug, Clone)]
pub struct MemoryBundle {
    pub id: BundleId,
    pub items: HashMap<String, Vec<u8>>,
}

impl MemoryBundle {
    pub fn new(id: BundleId) -> Self {
        Self {
            id,
            items: HashMap::new(),
        }
    }

    pub fn insert_item(&mut self, name: &str, payload: Vec<u8>) {
        self.items.insert(name.to_string(), payload);
    }
}

/// An in-flight `MemoryLoader` request.
#[derive(Debug)]
pub struct MemoryRequest {
    id: BundleId,
    ready: bool,
}

/// Bundle loader over an in-memory bundle map.
///
/// In the default automatic mode, requests complete on the first poll. In
/// manual mode (`MemoryLoader::manual`) a request stays pending until its id
/// is `release`d, which lets tests hold loads open and observe request
/// deduplication. `wait` always forces completion, in either mode.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    bundles: HashMap<BundleId, MemoryBundle>,
    auto_complete: bool,
    released: HashSet<BundleId>,
    async_starts: HashMap<BundleId, u32>,
    sync_loads: HashMap<BundleId, u32>,
}

impl MemoryLoader {
    /// A loader whose requests complete on the first poll.
    pub fn new() -> Self {
        Self {
            auto_complete: true,
            ..Self::default()
        }
    }

    /// A loader whose requests stay pending until released.
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bundle: MemoryBundle) {
        self.bundles.insert(bundle.id, bundle);
    }

    /// Allow pending requests for `id` to complete on their next poll.
    pub fn release(&mut self, id: BundleId) {
        self.released.insert(id);
    }

    /// Switch to automatic completion for everything still pending.
    pub fn release_all(&mut self) {
        self.auto_complete = true;
    }

    /// How many async loads were started for `id`.
    pub fn async_start_count(&self, id: BundleId) -> u32 {
        self.async_starts.get(&id).copied().unwrap_or(0)
    }

    /// How many synchronous loads were issued for `id`.
    pub fn sync_load_count(&self, id: BundleId) -> u32 {
        self.sync_loads.get(&id).copied().unwrap_or(0)
    }
}

impl BundleLoader for MemoryLoader {
    type Bundle = MemoryBundle;
    type Request = MemoryRequest;

    fn start_load(&mut self, id: BundleId) -> MemoryRequest {
        *self.async_starts.entry(id).or_insert(0) += 1;
        MemoryRequest { id, ready: false }
    }

    fn poll(&mut self, request: &mut MemoryRequest) -> bool {
        if !request.ready && (self.auto_complete || self.released.contains(&request.id)) {
            request.ready = true;
        }
        request.ready
    }

    fn wait(&mut self, request: &mut MemoryRequest) {
        request.ready = true;
    }

    fn finish(&mut self, request: MemoryRequest) -> Option<MemoryBundle> {
        self.bundles.get(&request.id).cloned()
    }

    fn load_sync(&mut self, id: BundleId) -> Option<MemoryBundle> {
        *self.sync_loads.entry(id).or_insert(0) += 1;
        self.bundles.get(&id).cloned()
    }
}

/// An in-flight `MemoryProvider` request.
#[derive(Debug)]
pub struct MemoryItemRequest {
    name: String,
    payload: Option<Vec<u8>>,
    ready: bool,
}

/// Item provider that reads payloads out of a `MemoryBundle` by name.
///
/// Same completion gating as `MemoryLoader`, keyed by item name.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    auto_complete: bool,
    released: HashSet<String>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            auto_complete: true,
            released: HashSet::new(),
        }
    }

    pub fn manual() -> Self {
        Self::default()
    }

    pub fn release(&mut self, name: &str) {
        self.released.insert(name.to_string());
    }
}

impl ItemProvider for MemoryProvider {
    type Bundle = MemoryBundle;
    type Item = Vec<u8>;
    type Request = MemoryItemRequest;

    fn start_load(&mut self, bundle: &MemoryBundle, name: &str) -> MemoryItemRequest {
        MemoryItemRequest {
            name: name.to_string(),
            payload: bundle.items.get(name).cloned(),
            ready: false,
        }
    }

    fn poll(&mut self, request: &mut MemoryItemRequest) -> bool {
        if !request.ready && (self.auto_complete || self.released.contains(&request.name)) {
            request.ready = true;
        }
        request.ready
    }

    fn wait(&mut self, request: &mut MemoryItemRequest) {
        request.ready = true;
    }

    fn finish(&mut self, request: MemoryItemRequest) -> Option<Vec<u8>> {
        request.payload
    }
}
