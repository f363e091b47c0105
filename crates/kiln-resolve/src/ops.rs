//! Asset operations
//!
//! An [`AssetOperation`] composes bundle resolution with a pluggable item
//! provider: resolve the owning bundle (plus dependencies), then load the
//! named item out of it. Callers get one uniform poll / callback / block
//! surface regardless of how far along the underlying work is.
//!
//! Per-request state lives in pooled [`AssetOpBlock`]s owned by an
//! [`AssetOps`] instance (one per provider, i.e. per asset type). Bundle
//! readiness reaches the ops system through a `WithIndex` resolution callback
//! that pushes the operation id onto a shared ready queue; polling also
//! drives the same transition directly, so either style makes progress.

use crate::callback::{OpCallback, ResolveCallback};
use crate::engine::{ResolveEngine, ResolveStatus};
use crate::loader::BundleLoader;
use crate::pool::{Pool, Reclaim};
use crate::provider::ItemProvider;
use kiln_core::{BundleId, BundleIndex, KilnError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Identifier of one in-flight asset operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OpId(u32);

/// Pooled per-request state: target bundle, item name, the provider request
/// once started, and the pending callback list.
struct AssetOpBlock<P: ItemProvider> {
    bundle: BundleIndex,
    name: String,
    request: Option<P::Request>,
    callbacks: Vec<OpCallback<P::Item>>,
}

impl<P: ItemProvider> Default for AssetOpBlock<P> {
    fn default() -> Self {
        Self {
            bundle: BundleIndex::from_raw(0),
            name: String::new(),
            request: None,
            callbacks: Vec::new(),
        }
    }
}

impl<P: ItemProvider> Reclaim for AssetOpBlock<P> {
    fn reclaim(&mut self) {
        self.name.clear();
        self.request = None;
        self.callbacks.clear();
    }

    fn is_clear(&self) -> bool {
        self.request.is_none() && self.callbacks.is_empty()
    }
}

/// Drives item loads for one provider.
pub struct AssetOps<P: ItemProvider> {
    provider: P,
    blocks: HashMap<OpId, AssetOpBlock<P>>,
    finished: HashMap<OpId, Rc<P::Item>>,
    failures: HashMap<OpId, (BundleId, String)>,
    /// Operations whose bundle resolution completed, queued by the engine
    /// callback for the next pump.
    bundle_ready: Rc<RefCell<Vec<OpId>>>,
    block_pool: Pool<AssetOpBlock<P>>,
    next_id: u32,
}

impl<P: ItemProvider> AssetOps<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            blocks: HashMap::new(),
            finished: HashMap::new(),
            failures: HashMap::new(),
            bundle_ready: Rc::new(RefCell::new(Vec::new())),
            block_pool: Pool::new(),
            next_id: 0,
        }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Begin loading `name` out of the bundle at `bundle`.
    ///
    /// If the bundle is already resolved the item load starts immediately;
    /// otherwise the operation registers with the resolution engine and the
    /// item load starts once the bundle callback fires (or once polling
    /// observes the bundle done).
    pub fn load<L, I>(
        &mut self,
        engine: &mut ResolveEngine<L>,
        bundle: BundleIndex,
        deps: I,
        name: &str,
    ) -> Result<AssetOperation<P::Item>>
    where
        L: BundleLoader<Bundle = P::Bundle>,
        I: IntoIterator<Item = BundleIndex>,
    {
        let id = OpId(self.next_id);
        self.next_id += 1;

        let mut block = self.block_pool.rent();
        block.bundle = bundle;
        block.name.push_str(name);

        if let Some(handle) = engine.try_get_resolved(bundle) {
            block.request = Some(self.provider.start_load(&handle, name));
        } else {
            let queue = Rc::clone(&self.bundle_ready);
            let status = engine.resolve_async(
                bundle,
                deps,
                ResolveCallback::WithIndex(Box::new(move |_| {
                    queue.borrow_mut().push(id);
                })),
            );
            match status {
                Ok(ResolveStatus::Pending) => {}
                Ok(ResolveStatus::Done) => {
                    // Resolved synchronously; the queued callback was dropped.
                    match engine.try_get_resolved(bundle) {
                        Some(handle) => {
                            block.request = Some(self.provider.start_load(&handle, name))
                        }
                        None => {
                            block.reclaim();
                            self.block_pool.give_back(block);
                            return Err(KilnError::StaleOperation);
                        }
                    }
                }
                Err(e) => {
                    block.reclaim();
                    self.block_pool.give_back(block);
                    return Err(e);
                }
            }
        }

        self.blocks.insert(id, block);
        Ok(AssetOperation {
            state: OpState::Pending(id),
        })
    }

    /// Pump: start item loads for bundles that became ready, and complete
    /// item loads the provider has finished. Non-blocking.
    pub fn update<L>(&mut self, engine: &mut ResolveEngine<L>) -> Result<()>
    where
        L: BundleLoader<Bundle = P::Bundle>,
    {
        let ready: Vec<OpId> = self.bundle_ready.borrow_mut().drain(..).collect();
        for id in ready {
            self.start_item_load(engine, id)?;
        }

        // Polling alone must make progress: pick up bundles that resolved
        // without this op's callback having been queued yet.
        let unstarted: Vec<OpId> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.request.is_none())
            .map(|(&id, _)| id)
            .collect();
        for id in unstarted {
            self.start_item_load(engine, id)?;
        }

        let in_flight: Vec<OpId> = self
            .blocks
            .iter()
            .filter(|(_, block)| block.request.is_some())
            .map(|(&id, _)| id)
            .collect();
        for id in in_flight {
            let done = match self.blocks.get_mut(&id) {
                Some(block) => match block.request.as_mut() {
                    Some(request) => self.provider.poll(request),
                    None => false,
                },
                None => false,
            };
            if done {
                self.finish_block(engine, id)?;
            }
        }
        Ok(())
    }

    /// Start the provider load for an operation whose bundle is resolved.
    /// No-op if the bundle is not done yet or the load already started.
    fn start_item_load<L>(&mut self, engine: &ResolveEngine<L>, id: OpId) -> Result<()>
    where
        L: BundleLoader<Bundle = P::Bundle>,
    {
        let block = match self.blocks.get_mut(&id) {
            Some(block) => block,
            None => return Ok(()),
        };
        if block.request.is_some() {
            return Ok(());
        }
        let handle = match engine.try_get_resolved(block.bundle) {
            Some(handle) => handle,
            None => return Ok(()),
        };
        block.request = Some(self.provider.start_load(&handle, &block.name));
        Ok(())
    }

    /// Consume a finished provider request: deliver callbacks and stash the
    /// result, or record the failure.
    fn finish_block<L>(&mut self, engine: &ResolveEngine<L>, id: OpId) -> Result<()>
    where
        L: BundleLoader<Bundle = P::Bundle>,
    {
        let mut block = match self.blocks.remove(&id) {
            Some(block) => block,
            None => return Ok(()),
        };
        let request = match block.request.take() {
            Some(request) => request,
            None => {
                self.blocks.insert(id, block);
                return Ok(());
            }
        };

        match self.provider.finish(request) {
            Some(item) => {
                let item = Rc::new(item);
                for cb in block.callbacks.drain(..) {
                    cb.dispatch(&item);
                }
                self.finished.insert(id, item);
                self.block_pool.give_back(block);
                Ok(())
            }
            None => {
                let raw = engine.raw_id_of(block.bundle)?;
                let name = std::mem::take(&mut block.name);
                block.callbacks.clear();
                self.block_pool.give_back(block);
                log::error!("item '{}' failed to load from bundle {}", name, raw);
                self.failures.insert(id, (raw, name.clone()));
                Err(KilnError::ItemLoadFailed { bundle: raw, name })
            }
        }
    }

    /// Block on the operation's provider request, finishing it.
    fn wait_item<L>(&mut self, engine: &ResolveEngine<L>, id: OpId) -> Result<()>
    where
        L: BundleLoader<Bundle = P::Bundle>,
    {
        let waited = match self.blocks.get_mut(&id) {
            Some(block) => match block.request.as_mut() {
                Some(request) => {
                    self.provider.wait(request);
                    true
                }
                None => false,
            },
            None => false,
        };
        if waited {
            self.finish_block(engine, id)?;
        }
        Ok(())
    }

    fn take_finished(&mut self, id: OpId) -> Option<Rc<P::Item>> {
        self.finished.remove(&id)
    }

    fn failure_of(&self, id: OpId) -> Option<KilnError> {
        self.failures.get(&id).map(|(bundle, name)| KilnError::ItemLoadFailed {
            bundle: *bundle,
            name: name.clone(),
        })
    }

    fn bundle_of(&self, id: OpId) -> Option<BundleIndex> {
        self.blocks.get(&id).map(|block| block.bundle)
    }

    fn has_request(&self, id: OpId) -> bool {
        self.blocks
            .get(&id)
            .map(|block| block.request.is_some())
            .unwrap_or(false)
    }

    fn push_callback(&mut self, id: OpId, callback: OpCallback<P::Item>) {
        if let Some(block) = self.blocks.get_mut(&id) {
            block.callbacks.push(callback);
        } else if let Some(item) = self.finished.get(&id) {
            // Result already computed; the contract is inline invocation.
            callback.dispatch(item);
        } else {
            log::warn!("callback registered on a failed asset operation; dropped");
        }
    }

    #[cfg(test)]
    fn pooled_blocks(&self) -> usize {
        self.block_pool.idle()
    }
}

/// State of a caller-held operation handle.
enum OpState<T> {
    Pending(OpId),
    Ready(Rc<T>),
}

/// A caller-held handle to one asset request.
pub struct AssetOperation<T> {
    state: OpState<T>,
}

impl<T> AssetOperation<T> {
    /// Whether this handle has observed its result.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, OpState::Ready(_))
    }

    /// Non-blocking poll. Drives the underlying bundle and item loads, and
    /// returns the result once everything has landed.
    pub fn try_get_result<L, P>(
        &mut self,
        ops: &mut AssetOps<P>,
        engine: &mut ResolveEngine<L>,
    ) -> Result<Option<Rc<T>>>
    where
        L: BundleLoader,
        P: ItemProvider<Item = T, Bundle = L::Bundle>,
    {
        let id = match &self.state {
            OpState::Ready(item) => return Ok(Some(item.clone())),
            OpState::Pending(id) => *id,
        };

        engine.update()?;
        ops.update(engine)?;

        if let Some(item) = ops.take_finished(id) {
            self.state = OpState::Ready(item.clone());
            return Ok(Some(item));
        }
        if let Some(err) = ops.failure_of(id) {
            return Err(err);
        }
        Ok(None)
    }

    /// Block until the result is available, forcing bundle resolution and the
    /// item load to completion. Makes progress entirely on its own; no
    /// external pumping is required.
    pub fn wait_for_completion<L, P>(
        &mut self,
        ops: &mut AssetOps<P>,
        engine: &mut ResolveEngine<L>,
    ) -> Result<Rc<T>>
    where
        L: BundleLoader,
        P: ItemProvider<Item = T, Bundle = L::Bundle>,
    {
        let id = match &self.state {
            OpState::Ready(item) => return Ok(item.clone()),
            OpState::Pending(id) => *id,
        };

        if let Some(item) = ops.take_finished(id) {
            self.state = OpState::Ready(item.clone());
            return Ok(item);
        }
        if let Some(err) = ops.failure_of(id) {
            return Err(err);
        }

        let bundle = ops.bundle_of(id).ok_or(KilnError::StaleOperation)?;
        if !ops.has_request(id) {
            engine.complete_resolve_immediate(bundle)?;
            ops.start_item_load(engine, id)?;
        }
        ops.wait_item(engine, id)?;

        match ops.take_finished(id) {
            Some(item) => {
                self.state = OpState::Ready(item.clone());
                Ok(item)
            }
            None => Err(ops.failure_of(id).unwrap_or(KilnError::StaleOperation)),
        }
    }

    /// Register a completion callback.
    ///
    /// If the result is already available the callback is invoked inline,
    /// before this method returns; callers must not assume deferral. Panics
    /// in the callback are isolated either way.
    pub fn add_callback<P>(&mut self, ops: &mut AssetOps<P>, callback: OpCallback<T>)
    where
        P: ItemProvider<Item = T>,
    {
        match &self.state {
            OpState::Ready(item) => callback.dispatch(item),
            OpState::Pending(id) => ops.push_callback(*id, callback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBundle, MemoryLoader, MemoryProvider};
    use std::cell::Cell;

    fn id(raw: u16) -> BundleId {
        BundleId::from_raw(raw)
    }

    fn idx(raw: u16) -> BundleIndex {
        BundleIndex::from_raw(raw)
    }

    /// Canonical table: 0 -> #0001, 1 -> #0002, 2 -> #0401, 3 -> #0601.
    fn id_table() -> Vec<BundleId> {
        vec![id(0x0001), id(0x0002), id(0x0401), id(0x0601)]
    }

    fn loaded_world(manual: bool) -> (ResolveEngine<MemoryLoader>, AssetOps<MemoryProvider>) {
        let mut loader = if manual {
            MemoryLoader::manual()
        } else {
            MemoryLoader::new()
        };
        let mut bundle = MemoryBundle::new(id(0x0401));
        bundle.insert_item("props/old_chair", vec![7, 7, 7]);
        loader.insert(bundle);
        loader.insert(MemoryBundle::new(id(0x0601)));

        let engine = ResolveEngine::new(loader, id_table());
        let ops = AssetOps::new(MemoryProvider::new());
        (engine, ops)
    }

    #[test]
    fn test_load_from_resolved_bundle() {
        let (mut engine, mut ops) = loaded_world(false);
        engine
            .resolve_immediate(idx(2), std::iter::once(idx(3)))
            .unwrap();

        let mut op = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/old_chair")
            .unwrap();
        let result = op.try_get_result(&mut ops, &mut engine).unwrap();
        assert_eq!(result.as_deref(), Some(&vec![7, 7, 7]));
        assert!(op.is_complete());
    }

    #[test]
    fn test_poll_driven_completion() {
        let (mut engine, mut ops) = loaded_world(false);

        let mut op = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/old_chair")
            .unwrap();
        assert!(!op.is_complete());

        // Polling alone drives bundle resolution and the item load.
        let mut result = None;
        for _ in 0..4 {
            if let Some(item) = op.try_get_result(&mut ops, &mut engine).unwrap() {
                result = Some(item);
                break;
            }
        }
        assert_eq!(result.as_deref(), Some(&vec![7, 7, 7]));
    }

    #[test]
    fn test_callback_flow() {
        let (mut engine, mut ops) = loaded_world(false);

        let mut op = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/old_chair")
            .unwrap();
        let seen = Rc::new(Cell::new(false));
        let flag = seen.clone();
        op.add_callback(
            &mut ops,
            OpCallback::WithItem(Box::new(move |item: Rc<Vec<u8>>| {
                assert_eq!(*item, vec![7, 7, 7]);
                flag.set(true);
            })),
        );

        engine.update().unwrap();
        ops.update(&mut engine).unwrap();
        assert!(seen.get());

        // Result also reaches the handle itself.
        assert_eq!(
            op.try_get_result(&mut ops, &mut engine).unwrap().as_deref(),
            Some(&vec![7, 7, 7])
        );
    }

    #[test]
    fn test_wait_for_completion_cold_start() {
        // Manual loader: only blocking waits can finish these loads, so
        // success proves wait_for_completion needs no external polling.
        let (mut engine, mut ops) = loaded_world(true);

        let mut op = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/old_chair")
            .unwrap();
        let item = op.wait_for_completion(&mut ops, &mut engine).unwrap();
        assert_eq!(*item, vec![7, 7, 7]);
        assert!(engine.try_get_resolved(idx(2)).is_some());
        assert!(op.is_complete());
        assert!(ops.pooled_blocks() >= 1);
    }

    #[test]
    fn test_callback_after_completion_runs_inline() {
        let (mut engine, mut ops) = loaded_world(false);
        let mut op = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/old_chair")
            .unwrap();
        op.wait_for_completion(&mut ops, &mut engine).unwrap();

        let seen = Rc::new(Cell::new(false));
        let flag = seen.clone();
        op.add_callback(
            &mut ops,
            OpCallback::Notify(Box::new(move || flag.set(true))),
        );
        assert!(seen.get());
    }

    #[test]
    fn test_missing_item_fails() {
        let (mut engine, mut ops) = loaded_world(false);
        let mut op = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/missing")
            .unwrap();

        let err = op.wait_for_completion(&mut ops, &mut engine);
        assert!(matches!(
            err,
            Err(KilnError::ItemLoadFailed { bundle, ref name })
                if bundle == id(0x0401) && name == "props/missing"
        ));

        // The failure sticks for later polls.
        assert!(matches!(
            op.try_get_result(&mut ops, &mut engine),
            Err(KilnError::ItemLoadFailed { .. })
        ));
    }

    #[test]
    fn test_two_ops_same_bundle() {
        let (mut engine, mut ops) = loaded_world(false);
        let mut bundle = MemoryBundle::new(id(0x0401));
        bundle.insert_item("props/old_chair", vec![7, 7, 7]);
        bundle.insert_item("props/lamp", vec![9]);
        engine.loader_mut().insert(bundle);

        let mut chair = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/old_chair")
            .unwrap();
        let mut lamp = ops
            .load(&mut engine, idx(2), std::iter::once(idx(3)), "props/lamp")
            .unwrap();

        assert_eq!(
            *chair.wait_for_completion(&mut ops, &mut engine).unwrap(),
            vec![7, 7, 7]
        );
        assert_eq!(
            *lamp.wait_for_completion(&mut ops, &mut engine).unwrap(),
            vec![9]
        );
        assert_eq!(engine.loader().async_start_count(id(0x0401)), 1);
    }
}
