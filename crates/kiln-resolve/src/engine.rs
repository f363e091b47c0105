//! Run-time bundle resolution engine
//!
//! Ensures that a bundle and its dependencies are loaded before the bundle is
//! reported usable, loading each bundle at most once. Concurrent resolutions
//! that need the same bundle attach to one shared in-flight request instead of
//! issuing duplicate I/O.
//!
//! The engine assumes a single logical thread of control: all state mutation
//! happens inside its methods, completion callbacks are dispatched after
//! bookkeeping settles, and the only blocking operations drive the underlying
//! loads themselves rather than sleeping on another thread.

use crate::callback::ResolveCallback;
use crate::loader::BundleLoader;
use crate::pool::{Pool, Reclaim};
use kiln_core::{BundleId, BundleIndex, KilnError, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

/// Sentinel appended to a job's outstanding list while it is being drained by
/// `complete_resolve_immediate`. Keeps fan-out completions from finishing the
/// job while the drain loop still iterates it. Never a valid index: a catalog
/// holds at most `u16::MAX` bundles, so index `u16::MAX` itself cannot occur.
const DRAIN: BundleIndex = BundleIndex::from_raw(u16::MAX);

/// Transient state for one in-flight resolution. Pooled.
pub(crate) struct Job<B> {
    /// Canonical indices of the underlying loads this job still waits on.
    outstanding: Vec<BundleIndex>,
    /// Callbacks to fire when the job completes.
    callbacks: Vec<ResolveCallback<B>>,
}

impl<B> Default for Job<B> {
    fn default() -> Self {
        Self {
            outstanding: Vec::new(),
            callbacks: Vec::new(),
        }
    }
}

impl<B> Reclaim for Job<B> {
    fn reclaim(&mut self) {
        self.outstanding.clear();
        self.callbacks.clear();
    }

    fn is_clear(&self) -> bool {
        self.outstanding.is_empty() && self.callbacks.is_empty()
    }
}

/// Loading state of one canonical index. Transitions are monotonic:
/// a slot never moves away from `Done`.
enum Slot<B> {
    /// Never requested.
    Unrequested,
    /// Bytes arrived as a dependency of some other resolution, but this
    /// bundle was never itself resolved.
    Loaded(Rc<B>),
    /// A job is resolving this bundle. The payload is the bundle's own
    /// handle once its load lands while dependencies are still outstanding.
    Resolving(Option<Rc<B>>),
    /// Fully resolved: the bundle and its dependencies are loaded.
    Done(Rc<B>),
}

impl<B> Slot<B> {
    fn handle(&self) -> Option<&Rc<B>> {
        match self {
            Slot::Loaded(h) | Slot::Done(h) => Some(h),
            Slot::Resolving(Some(h)) => Some(h),
            _ => None,
        }
    }
}

/// Outcome of an asynchronous resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    /// The bundle is fully resolved; fetch it with `try_get_resolved`.
    Done,
    /// Loads are outstanding; the callback fires on completion.
    Pending,
}

/// One in-flight underlying load and the jobs attached to it.
struct InFlight<R> {
    request: R,
    /// Targets of the jobs waiting on this load. Pooled.
    waiters: Vec<BundleIndex>,
}

/// A completed job whose callbacks are ready to dispatch.
type FinishedJob<B> = (BundleIndex, Rc<B>, Vec<ResolveCallback<B>>);

/// The resolution engine.
///
/// Indexed throughout by canonical bundle index; `bundle_ids` maps an index
/// back to the raw id handed to the loader, and comes from the catalog's
/// `bundle_ids()` table.
pub struct ResolveEngine<L: BundleLoader> {
    loader: L,
    bundle_ids: Vec<BundleId>,
    slots: Vec<Slot<L::Bundle>>,
    jobs: HashMap<BundleIndex, Job<L::Bundle>>,
    in_flight: HashMap<BundleIndex, InFlight<L::Request>>,
    job_pool: Pool<Job<L::Bundle>>,
    waiter_pool: Pool<Vec<BundleIndex>>,
}

impl<L: BundleLoader> ResolveEngine<L> {
    /// Create an engine over a loader and the catalog's canonical id table.
    pub fn new(loader: L, bundle_ids: Vec<BundleId>) -> Self {
        let mut slots = Vec::with_capacity(bundle_ids.len());
        slots.resize_with(bundle_ids.len(), || Slot::Unrequested);
        Self {
            loader,
            bundle_ids,
            slots,
            jobs: HashMap::new(),
            in_flight: HashMap::new(),
            job_pool: Pool::new(),
            waiter_pool: Pool::new(),
        }
    }

    /// The underlying loader.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Mutable access to the underlying loader, e.g. for hosts that need to
    /// pump its I/O.
    pub fn loader_mut(&mut self) -> &mut L {
        &mut self.loader
    }

    /// Raw id of a canonical index.
    pub fn raw_id_of(&self, index: BundleIndex) -> Result<BundleId> {
        self.check_index(index)?;
        Ok(self.bundle_ids[index.as_usize()])
    }

    /// The cached handle, if the bundle is fully resolved. Non-blocking.
    pub fn try_get_resolved(&self, index: BundleIndex) -> Option<Rc<L::Bundle>> {
        match self.slots.get(index.as_usize()) {
            Some(Slot::Done(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Asynchronously resolve a bundle and its dependency list.
    ///
    /// Returns `Done` if everything needed is already loaded (the bundle is
    /// promoted immediately and the callback is dropped unused - fetch the
    /// handle with `try_get_resolved`). Otherwise returns `Pending` and the
    /// callback fires once the last outstanding load lands. Loads already in
    /// flight for another resolution are joined, never duplicated.
    pub fn resolve_async<I>(
        &mut self,
        target: BundleIndex,
        deps: I,
        callback: ResolveCallback<L::Bundle>,
    ) -> Result<ResolveStatus>
    where
        I: IntoIterator<Item = BundleIndex>,
    {
        self.resolve_async_inner(target, deps, Some(callback))
    }

    fn resolve_async_inner<I>(
        &mut self,
        target: BundleIndex,
        deps: I,
        callback: Option<ResolveCallback<L::Bundle>>,
    ) -> Result<ResolveStatus>
    where
        I: IntoIterator<Item = BundleIndex>,
    {
        self.check_index(target)?;

        if matches!(self.slots[target.as_usize()], Slot::Done(_)) {
            return Ok(ResolveStatus::Done);
        }
        if matches!(self.slots[target.as_usize()], Slot::Resolving(_)) {
            match self.jobs.get_mut(&target) {
                Some(job) => {
                    if let Some(cb) = callback {
                        job.callbacks.push(cb);
                    }
                    return Ok(ResolveStatus::Pending);
                }
                None => return Err(KilnError::NotResolving(self.bundle_ids[target.as_usize()])),
            }
        }

        // Gather everything that still needs bytes: the dependency list plus
        // the target itself, requested in that order.
        let mut wanted = self.waiter_pool.rent();
        for index in deps.into_iter().chain(std::iter::once(target)) {
            if let Err(e) = self.check_index(index) {
                wanted.clear();
                self.waiter_pool.give_back(wanted);
                return Err(e);
            }
            if wanted.contains(&index) || self.slots[index.as_usize()].handle().is_some() {
                continue;
            }
            wanted.push(index);
        }

        let mut job = self.job_pool.rent();
        for &index in wanted.iter() {
            match self.in_flight.entry(index) {
                // Deduplicate: attach to the request already in flight.
                Entry::Occupied(mut entry) => entry.get_mut().waiters.push(target),
                Entry::Vacant(entry) => {
                    let raw = self.bundle_ids[index.as_usize()];
                    log::debug!("requesting load of bundle {} (index {})", raw, index);
                    let request = self.loader.start_load(raw);
                    let mut waiters = self.waiter_pool.rent();
                    waiters.push(target);
                    entry.insert(InFlight { request, waiters });
                }
            }
            job.outstanding.push(index);
        }
        wanted.clear();
        self.waiter_pool.give_back(wanted);

        if job.outstanding.is_empty() {
            // Everything was already loaded; no job to retain.
            self.job_pool.give_back(job);
            self.promote_loaded(target)?;
            return Ok(ResolveStatus::Done);
        }

        if let Some(cb) = callback {
            job.callbacks.push(cb);
        }
        let slot = &mut self.slots[target.as_usize()];
        let prior = std::mem::replace(slot, Slot::Resolving(None));
        if let Slot::Loaded(handle) = prior {
            *slot = Slot::Resolving(Some(handle));
        }
        self.jobs.insert(target, job);
        Ok(ResolveStatus::Pending)
    }

    /// Drive async completions. Non-blocking; call from the host update loop.
    ///
    /// Completion callbacks for jobs that finish in this pass fire before the
    /// method returns, after all state bookkeeping has settled.
    pub fn update(&mut self) -> Result<()> {
        let mut completed_loads = Vec::new();
        for (&index, inflight) in self.in_flight.iter_mut() {
            if self.loader.poll(&mut inflight.request) {
                completed_loads.push(index);
            }
        }
        // Map iteration order is arbitrary; finish loads deterministically.
        completed_loads.sort_unstable();

        let mut finished = Vec::new();
        for index in completed_loads {
            if let Some(inflight) = self.in_flight.remove(&index) {
                self.finish_request(index, inflight, &mut finished)?;
            }
        }
        dispatch_finished(finished);
        Ok(())
    }

    /// Force an in-flight resolution to completion by blocking on each of its
    /// outstanding loads in turn.
    ///
    /// Tolerates the job being mutated underneath the drain: completing one
    /// shared load can satisfy other jobs (their callbacks fire inline here),
    /// and the sentinel guard keeps this job alive until the loop is done
    /// even if its real outstanding count reaches zero mid-drain.
    pub fn complete_resolve_immediate(&mut self, target: BundleIndex) -> Result<Rc<L::Bundle>> {
        self.check_index(target)?;
        if let Some(handle) = self.try_get_resolved(target) {
            return Ok(handle);
        }
        let raw = self.bundle_ids[target.as_usize()];
        match self.jobs.get_mut(&target) {
            Some(job) => job.outstanding.push(DRAIN),
            None => return Err(KilnError::NotResolving(raw)),
        }

        loop {
            let next = self
                .jobs
                .get(&target)
                .and_then(|job| job.outstanding.iter().copied().find(|&x| x != DRAIN));
            let index = match next {
                Some(index) => index,
                None => break,
            };

            match self.in_flight.remove(&index) {
                Some(mut inflight) => {
                    self.loader.wait(&mut inflight.request);
                    let mut finished = Vec::new();
                    let outcome = self.finish_request(index, inflight, &mut finished);
                    dispatch_finished(finished);
                    outcome?;
                }
                None => {
                    // Stale link with no backing request; drop it.
                    if let Some(job) = self.jobs.get_mut(&target) {
                        if let Some(pos) = job.outstanding.iter().position(|&x| x == index) {
                            job.outstanding.swap_remove(pos);
                        }
                    }
                }
            }
        }

        if let Some(job) = self.jobs.get_mut(&target) {
            if let Some(pos) = job.outstanding.iter().position(|&x| x == DRAIN) {
                job.outstanding.swap_remove(pos);
            }
            debug_assert!(job.outstanding.is_empty());
        }
        let callbacks = match self.jobs.remove(&target) {
            Some(mut job) => {
                let callbacks = std::mem::take(&mut job.callbacks);
                self.job_pool.give_back(job);
                callbacks
            }
            None => Vec::new(),
        };
        let handle = self.promote_loaded(target)?;
        for cb in callbacks {
            cb.dispatch(target, &handle);
        }
        Ok(handle)
    }

    /// Resolve synchronously. When nothing relevant is in flight, loads the
    /// dependencies and target with blocking calls and no job at all;
    /// otherwise joins the in-flight requests and drains them.
    pub fn resolve_immediate<I>(&mut self, target: BundleIndex, deps: I) -> Result<Rc<L::Bundle>>
    where
        I: IntoIterator<Item = BundleIndex>,
    {
        self.check_index(target)?;
        if let Some(handle) = self.try_get_resolved(target) {
            return Ok(handle);
        }
        if self.jobs.contains_key(&target) {
            return self.complete_resolve_immediate(target);
        }

        let mut dep_list = self.waiter_pool.rent();
        for dep in deps {
            if let Err(e) = self.check_index(dep) {
                dep_list.clear();
                self.waiter_pool.give_back(dep_list);
                return Err(e);
            }
            dep_list.push(dep);
        }

        let overlaps_in_flight = dep_list
            .iter()
            .copied()
            .chain(std::iter::once(target))
            .any(|index| self.in_flight.contains_key(&index));
        if overlaps_in_flight {
            let status = self.resolve_async_inner(target, dep_list.iter().copied(), None);
            dep_list.clear();
            self.waiter_pool.give_back(dep_list);
            return match status? {
                ResolveStatus::Done => {
                    let raw = self.bundle_ids[target.as_usize()];
                    self.try_get_resolved(target)
                        .ok_or(KilnError::NotResolving(raw))
                }
                ResolveStatus::Pending => self.complete_resolve_immediate(target),
            };
        }

        // Jobless fast path: blocking loads, dependencies before the target.
        for index in dep_list.iter().copied().chain(std::iter::once(target)) {
            if self.slots[index.as_usize()].handle().is_some() {
                continue;
            }
            let raw = self.bundle_ids[index.as_usize()];
            log::debug!("loading bundle {} synchronously", raw);
            match self.loader.load_sync(raw) {
                Some(bundle) => self.slots[index.as_usize()] = Slot::Loaded(Rc::new(bundle)),
                None => {
                    dep_list.clear();
                    self.waiter_pool.give_back(dep_list);
                    log::error!("bundle {} failed to load", raw);
                    return Err(KilnError::LoadFailed(raw));
                }
            }
        }
        dep_list.clear();
        self.waiter_pool.give_back(dep_list);
        self.promote_loaded(target)
    }

    /// Bookkeeping for one finished underlying load: cache the handle, unlink
    /// the load from every waiting job, and collect jobs that completed.
    fn finish_request(
        &mut self,
        index: BundleIndex,
        inflight: InFlight<L::Request>,
        finished: &mut Vec<FinishedJob<L::Bundle>>,
    ) -> Result<()> {
        let InFlight {
            request,
            mut waiters,
        } = inflight;
        let raw = self.bundle_ids[index.as_usize()];

        let bundle = match self.loader.finish(request) {
            Some(bundle) => Rc::new(bundle),
            None => {
                waiters.clear();
                self.waiter_pool.give_back(waiters);
                log::error!("bundle {} failed to load", raw);
                return Err(KilnError::LoadFailed(raw));
            }
        };
        log::debug!("bundle {} load complete", raw);

        // Cache the handle on the slot.
        let slot = &mut self.slots[index.as_usize()];
        match std::mem::replace(slot, Slot::Unrequested) {
            Slot::Unrequested => *slot = Slot::Loaded(bundle),
            Slot::Resolving(_) => *slot = Slot::Resolving(Some(bundle)),
            keep => *slot = keep,
        }

        for target in waiters.drain(..) {
            let mut job_done = false;
            if let Some(job) = self.jobs.get_mut(&target) {
                if let Some(pos) = job.outstanding.iter().position(|&x| x == index) {
                    job.outstanding.swap_remove(pos);
                }
                job_done = job.outstanding.is_empty();
            }
            if job_done {
                if let Some(mut job) = self.jobs.remove(&target) {
                    let callbacks = std::mem::take(&mut job.callbacks);
                    self.job_pool.give_back(job);
                    let handle = self.promote_loaded(target)?;
                    finished.push((target, handle, callbacks));
                }
            }
        }
        self.waiter_pool.give_back(waiters);
        Ok(())
    }

    /// Promote a slot that already holds its handle to `Done`.
    fn promote_loaded(&mut self, target: BundleIndex) -> Result<Rc<L::Bundle>> {
        let raw = self.bundle_ids[target.as_usize()];
        let slot = &mut self.slots[target.as_usize()];
        match std::mem::replace(slot, Slot::Unrequested) {
            Slot::Loaded(handle) | Slot::Resolving(Some(handle)) | Slot::Done(handle) => {
                *slot = Slot::Done(handle.clone());
                log::debug!("bundle {} resolved", raw);
                Ok(handle)
            }
            other => {
                *slot = other;
                Err(KilnError::NotResolving(raw))
            }
        }
    }

    fn check_index(&self, index: BundleIndex) -> Result<()> {
        if index.as_usize() >= self.slots.len() {
            return Err(KilnError::IndexOutOfRange {
                index,
                count: self.slots.len() as u16,
            });
        }
        Ok(())
    }

    #[cfg(test)]
    fn pooled_jobs(&self) -> usize {
        self.job_pool.idle()
    }

    #[cfg(test)]
    fn pooled_waiter_lists(&self) -> usize {
        self.waiter_pool.idle()
    }
}

/// Dispatch completed jobs' callbacks in registration order.
fn dispatch_finished<B>(finished: Vec<FinishedJob<B>>) {
    for (target, handle, callbacks) in finished {
        for cb in callbacks {
            cb.dispatch(target, &handle);
        }
    }
}
