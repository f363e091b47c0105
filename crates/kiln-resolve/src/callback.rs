//! Completion callback conventions
//!
//! Callers register completion callbacks in one of a small closed set of
//! shapes rather than a single catch-all signature, so each consumer asks for
//! exactly the payload it needs. Invocation is a plain match; a panicking
//! callback is caught and logged so its siblings in the same fan-out still
//! run.

use kiln_core::BundleIndex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// A bundle-resolution completion callback.
pub enum ResolveCallback<B> {
    /// No payload.
    Notify(Box<dyn FnOnce()>),
    /// Receives the resolved bundle handle.
    WithBundle(Box<dyn FnOnce(Rc<B>)>),
    /// Receives the canonical index that finished.
    WithIndex(Box<dyn FnOnce(BundleIndex)>),
    /// Receives both.
    WithBoth(Box<dyn FnOnce(BundleIndex, Rc<B>)>),
}

impl<B> ResolveCallback<B> {
    /// Invoke the callback with panic isolation.
    pub(crate) fn dispatch(self, index: BundleIndex, bundle: &Rc<B>) {
        let outcome = catch_unwind(AssertUnwindSafe(|| match self {
            ResolveCallback::Notify(f) => f(),
            ResolveCallback::WithBundle(f) => f(bundle.clone()),
            ResolveCallback::WithIndex(f) => f(index),
            ResolveCallback::WithBoth(f) => f(index, bundle.clone()),
        }));
        if outcome.is_err() {
            log::error!("resolution callback for bundle index {} panicked", index);
        }
    }
}

/// An asset-operation completion callback.
pub enum OpCallback<T> {
    /// No payload.
    Notify(Box<dyn FnOnce()>),
    /// Receives the loaded item.
    WithItem(Box<dyn FnOnce(Rc<T>)>),
}

impl<T> OpCallback<T> {
    /// Invoke the callback with panic isolation.
    pub(crate) fn dispatch(self, item: &Rc<T>) {
        let outcome = catch_unwind(AssertUnwindSafe(|| match self {
            OpCallback::Notify(f) => f(),
            OpCallback::WithItem(f) => f(item.clone()),
        }));
        if outcome.is_err() {
            log::error!("asset operation callback panicked");
        }
    }
}
