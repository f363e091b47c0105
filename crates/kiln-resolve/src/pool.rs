//! Object pools for hot-path run-time state
//!
//! Jobs, waiter lists, and asset-op blocks are rented and returned instead of
//! allocated per request, keeping the resolution hot path free of allocation
//! churn. Owners drain a value's semantic state (outstanding requests,
//! callbacks) before returning it; the pool checks that invariant.

use kiln_core::BundleIndex;

/// Reset-for-reuse behavior for pooled values.
pub trait Reclaim {
    /// Clear incidental leftover state before the value re-enters the pool.
    fn reclaim(&mut self);

    /// Whether the value's semantic state (request and callback lists) has
    /// been drained. Backs the debug assertion in [`Pool::give_back`].
    fn is_clear(&self) -> bool;
}

/// A simple free-list pool.
#[derive(Debug)]
pub struct Pool<T: Default + Reclaim> {
    free: Vec<T>,
}

impl<T: Default + Reclaim> Pool<T> {
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Take a value from the pool, or a fresh one if the pool is empty.
    pub fn rent(&mut self) -> T {
        self.free.pop().unwrap_or_default()
    }

    /// Return a value to the pool.
    ///
    /// The value must already be drained; returning one with outstanding
    /// requests or undelivered callbacks is a caller bug.
    pub fn give_back(&mut self, mut value: T) {
        debug_assert!(
            value.is_clear(),
            "pooled value returned with undrained state"
        );
        value.reclaim();
        self.free.push(value);
    }

    /// Number of values currently sitting in the pool.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl<T: Default + Reclaim> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl Reclaim for Vec<BundleIndex> {
    fn reclaim(&mut self) {
        self.clear();
    }

    fn is_clear(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_from_empty_pool() {
        let mut pool: Pool<Vec<BundleIndex>> = Pool::new();
        let list = pool.rent();
        assert!(list.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_give_back_and_reuse() {
        let mut pool: Pool<Vec<BundleIndex>> = Pool::new();
        let mut list = pool.rent();
        list.push(BundleIndex::from_raw(7));
        list.clear();
        pool.give_back(list);
        assert_eq!(pool.idle(), 1);

        // The recycled list keeps its capacity.
        let list = pool.rent();
        assert!(list.is_empty());
        assert!(list.capacity() > 0);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    #[should_panic(expected = "undrained state")]
    fn test_undrained_return_asserts() {
        let mut pool: Pool<Vec<BundleIndex>> = Pool::new();
        let mut list = pool.rent();
        list.push(BundleIndex::from_raw(1));
        pool.give_back(list);
    }
}
