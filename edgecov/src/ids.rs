//! The edge id allocator: a collision-free, randomly ordered pool of
//! unique site identifiers for one instrumentation run.
//!
//! Uniqueness is the requirement here, not unpredictability, so the pool
//! is the identity sequence under a time-seeded shuffle. Two builds get
//! two different id<->site mappings, which is fine.

use edgecov_bolts::rands::{Rand, StdRand};
use serde::{Deserialize, Serialize};

use crate::coverage::MAP_BITS;

/// The id assigned to one instrumentation site, in `[0, pool capacity)`.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EdgeId(pub u32);

/// A pool of pairwise-distinct edge ids, handed out sequentially.
/// Once drained it signals exhaustion instead of recycling.
#[derive(Debug, Clone)]
pub struct EdgeIdPool {
    ids: Vec<u32>,
    next: usize,
}

impl EdgeIdPool {
    /// A pool of `max_edges` unique ids in `[0, max_edges)`, in uniformly
    /// random order.
    pub fn new<R: Rand>(max_edges: usize, rand: &mut R) -> Self {
        debug_assert!(max_edges <= u32::MAX as usize);
        let mut ids: Vec<u32> = (0..max_edges).map(|id| id as u32).collect();
        // Fisher-Yates
        for i in (1..ids.len()).rev() {
            let j = rand.below(i as u64 + 1) as usize;
            ids.swap(i, j);
        }
        Self { ids, next: 0 }
    }

    /// A pool sized for the full coverage bitmap ([`MAP_BITS`] ids),
    /// shuffled by a fresh time-seeded rng.
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::new(MAP_BITS, &mut StdRand::new())
    }

    /// Pop the next unused id, or `None` once the pool is exhausted.
    pub fn next_id(&mut self) -> Option<EdgeId> {
        let id = self.ids.get(self.next).copied()?;
        self.next += 1;
        Some(EdgeId(id))
    }

    /// Total number of ids this pool was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    /// Ids not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.ids.len() - self.next
    }
}

#[cfg(test)]
mod tests {
    use edgecov_bolts::rands::StdRand;

    use super::EdgeIdPool;

    fn drain(pool: &mut EdgeIdPool) -> Vec<u32> {
        let mut out = Vec::with_capacity(pool.capacity());
        while let Some(id) = pool.next_id() {
            out.push(id.0);
        }
        out
    }

    #[test]
    fn test_pool_is_permutation() {
        for n in [0_usize, 1, 2, 257, 4096] {
            let mut pool = EdgeIdPool::new(n, &mut StdRand::new());
            assert_eq!(pool.capacity(), n);
            let mut ids = drain(&mut pool);
            ids.sort_unstable();
            let expected: Vec<u32> = (0..n).map(|id| id as u32).collect();
            assert_eq!(ids, expected, "not a permutation of [0, {n})");
        }
    }

    #[test]
    fn test_pool_signals_exhaustion() {
        let mut pool = EdgeIdPool::new(3, &mut StdRand::new());
        assert!(pool.next_id().is_some());
        assert!(pool.next_id().is_some());
        assert!(pool.next_id().is_some());
        assert_eq!(pool.remaining(), 0);
        assert!(pool.next_id().is_none());
        // asking again stays a calm `None`
        assert!(pool.next_id().is_none());
    }

    #[test]
    fn test_different_seeds_shuffle_differently() {
        let mut a = EdgeIdPool::new(4096, &mut StdRand::with_seed(1));
        let mut b = EdgeIdPool::new(4096, &mut StdRand::with_seed(2));
        assert_ne!(drain(&mut a), drain(&mut b));
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = EdgeIdPool::new(0, &mut StdRand::new());
        assert_eq!(pool.capacity(), 0);
        assert!(pool.next_id().is_none());
    }
}
