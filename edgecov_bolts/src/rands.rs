//! The random number generators of `edgecov`.
//!
//! Edge id assignment only needs uniqueness, not unpredictability, so a fast
//! non-cryptographic generator seeded from the wall clock is plenty.

use core::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::current_nanos;

/// The standard rand implementation for `edgecov`.
/// Very good speed and a reasonable randomness, not cryptographically secure.
pub type StdRand = RomuDuoJrRand;

/// Faster and almost unbiased alternative to `rand % n`.
///
/// See: [An optimal algorithm for bounded random integers](https://github.com/apple/swift/pull/39143).
#[inline]
#[must_use]
pub fn fast_bound(rand: u64, n: u64) -> u64 {
    debug_assert_ne!(n, 0);
    let mul = u128::from(rand).wrapping_mul(u128::from(n));
    (mul >> 64) as u64
}

/// Ways to get random around here.
/// Please note that these are not cryptographically secure.
pub trait Rand: Debug {
    /// Sets the seed of this Rand
    fn set_seed(&mut self, seed: u64);

    /// Gets the next 64 bit value
    fn next(&mut self) -> u64;

    /// Gets a value below the given 64 bit val (exclusive)
    #[inline]
    fn below(&mut self, upper_bound_excl: u64) -> u64 {
        fast_bound(self.next(), upper_bound_excl)
    }
}

// https://prng.di.unimi.it/splitmix64.c
fn splitmix64(x: &mut u64) -> u64 {
    *x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// see <https://arxiv.org/pdf/2002.11331.pdf>
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct RomuDuoJrRand {
    x_state: u64,
    y_state: u64,
}

impl RomuDuoJrRand {
    /// Creates a new `RomuDuoJrRand` with the given seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        let mut rand = Self {
            x_state: 0,
            y_state: 0,
        };
        rand.set_seed(seed);
        rand
    }

    /// Creates a rand instance, pre-seeded with the current time in nanoseconds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(current_nanos())
    }
}

impl Default for RomuDuoJrRand {
    fn default() -> Self {
        Self::new()
    }
}

impl Rand for RomuDuoJrRand {
    fn set_seed(&mut self, mut seed: u64) {
        self.x_state = splitmix64(&mut seed);
        self.y_state = splitmix64(&mut seed);
    }

    #[inline]
    #[allow(clippy::unreadable_literal)]
    fn next(&mut self) -> u64 {
        let xp = self.x_state;
        self.x_state = 15241094284759029579_u64.wrapping_mul(self.y_state);
        self.y_state = self.y_state.wrapping_sub(xp).rotate_left(27);
        xp
    }
}

#[cfg(test)]
mod tests {
    use super::{Rand, RomuDuoJrRand, StdRand};

    fn test_single_rand<R: Rand>(rand: &mut R) {
        assert_ne!(rand.next(), rand.next());
        assert!(rand.below(100) < 100);
        assert_eq!(rand.below(1), 0);
    }

    #[test]
    fn test_rands() {
        // see cargo bench for speed comparisons
        test_single_rand(&mut StdRand::with_seed(0));
        test_single_rand(&mut RomuDuoJrRand::with_seed(0));
    }

    #[test]
    fn test_seeded_rands_differ() {
        let mut a = StdRand::with_seed(1);
        let mut b = StdRand::with_seed(2);
        assert_ne!(a.next(), b.next());
    }
}
