//! Deterministic, seeded sampling predicates.
//!
//! A [`Selector`] answers `contains(base_id, key) -> bool` without any shared
//! state, so column, row, block and partition sampling produce identical
//! results on every thread and on every retry. The draw is derived purely from
//! `(seed, base_id, key)` through an integer mix, never from a stateful RNG.

use serde::{Deserialize, Serialize};

/// Golden-ratio increment used for seed mixing.
const MIX_A: u64 = 0x9E37_79B9_7F4A_7C15;
/// Secondary odd constant for the base-id lane.
const MIX_B: u64 = 0x517C_C1B7_2722_0A95;

/// Pure predicate deciding which base models a key participates in.
///
/// `base_id` identifies the base model (tree of the current round, or sampling
/// group); `key` identifies the sampled object (column id, row id, block id or
/// partition id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selector {
    /// Every key participates in every base.
    True,
    /// Deterministic pseudo-random draw below `rate`.
    Hash {
        /// Seed of the draw; distinct concerns use distinct seeds.
        seed: u64,
        /// Acceptance rate in (0, 1).
        rate: f64,
    },
    /// Intersection of two selectors (both must accept).
    Union(Box<Selector>, Box<Selector>),
}

impl Selector {
    /// Create a hash selector, collapsing a full rate to [`Selector::True`].
    pub fn hash(seed: u64, rate: f64) -> Self {
        if rate >= 1.0 {
            Self::True
        } else {
            Self::Hash { seed, rate }
        }
    }

    /// Intersect two selectors, dropping trivial `True` operands.
    pub fn union(a: Selector, b: Selector) -> Self {
        match (a, b) {
            (Selector::True, other) | (other, Selector::True) => other,
            (a, b) => Selector::Union(Box::new(a), Box::new(b)),
        }
    }

    /// Whether `key` participates in base model `base_id`.
    pub fn contains(&self, base_id: u32, key: u64) -> bool {
        match self {
            Selector::True => true,
            Selector::Hash { seed, rate } => uniform_draw(*seed, base_id, key) < *rate,
            Selector::Union(a, b) => a.contains(base_id, key) && b.contains(base_id, key),
        }
    }

    /// The subset of `0..num_bases` base models this key participates in.
    pub fn index(&self, key: u64, num_bases: u32) -> Vec<u32> {
        match self {
            Selector::True => (0..num_bases).collect(),
            _ => (0..num_bases)
                .filter(|&base| self.contains(base, key))
                .collect(),
        }
    }

    /// Whether this selector can reject anything.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        matches!(self, Selector::True)
    }
}

/// Deterministic uniform draw in [0, 1) from `(seed, base_id, key)`.
#[inline]
fn uniform_draw(seed: u64, base_id: u32, key: u64) -> f64 {
    let mixed = mix64(
        seed.wrapping_add((base_id as u64).wrapping_mul(MIX_B))
            .wrapping_add(key.wrapping_mul(MIX_A)),
    );
    // Top 53 bits give a full-precision mantissa.
    (mixed >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// SplitMix64 finalizer.
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(MIX_A);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_accepts_everything() {
        let s = Selector::True;
        assert!(s.contains(0, 0));
        assert!(s.contains(17, 123_456));
        assert_eq!(s.index(9, 4), vec![0, 1, 2, 3]);
    }

    #[test]
    fn hash_rate_one_collapses_to_true() {
        assert_eq!(Selector::hash(42, 1.0), Selector::True);
        assert_eq!(Selector::hash(42, 1.5), Selector::True);
    }

    #[test]
    fn hash_is_pure() {
        let s = Selector::hash(42, 0.5);
        for key in 0..1000u64 {
            for base in 0..4 {
                assert_eq!(s.contains(base, key), s.contains(base, key));
            }
        }
    }

    #[test]
    fn hash_rate_controls_acceptance() {
        let s = Selector::hash(7, 0.3);
        let accepted = (0..10_000u64).filter(|&k| s.contains(0, k)).count();
        // Loose band around 3000; the draw is uniform.
        assert!((2600..3400).contains(&accepted), "accepted {accepted}");
    }

    #[test]
    fn different_bases_draw_independently() {
        let s = Selector::hash(7, 0.5);
        let same = (0..2000u64)
            .filter(|&k| s.contains(0, k) == s.contains(1, k))
            .count();
        // Independent draws agree about half the time.
        assert!((800..1200).contains(&same), "agreement {same}");
    }

    #[test]
    fn union_intersects() {
        let a = Selector::hash(1, 0.5);
        let b = Selector::hash(2, 0.5);
        let u = Selector::union(a.clone(), b.clone());
        for key in 0..500u64 {
            assert_eq!(u.contains(0, key), a.contains(0, key) && b.contains(0, key));
        }
    }

    #[test]
    fn union_with_true_is_identity() {
        let a = Selector::hash(1, 0.5);
        assert_eq!(Selector::union(Selector::True, a.clone()), a);
        assert_eq!(Selector::union(a.clone(), Selector::True), a);
    }

    #[test]
    fn index_matches_contains() {
        let s = Selector::hash(9, 0.4);
        for key in 0..200u64 {
            let idx = s.index(key, 8);
            for base in 0..8 {
                assert_eq!(idx.contains(&base), s.contains(base, key));
            }
        }
    }
}
