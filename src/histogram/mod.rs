//! Gradient histograms keyed by `(tree, node, col)`.
//!
//! A histogram is a sparse vector over `2 * num_bins` slots: slot `2b` holds
//! the gradient sum of bin `b`, slot `2b + 1` its hessian sum. Slots 0 and 1
//! belong to the reserved zero/missing bin; during local construction they
//! first receive the node totals and are then fixed up to
//! `total - sum(non-zero bins)`, so the invariant
//! `sum over bins of grad(b) == total node gradient` holds by construction.
//!
//! Additive structure (`plus` / `minus`) is what the subtract strategy relies
//! on: a left sibling is `parent - right`.

mod compute;

pub use compute::{
    BasicComputer, HistogramComputer, HistogramInput, SubtractComputer, VoteComputer,
};

use serde::{Deserialize, Serialize};

use crate::width::HistValue;

// ============================================================================
// Histogram
// ============================================================================

/// Sparse `(grad, hess)` histogram for one `(tree, node, col)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram<H> {
    num_bins: u32,
    slots: Vec<u32>,
    values: Vec<H>,
}

impl<H: HistValue> Histogram<H> {
    /// An empty histogram over `num_bins` bins.
    pub fn empty(num_bins: u32) -> Self {
        Self {
            num_bins,
            slots: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Compress a dense slot buffer (`len == 2 * num_bins`), dropping zeros.
    pub fn from_dense(num_bins: u32, dense: &[H]) -> Self {
        debug_assert_eq!(dense.len(), 2 * num_bins as usize);
        let mut slots = Vec::new();
        let mut values = Vec::new();
        for (slot, &value) in dense.iter().enumerate() {
            if !value.is_zero() {
                slots.push(slot as u32);
                values.push(value);
            }
        }
        Self {
            num_bins,
            slots,
            values,
        }
    }

    /// Number of bins (half the slot count).
    #[inline]
    pub fn num_bins(&self) -> u32 {
        self.num_bins
    }

    /// Stored slot count.
    #[inline]
    pub fn stored(&self) -> usize {
        self.slots.len()
    }

    /// Value at `slot`, zero when unstored.
    pub fn slot(&self, slot: u32) -> H {
        match self.slots.binary_search(&slot) {
            Ok(pos) => self.values[pos],
            Err(_) => H::default(),
        }
    }

    /// `(grad, hess)` of bin `b`, widened to `f64`.
    #[inline]
    pub fn bin_stats(&self, b: u32) -> (f64, f64) {
        (self.slot(2 * b).to_f64(), self.slot(2 * b + 1).to_f64())
    }

    /// Total `(grad, hess)` over all bins, widened to `f64`.
    pub fn total(&self) -> (f64, f64) {
        let mut grad = 0.0;
        let mut hess = 0.0;
        for (slot, value) in self.slots.iter().zip(self.values.iter()) {
            if slot % 2 == 0 {
                grad += value.to_f64();
            } else {
                hess += value.to_f64();
            }
        }
        (grad, hess)
    }

    /// Number of bins carrying any mass.
    pub fn nnz_bins(&self) -> usize {
        let mut count = 0;
        let mut last_bin = u32::MAX;
        for &slot in &self.slots {
            let bin = slot / 2;
            if bin != last_bin {
                count += 1;
                last_bin = bin;
            }
        }
        count
    }

    /// Iterate `(bin, grad, hess)` over bins with any stored slot, ascending.
    pub fn iter_bins(&self) -> impl Iterator<Item = (u32, f64, f64)> + '_ {
        let mut pos = 0;
        std::iter::from_fn(move || {
            if pos >= self.slots.len() {
                return None;
            }
            let bin = self.slots[pos] / 2;
            let mut grad = 0.0;
            let mut hess = 0.0;
            while pos < self.slots.len() && self.slots[pos] / 2 == bin {
                let value = self.values[pos].to_f64();
                if self.slots[pos] % 2 == 0 {
                    grad = value;
                } else {
                    hess = value;
                }
                pos += 1;
            }
            Some((bin, grad, hess))
        })
    }

    /// Sparse merge: element-wise sum.
    pub fn plus(&self, other: &Self) -> Self {
        debug_assert_eq!(self.num_bins, other.num_bins);
        self.merge(other, |a, b| a + b)
    }

    /// Sparse merge: element-wise difference (`self - other`).
    pub fn minus(&self, other: &Self) -> Self {
        debug_assert_eq!(self.num_bins, other.num_bins);
        self.merge(other, |a, b| a - b)
    }

    fn merge(&self, other: &Self, op: impl Fn(H, H) -> H) -> Self {
        let mut slots = Vec::with_capacity(self.slots.len().max(other.slots.len()));
        let mut values = Vec::with_capacity(slots.capacity());
        let (mut i, mut j) = (0, 0);
        while i < self.slots.len() || j < other.slots.len() {
            let (slot, value) = if j >= other.slots.len()
                || (i < self.slots.len() && self.slots[i] < other.slots[j])
            {
                let out = (self.slots[i], op(self.values[i], H::default()));
                i += 1;
                out
            } else if i >= self.slots.len() || other.slots[j] < self.slots[i] {
                let out = (other.slots[j], op(H::default(), other.values[j]));
                j += 1;
                out
            } else {
                let out = (self.slots[i], op(self.values[i], other.values[j]));
                i += 1;
                j += 1;
                out
            };
            if !value.is_zero() {
                slots.push(slot);
                values.push(value);
            }
        }
        Self {
            num_bins: self.num_bins,
            slots,
            values,
        }
    }
}

// ============================================================================
// DenseScratch
// ============================================================================

/// Dense accumulation buffer used during local histogram construction.
///
/// One scratch per `(tree, node, col)` while scanning a partition; compressed
/// into a sparse [`Histogram`] once the partition is exhausted.
#[derive(Debug, Clone)]
pub struct DenseScratch<H> {
    num_bins: u32,
    dense: Vec<H>,
}

impl<H: HistValue> DenseScratch<H> {
    /// Zeroed scratch over `num_bins` bins.
    pub fn new(num_bins: u32) -> Self {
        Self {
            num_bins,
            dense: vec![H::default(); 2 * num_bins as usize],
        }
    }

    /// Accumulate `(grad, hess)` into bin `b`.
    #[inline]
    pub fn add(&mut self, b: u32, grad: H, hess: H) {
        debug_assert!(b < self.num_bins);
        self.dense[2 * b as usize] += grad;
        self.dense[2 * b as usize + 1] += hess;
    }

    /// Fix up the zero bin: slots 0/1 currently hold node totals and become
    /// `total - sum(non-zero bins)`.
    pub fn fixup_zero_bin(&mut self) {
        let mut grad_rest = H::default();
        let mut hess_rest = H::default();
        for b in 1..self.num_bins as usize {
            grad_rest += self.dense[2 * b];
            hess_rest += self.dense[2 * b + 1];
        }
        self.dense[0] -= grad_rest;
        self.dense[1] -= hess_rest;
    }

    /// Compress into a sparse histogram.
    pub fn freeze(self) -> Histogram<H> {
        Histogram::from_dense(self.num_bins, &self.dense)
    }
}
