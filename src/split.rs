//! Split finding over node histograms.
//!
//! For one node histogram over a column, candidates are scored with
//! `score(g, h) = soft_threshold(g, alpha)^2 / (h + lambda)` and
//! `gain = score(G_L, H_L) + score(G_R, H_R) - score(G, H)`. The zero/missing
//! bin (bin 0) is assigned to whichever side scores better. Across columns the
//! best split wins, with equal gains broken deterministically by
//! `(col, split representation)` so results are stable across shuffles.

use serde::{Deserialize, Serialize};

use crate::config::BoostConfig;
use crate::histogram::Histogram;
use crate::width::HistValue;

// ============================================================================
// Gain arithmetic
// ============================================================================

/// Regularization and gating parameters for split scoring.
#[derive(Debug, Clone, Copy)]
pub struct SplitParams {
    /// L1 regularization on leaf weights.
    pub alpha: f64,
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// Minimum gain required to adopt a split.
    pub min_gain: f64,
    /// Minimum hessian sum required in each child.
    pub min_node_hess: f64,
    /// Categorical columns up to this many non-zero bins are split by
    /// exhaustive bipartition enumeration.
    pub max_brute_bins: usize,
}

impl SplitParams {
    /// Extract the split-relevant knobs from a [`BoostConfig`].
    pub fn from_config(config: &BoostConfig) -> Self {
        Self {
            alpha: config.reg_alpha,
            lambda: config.reg_lambda,
            min_gain: config.min_gain,
            min_node_hess: config.min_node_hess,
            max_brute_bins: config.max_brute_bins,
        }
    }
}

/// L1 soft thresholding: shrink `g` toward zero by `alpha`.
#[inline]
pub fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

/// Node score used in the gain formula.
#[inline]
pub fn node_score(grad: f64, hess: f64, params: &SplitParams) -> f64 {
    let denom = hess + params.lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    let g = soft_threshold(grad, params.alpha);
    g * g / denom
}

/// Optimal leaf weight for a node with the given sums.
#[inline]
pub fn leaf_weight(grad: f64, hess: f64, params: &SplitParams) -> f64 {
    let denom = hess + params.lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    -soft_threshold(grad, params.alpha) / denom
}

// ============================================================================
// BinSet
// ============================================================================

/// Bitset of bin ids, used as the payload of set-based splits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BinSet {
    words: Vec<u64>,
}

impl BinSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from bin ids.
    pub fn from_bins(bins: impl IntoIterator<Item = u32>) -> Self {
        let mut set = Self::new();
        for bin in bins {
            set.insert(bin);
        }
        set
    }

    /// Insert a bin id.
    pub fn insert(&mut self, bin: u32) {
        let word = (bin / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (bin % 64);
    }

    /// Whether the set holds `bin`.
    #[inline]
    pub fn contains(&self, bin: u32) -> bool {
        let word = (bin / 64) as usize;
        word < self.words.len() && self.words[word] & (1u64 << (bin % 64)) != 0
    }

    /// Iterate member bins ascending.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &bits)| {
            (0..64).filter_map(move |b| {
                if bits & (1u64 << b) != 0 {
                    Some(w as u32 * 64 + b)
                } else {
                    None
                }
            })
        })
    }

    /// Number of member bins.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

// ============================================================================
// Split
// ============================================================================

/// What kind of column the split was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SplitKind {
    /// Ordered numeric bins, threshold payload.
    Numeric,
    /// Categorical bins, set payload.
    Categorical,
    /// Ordered ranking bins, threshold payload.
    Ranking,
}

/// Split payload: a bin threshold or an explicit left-bin set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitData {
    /// Bins `1..=bin` go left; bin 0 follows `missing_left`.
    Threshold {
        /// Last bin routed left.
        bin: u32,
        /// Where the zero/missing bin goes.
        missing_left: bool,
    },
    /// Bins in the set go left (bin 0 included when missing goes left).
    Set {
        /// Bins routed left.
        left: BinSet,
    },
}

/// A fully scored split decision for one node and column.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    /// Column the split tests.
    pub col: u32,
    /// Column kind.
    pub kind: SplitKind,
    /// Routing payload.
    pub data: SplitData,
    /// Gain over keeping the node as a leaf.
    pub gain: f64,
    /// Gradient sum routed left.
    pub grad_left: f64,
    /// Hessian sum routed left.
    pub hess_left: f64,
    /// Gradient sum routed right.
    pub grad_right: f64,
    /// Hessian sum routed right.
    pub hess_right: f64,
    /// Leaf weight of the left child if it terminates.
    pub weight_left: f64,
    /// Leaf weight of the right child if it terminates.
    pub weight_right: f64,
}

impl Split {
    /// Whether a row with this column's `bin` goes left.
    #[inline]
    pub fn goes_left(&self, bin: u32) -> bool {
        match &self.data {
            SplitData::Threshold { bin: threshold, missing_left } => {
                if bin == 0 {
                    *missing_left
                } else {
                    bin <= *threshold
                }
            }
            SplitData::Set { left } => left.contains(bin),
        }
    }

    /// Deterministic ordering key used for tie-breaking equal gains.
    fn repr_key(&self) -> (u32, u8, u32, Vec<u64>) {
        match &self.data {
            SplitData::Threshold { bin, missing_left } => {
                (self.col, *missing_left as u8, *bin, Vec::new())
            }
            SplitData::Set { left } => (self.col, 2, 0, left.words.clone()),
        }
    }

    /// Whether `self` beats `other` under gain-then-representation ordering.
    pub fn beats(&self, other: &Split) -> bool {
        if self.gain != other.gain {
            return self.gain > other.gain;
        }
        self.repr_key() < other.repr_key()
    }
}

// ============================================================================
// Column search
// ============================================================================

struct SideStats {
    grad_left: f64,
    hess_left: f64,
    grad_right: f64,
    hess_right: f64,
    gain: f64,
    missing_left: bool,
}

/// Score a left/right assignment with the missing mass on both sides and keep
/// the better admissible variant.
fn best_missing_assignment(
    grad_left: f64,
    hess_left: f64,
    grad_right: f64,
    hess_right: f64,
    missing_grad: f64,
    missing_hess: f64,
    parent_grad: f64,
    parent_hess: f64,
    params: &SplitParams,
) -> Option<SideStats> {
    let parent_score = node_score(parent_grad, parent_hess, params);
    let mut best: Option<SideStats> = None;

    for missing_left in [true, false] {
        let (gl, hl, gr, hr) = if missing_left {
            (
                grad_left + missing_grad,
                hess_left + missing_hess,
                grad_right,
                hess_right,
            )
        } else {
            (
                grad_left,
                hess_left,
                grad_right + missing_grad,
                hess_right + missing_hess,
            )
        };
        if hl < params.min_node_hess || hr < params.min_node_hess {
            continue;
        }
        let gain = node_score(gl, hl, params) + node_score(gr, hr, params) - parent_score;
        if gain <= 0.0 || gain < params.min_gain {
            continue;
        }
        let better = match &best {
            None => true,
            Some(stats) => gain > stats.gain,
        };
        if better {
            best = Some(SideStats {
                grad_left: gl,
                hess_left: hl,
                grad_right: gr,
                hess_right: hr,
                gain,
                missing_left,
            });
        }
    }
    best
}

fn finish_split(
    col: u32,
    kind: SplitKind,
    data: SplitData,
    stats: SideStats,
    params: &SplitParams,
) -> Split {
    Split {
        col,
        kind,
        data,
        gain: stats.gain,
        grad_left: stats.grad_left,
        hess_left: stats.hess_left,
        grad_right: stats.grad_right,
        hess_right: stats.hess_right,
        weight_left: leaf_weight(stats.grad_left, stats.hess_left, params),
        weight_right: leaf_weight(stats.grad_right, stats.hess_right, params),
    }
}

/// Ordered-bin scan shared by numeric and ranking columns.
fn find_ordered_split<H: HistValue>(
    col: u32,
    kind: SplitKind,
    hist: &Histogram<H>,
    params: &SplitParams,
) -> Option<Split> {
    let (parent_grad, parent_hess) = hist.total();
    let (missing_grad, missing_hess) = hist.bin_stats(0);

    let bins: Vec<(u32, f64, f64)> = hist.iter_bins().filter(|&(b, _, _)| b != 0).collect();
    if bins.len() < 2 {
        return None;
    }

    let nonmiss_grad: f64 = bins.iter().map(|&(_, g, _)| g).sum();
    let nonmiss_hess: f64 = bins.iter().map(|&(_, _, h)| h).sum();

    let mut best: Option<Split> = None;
    let mut grad_prefix = 0.0;
    let mut hess_prefix = 0.0;

    for &(bin, grad, hess) in &bins[..bins.len() - 1] {
        grad_prefix += grad;
        hess_prefix += hess;

        let stats = best_missing_assignment(
            grad_prefix,
            hess_prefix,
            nonmiss_grad - grad_prefix,
            nonmiss_hess - hess_prefix,
            missing_grad,
            missing_hess,
            parent_grad,
            parent_hess,
            params,
        );
        if let Some(stats) = stats {
            let candidate = finish_split(
                col,
                kind,
                SplitData::Threshold {
                    bin,
                    missing_left: stats.missing_left,
                },
                stats,
                params,
            );
            if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Exhaustive bipartition search over few categorical bins.
fn find_brute_split<H: HistValue>(
    col: u32,
    hist: &Histogram<H>,
    params: &SplitParams,
) -> Option<Split> {
    let (parent_grad, parent_hess) = hist.total();
    let (missing_grad, missing_hess) = hist.bin_stats(0);

    let bins: Vec<(u32, f64, f64)> = hist.iter_bins().filter(|&(b, _, _)| b != 0).collect();
    let k = bins.len();
    if k < 2 {
        return None;
    }

    let grad_total: f64 = bins.iter().map(|&(_, g, _)| g).sum();
    let hess_total: f64 = bins.iter().map(|&(_, _, h)| h).sum();

    let mut best: Option<Split> = None;
    // The last bin is pinned to the right side so mirrored partitions are
    // enumerated once: masks 1 .. 2^(k-1) over the first k-1 bins.
    for mask in 1u64..(1u64 << (k - 1)) {
        let mut grad_left = 0.0;
        let mut hess_left = 0.0;
        for (i, &(_, g, h)) in bins[..k - 1].iter().enumerate() {
            if mask & (1 << i) != 0 {
                grad_left += g;
                hess_left += h;
            }
        }

        let stats = best_missing_assignment(
            grad_left,
            hess_left,
            grad_total - grad_left,
            hess_total - hess_left,
            missing_grad,
            missing_hess,
            parent_grad,
            parent_hess,
            params,
        );
        if let Some(stats) = stats {
            let mut left = BinSet::from_bins(
                bins[..k - 1]
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, &(b, _, _))| b),
            );
            if stats.missing_left {
                left.insert(0);
            }
            let candidate = finish_split(
                col,
                SplitKind::Categorical,
                SplitData::Set { left },
                stats,
                params,
            );
            if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Gradient-ratio-sorted scan over many categorical bins.
fn find_sorted_cat_split<H: HistValue>(
    col: u32,
    hist: &Histogram<H>,
    params: &SplitParams,
) -> Option<Split> {
    let (parent_grad, parent_hess) = hist.total();
    let (missing_grad, missing_hess) = hist.bin_stats(0);

    let mut bins: Vec<(u32, f64, f64)> = hist.iter_bins().filter(|&(b, _, _)| b != 0).collect();
    if bins.len() < 2 {
        return None;
    }
    bins.sort_by(|a, b| {
        let ra = a.1 / (a.2 + params.lambda);
        let rb = b.1 / (b.2 + params.lambda);
        ra.partial_cmp(&rb)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    let grad_total: f64 = bins.iter().map(|&(_, g, _)| g).sum();
    let hess_total: f64 = bins.iter().map(|&(_, _, h)| h).sum();

    let mut best: Option<Split> = None;
    let mut grad_prefix = 0.0;
    let mut hess_prefix = 0.0;

    for i in 0..bins.len() - 1 {
        grad_prefix += bins[i].1;
        hess_prefix += bins[i].2;

        let stats = best_missing_assignment(
            grad_prefix,
            hess_prefix,
            grad_total - grad_prefix,
            hess_total - hess_prefix,
            missing_grad,
            missing_hess,
            parent_grad,
            parent_hess,
            params,
        );
        if let Some(stats) = stats {
            let mut left = BinSet::from_bins(bins[..=i].iter().map(|&(b, _, _)| b));
            if stats.missing_left {
                left.insert(0);
            }
            let candidate = finish_split(
                col,
                SplitKind::Categorical,
                SplitData::Set { left },
                stats,
                params,
            );
            if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                best = Some(candidate);
            }
        }
    }
    best
}

/// Best split for one column's histogram, or `None` when nothing passes the
/// gain and hessian gates.
pub fn find_col_split<H: HistValue>(
    col: u32,
    hist: &Histogram<H>,
    is_cat: bool,
    is_rank: bool,
    params: &SplitParams,
) -> Option<Split> {
    if is_cat {
        let nonzero = hist.iter_bins().filter(|&(b, _, _)| b != 0).count();
        if nonzero <= params.max_brute_bins {
            find_brute_split(col, hist, params)
        } else {
            find_sorted_cat_split(col, hist, params)
        }
    } else if is_rank {
        find_ordered_split(col, SplitKind::Ranking, hist, params)
    } else {
        find_ordered_split(col, SplitKind::Numeric, hist, params)
    }
}

/// Best split across a node's columns.
///
/// `cols` must be sorted by column id; tie-breaking is by
/// `(gain, col, split representation)` so the outcome does not depend on
/// shuffle order.
pub fn find_node_split<H: HistValue>(
    cols: &[(u32, &Histogram<H>)],
    is_cat: impl Fn(u32) -> bool,
    is_rank: impl Fn(u32) -> bool,
    params: &SplitParams,
) -> Option<Split> {
    debug_assert!(cols.windows(2).all(|w| w[0].0 < w[1].0));
    let mut best: Option<Split> = None;
    for &(col, hist) in cols {
        if let Some(candidate) = find_col_split(col, hist, is_cat(col), is_rank(col), params) {
            if best.as_ref().map_or(true, |b| candidate.beats(b)) {
                best = Some(candidate);
            }
        }
    }
    best
}
