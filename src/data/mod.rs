//! Compact data containers for discretized training data.
//!
//! Training data lives in blocks of at most `block_size` rows; blocks are the
//! unit of persistence, sampling and shuffling. Within a block:
//!
//! - [`BinVector`] / [`BinBlock`]: column-sparse rows of `col -> bin` pairs
//!   (bin 0 is the reserved zero/missing bin and is never stored);
//! - [`ArrayBlock`]: packed fixed-width rows (labels, grad-hess pairs);
//! - [`CompactArray`]: packed scalars (weights, raw-prediction components);
//! - [`RaggedBlock`]: per-row variable-length id lists (tree ids, node ids).

mod bin_vector;
mod block;

pub use bin_vector::BinVector;
pub use block::{ArrayBlock, BinBlock, BinRow, CompactArray, RaggedBlock};
