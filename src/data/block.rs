//! Row blocks: the unit of persistence, sampling and shuffling.

use serde::{Deserialize, Serialize};

use super::BinVector;
use crate::width::{IdWidth, PackedArray};

// ============================================================================
// BinBlock
// ============================================================================

/// Packed block of column-sparse rows.
///
/// Rows are concatenated into two packed arrays (columns and bins) with a row
/// offset table, so a block of 4096 rows is three allocations regardless of
/// sparsity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinBlock {
    num_cols: usize,
    row_offsets: Vec<u32>,
    cols: PackedArray,
    bins: PackedArray,
}

impl BinBlock {
    /// Create an empty block.
    pub fn new(num_cols: usize, col_width: IdWidth, bin_width: IdWidth) -> Self {
        Self {
            num_cols,
            row_offsets: vec![0],
            cols: PackedArray::new(col_width),
            bins: PackedArray::new(bin_width),
        }
    }

    /// Append one row given its sorted non-zero `(col, bin)` entries.
    pub fn push_row<I: IntoIterator<Item = (u32, u32)>>(&mut self, entries: I) {
        for (col, bin) in entries {
            debug_assert!((col as usize) < self.num_cols);
            if bin != 0 {
                self.cols.push(col);
                self.bins.push(bin);
            }
        }
        self.row_offsets.push(self.cols.len() as u32);
    }

    /// Append a row stored as a [`BinVector`].
    pub fn push_vector(&mut self, row: &BinVector) {
        self.push_row(row.active_iter());
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    /// Total column count of the discretized space.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Borrow row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> BinRow<'_> {
        let start = self.row_offsets[i] as usize;
        let end = self.row_offsets[i + 1] as usize;
        BinRow {
            block: self,
            start,
            end,
        }
    }

    /// Iterate over all rows.
    pub fn rows(&self) -> impl Iterator<Item = BinRow<'_>> {
        (0..self.num_rows()).map(move |i| self.row(i))
    }
}

/// Borrowed view of one row inside a [`BinBlock`].
#[derive(Debug, Clone, Copy)]
pub struct BinRow<'a> {
    block: &'a BinBlock,
    start: usize,
    end: usize,
}

impl<'a> BinRow<'a> {
    /// Number of stored (non-zero) entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.end - self.start
    }

    /// Bin for `col`, 0 when not stored.
    pub fn get(&self, col: u32) -> u32 {
        let mut lo = self.start;
        let mut hi = self.end;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let at = self.block.cols.get(mid);
            if at < col {
                lo = mid + 1;
            } else if at > col {
                hi = mid;
            } else {
                return self.block.bins.get(mid);
            }
        }
        0
    }

    /// Iterate over stored `(col, bin)` entries in column order.
    pub fn active_iter(&self) -> impl Iterator<Item = (u32, u32)> + 'a {
        let block = self.block;
        (self.start..self.end).map(move |i| (block.cols.get(i), block.bins.get(i)))
    }

    /// Copy into an owned [`BinVector`].
    pub fn to_vector(&self) -> BinVector {
        BinVector::from_pairs(
            self.block.num_cols,
            self.block.cols.width(),
            self.block.bins.width(),
            &self.active_iter().collect::<Vec<_>>(),
        )
    }
}

// ============================================================================
// ArrayBlock
// ============================================================================

/// Packed array of fixed-width rows.
///
/// Used for labels (`row_len` = number of outputs), grad-hess pairs
/// (`row_len` = 2 x raw size) and similar per-row numeric records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayBlock<T> {
    row_len: usize,
    values: Vec<T>,
}

impl<T: Copy> ArrayBlock<T> {
    /// Create an empty block of `row_len`-wide rows.
    pub fn new(row_len: usize) -> Self {
        assert!(row_len > 0, "row_len must be positive");
        Self {
            row_len,
            values: Vec::new(),
        }
    }

    /// Build from a flat value buffer.
    pub fn from_flat(row_len: usize, values: Vec<T>) -> Self {
        assert!(row_len > 0, "row_len must be positive");
        assert_eq!(values.len() % row_len, 0, "flat length must be a multiple of row_len");
        Self { row_len, values }
    }

    /// Append one row.
    #[inline]
    pub fn push_row(&mut self, row: &[T]) {
        debug_assert_eq!(row.len(), self.row_len);
        self.values.extend_from_slice(row);
    }

    /// Elements per row.
    #[inline]
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.values.len() / self.row_len
    }

    /// Borrow row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[T] {
        &self.values[i * self.row_len..(i + 1) * self.row_len]
    }

    /// Mutably borrow row `i`.
    #[inline]
    pub fn row_mut(&mut self, i: usize) -> &mut [T] {
        &mut self.values[i * self.row_len..(i + 1) * self.row_len]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        self.values.chunks_exact(self.row_len)
    }

    /// Flat value buffer.
    #[inline]
    pub fn flat(&self) -> &[T] {
        &self.values
    }
}

// ============================================================================
// CompactArray
// ============================================================================

/// Packed array of scalar values (weights, raw-prediction scalars).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactArray<T> {
    values: Vec<T>,
}

impl<T: Copy> CompactArray<T> {
    /// Wrap a value buffer.
    pub fn from_vec(values: Vec<T>) -> Self {
        Self { values }
    }

    /// A constant-filled array.
    pub fn filled(value: T, len: usize) -> Self {
        Self {
            values: vec![value; len],
        }
    }

    /// Number of values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the array is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `i`.
    #[inline]
    pub fn get(&self, i: usize) -> T {
        self.values[i]
    }

    /// Overwrite value at `i`.
    #[inline]
    pub fn set(&mut self, i: usize, value: T) {
        self.values[i] = value;
    }

    /// Borrow the value buffer.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    /// Mutably borrow the value buffer.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }
}

// ============================================================================
// RaggedBlock
// ============================================================================

/// Per-row variable-length id lists at a packed width.
///
/// Holds one id list per row, e.g. the base trees a row participates in this
/// round, or the current node of the row in each of those trees. Two ragged
/// blocks with identical offsets are positionally aligned: entry `j` of row
/// `i` in one corresponds to entry `j` of row `i` in the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaggedBlock {
    offsets: Vec<u32>,
    values: PackedArray,
}

impl RaggedBlock {
    /// Create an empty block.
    pub fn new(width: IdWidth) -> Self {
        Self {
            offsets: vec![0],
            values: PackedArray::new(width),
        }
    }

    /// Create a block of `num_rows` rows that all carry the same id list.
    pub fn uniform(width: IdWidth, num_rows: usize, ids: &[u32]) -> Self {
        let mut block = Self::new(width);
        for _ in 0..num_rows {
            block.push_row(ids.iter().copied());
        }
        block
    }

    /// Append one row's id list.
    pub fn push_row<I: IntoIterator<Item = u32>>(&mut self, ids: I) {
        for id in ids {
            self.values.push(id);
        }
        self.offsets.push(self.values.len() as u32);
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Length of row `i`'s id list.
    #[inline]
    pub fn row_len(&self, i: usize) -> usize {
        (self.offsets[i + 1] - self.offsets[i]) as usize
    }

    /// Iterate over row `i`'s ids.
    pub fn row(&self, i: usize) -> impl Iterator<Item = u32> + '_ {
        let start = self.offsets[i] as usize;
        let end = self.offsets[i + 1] as usize;
        (start..end).map(move |j| self.values.get(j))
    }

    /// Entry `j` of row `i`.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> u32 {
        debug_assert!(j < self.row_len(i));
        self.values.get(self.offsets[i] as usize + j)
    }

    /// Overwrite entry `j` of row `i`.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: u32) {
        debug_assert!(j < self.row_len(i));
        self.values.set(self.offsets[i] as usize + j, value);
    }

    /// A block with the same offsets where every entry is `value`.
    pub fn map_constant(&self, width: IdWidth, value: u32) -> Self {
        let mut values = PackedArray::with_capacity(width, self.values.len());
        for _ in 0..self.values.len() {
            values.push(value);
        }
        Self {
            offsets: self.offsets.clone(),
            values,
        }
    }

    /// Total number of stored ids across rows.
    #[inline]
    pub fn total_ids(&self) -> usize {
        self.values.len()
    }
}
