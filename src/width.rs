//! Integer-width selection and packed storage.
//!
//! Tree ids, node ids, column ids and bin ids each get the narrowest unsigned
//! width that covers their range, decided once at the start of a fit call.
//! [`PackedArray`] stores id sequences at that width so blocks of per-row ids
//! stay compact regardless of which width was chosen.
//!
//! Histogram accumulation width is a separate axis: [`HistValue`] abstracts
//! over `f32`/`f64` and the training core is instantiated once per width.

use serde::{Deserialize, Serialize};

// ============================================================================
// IdWidth
// ============================================================================

/// Unsigned integer width for packed id storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdWidth {
    /// One byte, values below 2^8.
    U8,
    /// Two bytes, values below 2^16.
    U16,
    /// Four bytes, values below 2^32.
    U32,
}

impl IdWidth {
    /// Narrowest width covering `0..=max_value`.
    ///
    /// Every id kind goes through this one function, so no pair of kinds can
    /// disagree on how a range maps to a width.
    pub fn for_range(max_value: u64) -> Self {
        if max_value < (1 << 8) {
            Self::U8
        } else if max_value < (1 << 16) {
            Self::U16
        } else {
            Self::U32
        }
    }

    /// Bytes per element.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

// ============================================================================
// WidthPlan
// ============================================================================

/// Widths chosen at training start for the four id kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidthPlan {
    /// Width of per-round tree ids.
    pub tree: IdWidth,
    /// Width of learning-node ids.
    pub node: IdWidth,
    /// Width of column ids.
    pub col: IdWidth,
    /// Width of bin ids.
    pub bin: IdWidth,
}

impl WidthPlan {
    /// Select widths from the training shape.
    ///
    /// Node ids follow the heap scheme (root = 1, children 2n / 2n+1), so a
    /// tree of depth `max_depth` uses ids below `2^(max_depth + 1)`.
    pub fn select(num_trees: usize, max_depth: u32, num_cols: usize, max_bins: usize) -> Self {
        Self {
            tree: IdWidth::for_range(num_trees.saturating_sub(1) as u64),
            node: IdWidth::for_range((1u64 << (max_depth + 1)) - 1),
            col: IdWidth::for_range(num_cols.saturating_sub(1) as u64),
            bin: IdWidth::for_range(max_bins.saturating_sub(1) as u64),
        }
    }
}

// ============================================================================
// PackedArray
// ============================================================================

/// Sequence of unsigned ids packed at a runtime-selected width.
///
/// Elements widen to `u32` at the access seam; storage stays at the narrow
/// width chosen by the [`WidthPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedArray {
    width: IdWidth,
    data: Vec<u8>,
    len: usize,
}

impl PackedArray {
    /// Create an empty array at the given width.
    pub fn new(width: IdWidth) -> Self {
        Self {
            width,
            data: Vec::new(),
            len: 0,
        }
    }

    /// Create an empty array with room for `capacity` elements.
    pub fn with_capacity(width: IdWidth, capacity: usize) -> Self {
        Self {
            width,
            data: Vec::with_capacity(capacity * width.bytes()),
            len: 0,
        }
    }

    /// Build from a slice of values, asserting each fits the width.
    pub fn from_values(width: IdWidth, values: &[u32]) -> Self {
        let mut out = Self::with_capacity(width, values.len());
        for &v in values {
            out.push(v);
        }
        out
    }

    /// Element width.
    #[inline]
    pub fn width(&self) -> IdWidth {
        self.width
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a value.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the value does not fit the element width.
    #[inline]
    pub fn push(&mut self, value: u32) {
        match self.width {
            IdWidth::U8 => {
                debug_assert!(value < (1 << 8), "value {value} overflows u8 lane");
                self.data.push(value as u8);
            }
            IdWidth::U16 => {
                debug_assert!(value < (1 << 16), "value {value} overflows u16 lane");
                self.data.extend_from_slice(&(value as u16).to_le_bytes());
            }
            IdWidth::U32 => self.data.extend_from_slice(&value.to_le_bytes()),
        }
        self.len += 1;
    }

    /// Read the element at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        debug_assert!(index < self.len);
        match self.width {
            IdWidth::U8 => self.data[index] as u32,
            IdWidth::U16 => {
                let at = index * 2;
                u16::from_le_bytes([self.data[at], self.data[at + 1]]) as u32
            }
            IdWidth::U32 => {
                let at = index * 4;
                u32::from_le_bytes([
                    self.data[at],
                    self.data[at + 1],
                    self.data[at + 2],
                    self.data[at + 3],
                ])
            }
        }
    }

    /// Overwrite the element at `index`.
    #[inline]
    pub fn set(&mut self, index: usize, value: u32) {
        debug_assert!(index < self.len);
        match self.width {
            IdWidth::U8 => {
                debug_assert!(value < (1 << 8));
                self.data[index] = value as u8;
            }
            IdWidth::U16 => {
                debug_assert!(value < (1 << 16));
                let at = index * 2;
                self.data[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes());
            }
            IdWidth::U32 => {
                let at = index * 4;
                self.data[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Iterate over elements widened to `u32`.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    /// Collect into a plain `u32` vector.
    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

// ============================================================================
// HistValue
// ============================================================================

/// Accumulation value for histograms, raw predictions and tree weights.
///
/// Implemented for `f32` and `f64`; the training core is generic over this
/// trait and instantiated once per configured float width. Accumulation
/// happens at the chosen width, not in a wider intermediate, so the
/// configured precision is what actually flows through the histograms.
pub trait HistValue:
    Copy
    + Default
    + PartialOrd
    + Send
    + Sync
    + std::fmt::Debug
    + Serialize
    + serde::de::DeserializeOwned
    + std::ops::Add<Output = Self>
    + std::ops::AddAssign
    + std::ops::Sub<Output = Self>
    + std::ops::SubAssign
    + 'static
{
    /// Convert from a double-precision intermediate.
    fn from_f64(v: f64) -> Self;

    /// Widen to double precision.
    fn to_f64(self) -> f64;

    /// Whether the value is exactly zero (unstored in sparse vectors).
    #[inline]
    fn is_zero(self) -> bool {
        self.to_f64() == 0.0
    }
}

impl HistValue for f32 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl HistValue for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_selection_boundaries() {
        assert_eq!(IdWidth::for_range(0), IdWidth::U8);
        assert_eq!(IdWidth::for_range(255), IdWidth::U8);
        assert_eq!(IdWidth::for_range(256), IdWidth::U16);
        assert_eq!(IdWidth::for_range(65_535), IdWidth::U16);
        assert_eq!(IdWidth::for_range(65_536), IdWidth::U32);
    }

    #[test]
    fn plan_from_shape() {
        let plan = WidthPlan::select(3, 5, 100, 256);
        assert_eq!(plan.tree, IdWidth::U8);
        // Depth 5 uses node ids up to 63.
        assert_eq!(plan.node, IdWidth::U8);
        assert_eq!(plan.col, IdWidth::U8);
        assert_eq!(plan.bin, IdWidth::U8);

        let plan = WidthPlan::select(600, 12, 70_000, 1 << 17);
        assert_eq!(plan.tree, IdWidth::U16);
        assert_eq!(plan.node, IdWidth::U16);
        assert_eq!(plan.col, IdWidth::U32);
        assert_eq!(plan.bin, IdWidth::U32);
    }

    #[test]
    fn plan_covers_all_width_pairs() {
        // Tree and node widths are selected independently; every pairing of
        // {u8, u16, u32} is reachable.
        let widths = [(255u64, IdWidth::U8), (65_535, IdWidth::U16), (1 << 20, IdWidth::U32)];
        for &(t, tw) in &widths {
            for &(n, nw) in &widths {
                assert_eq!(IdWidth::for_range(t), tw);
                assert_eq!(IdWidth::for_range(n), nw);
            }
        }
    }

    #[test]
    fn packed_roundtrip_all_widths() {
        for width in [IdWidth::U8, IdWidth::U16, IdWidth::U32] {
            let cap = match width {
                IdWidth::U8 => 255,
                IdWidth::U16 => 60_000,
                IdWidth::U32 => 4_000_000,
            };
            let values: Vec<u32> = (0..100).map(|i| (i * 37) % cap).collect();
            let packed = PackedArray::from_values(width, &values);
            assert_eq!(packed.len(), values.len());
            assert_eq!(packed.to_vec(), values);
        }
    }

    #[test]
    fn packed_set_overwrites() {
        let mut packed = PackedArray::from_values(IdWidth::U16, &[1, 2, 3]);
        packed.set(1, 999);
        assert_eq!(packed.to_vec(), vec![1, 999, 3]);
    }

    #[test]
    fn packed_serde_roundtrip() {
        let packed = PackedArray::from_values(IdWidth::U16, &[5, 10, 300]);
        let bytes = postcard::to_allocvec(&packed).unwrap();
        let back: PackedArray = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, packed);
    }

    #[test]
    fn hist_value_widening() {
        assert_eq!(<f32 as HistValue>::from_f64(1.5).to_f64(), 1.5);
        assert_eq!(<f64 as HistValue>::from_f64(1.5).to_f64(), 1.5);
    }
}
