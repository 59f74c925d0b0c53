//! Block alignment helpers.
//!
//! Reads are issued against the storage device in whole blocks. A caller's
//! byte range `[offset, offset + len)` is widened to the smallest block
//! aligned superset, and the caller's bytes are later copied out of the
//! staging buffer starting at `head`.

use crate::config::BLOCK_ALIGN;

/// Round `value` up to the next multiple of `align`.
///
/// # Panics
/// Panics if `align` is not a power of two.
#[inline]
pub fn align_up(value: u64, align: u64) -> u64 {
    assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}

/// Round `value` down to a multiple of `align`.
///
/// # Panics
/// Panics if `align` is not a power of two.
#[inline]
pub fn align_down(value: u64, align: u64) -> u64 {
    assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Block-aligned superset of a caller byte range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignedRange {
    /// Aligned file offset where the device read starts.
    pub offset: u64,
    /// Aligned read length (multiple of the block size).
    pub len: u64,
    /// Bytes between `offset` and the caller's first byte.
    pub head: u64,
}

impl AlignedRange {
    /// Widen `[offset, offset + len)` to `BLOCK_ALIGN` boundaries.
    pub fn for_range(offset: u64, len: u64) -> Self {
        Self::for_range_with(offset, len, BLOCK_ALIGN)
    }

    /// Widen `[offset, offset + len)` to `align` boundaries.
    pub fn for_range_with(offset: u64, len: u64, align: u64) -> Self {
        let aligned = align_down(offset, align);
        let head = offset - aligned;
        Self {
            offset: aligned,
            len: align_up(len + head, align),
            head,
        }
    }

    /// True when the caller range already is the aligned range.
    #[inline]
    pub fn is_exact(&self, len: u64) -> bool {
        self.head == 0 && self.len == len
    }
}
