//! Constants and configuration defaults for merset
//!
//! This module defines compile-time and runtime constants used throughout
//! the library, including valid k-mer sizes and counting parameters.

/// Bytes per GiB
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Default memory budget in GiB for counting
pub const DEFAULT_MEMORY_LIMIT_GIB: usize = 8;

/// Default number of low-order prefix bits used to bucket a persisted index
/// (clamped to the k-mer width for small k)
pub const DEFAULT_FILE_PREFIX_BITS: u32 = 6;

/// Widest bucket split the counting planner will consider; 2^12 spill
/// files is the most a single pass is allowed to fan out to
pub const MAX_PLAN_PREFIX_BITS: u32 = 12;

/// Default width of an on-disk count field, in bits
pub const DEFAULT_COUNTER_BITS: u32 = 32;

/// Per-slot width of the simple counting table; counts past this spill
/// into a wide side table
pub const SIMPLE_SLOT_MAX: u16 = u16::MAX;

/// Bases buffered per parallel counting batch
pub const COUNT_BATCH_BASES: usize = 8 * 1024 * 1024;

/// Version number
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Check if a k-mer size is valid
///
/// Keys are packed two bits per base into a `u64`, so any k from 1 to 32
/// is representable.
#[inline]
pub const fn is_valid_k(k: u32) -> bool {
    k >= MIN_K && k <= MAX_K
}

/// Maximum k-mer size supported
pub const MAX_K: u32 = 32;

/// Minimum k-mer size supported
pub const MIN_K: u32 = 1;

/// Compute ceil(log2(x)).
///
/// Returns 0 for x <= 1, and the minimum number of bits needed to
/// represent values in [0, x) for x >= 2.
#[inline]
pub const fn ceil_log2(x: u64) -> usize {
    if x <= 1 {
        0
    } else {
        64 - (x - 1).leading_zeros() as usize
    }
}
