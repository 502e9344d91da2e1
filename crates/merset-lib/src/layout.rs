//! Prefix/suffix key split and counting-scheme selection
//!
//! A 2k-bit key divides into a high-order prefix that names a bucket and a
//! low-order suffix stored inside the bucket. Iterating buckets in
//! ascending prefix order, each sorted by suffix, reproduces the global
//! numeric key order. The same split drives both the persisted index
//! layout and the external-memory counting pass.

use crate::constants::{ceil_log2, DEFAULT_FILE_PREFIX_BITS, MAX_PLAN_PREFIX_BITS};
use crate::error::{EngineError, Result};

/// A concrete prefix/suffix split for one k
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLayout {
    k: u32,
    prefix_bits: u32,
    suffix_bits: u32,
    suffix_mask: u64,
}

impl BucketLayout {
    /// Build a layout splitting 2k key bits into `prefix_bits` high bits
    /// and the rest
    ///
    /// # Errors
    /// Returns an error unless `prefix_bits <= 2k`.
    pub fn new(k: u32, prefix_bits: u32) -> Result<Self> {
        let key_bits = 2 * k;
        if prefix_bits > key_bits {
            return Err(EngineError::InvalidConfig(format!(
                "prefix of {prefix_bits} bits does not fit a {key_bits}-bit key (k={k})"
            )));
        }
        let suffix_bits = key_bits - prefix_bits;
        let suffix_mask = if suffix_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << suffix_bits) - 1
        };
        Ok(Self {
            k,
            prefix_bits,
            suffix_bits,
            suffix_mask,
        })
    }

    /// The split used for persisted index files at this k
    ///
    /// 64 buckets normally; narrower for k too small to spare six bits.
    pub fn for_index_file(k: u32) -> Self {
        let prefix_bits = DEFAULT_FILE_PREFIX_BITS.min((2 * k).saturating_sub(2));
        // prefix_bits <= 2k always holds here
        Self::new(k, prefix_bits).expect("file layout is always in range")
    }

    /// k-mer size of the keys this layout splits
    #[inline]
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Number of high-order bits naming the bucket
    #[inline]
    pub fn prefix_bits(&self) -> u32 {
        self.prefix_bits
    }

    /// Number of low-order bits stored per record
    #[inline]
    pub fn suffix_bits(&self) -> u32 {
        self.suffix_bits
    }

    /// Number of buckets, `2^prefix_bits`
    #[inline]
    pub fn bucket_count(&self) -> u64 {
        1u64 << self.prefix_bits
    }

    /// Bucket index of a key
    #[inline]
    pub fn prefix_of(&self, kmer: u64) -> u64 {
        if self.suffix_bits >= 64 {
            0
        } else {
            kmer >> self.suffix_bits
        }
    }

    /// Within-bucket remainder of a key
    #[inline]
    pub fn suffix_of(&self, kmer: u64) -> u64 {
        kmer & self.suffix_mask
    }

    /// Rebuild a key from its bucket index and suffix
    #[inline]
    pub fn assemble(&self, prefix: u64, suffix: u64) -> u64 {
        if self.suffix_bits >= 64 {
            suffix
        } else {
            (prefix << self.suffix_bits) | suffix
        }
    }

    /// Bytes needed to store one suffix on disk
    #[inline]
    pub fn suffix_bytes(&self) -> usize {
        (self.suffix_bits as usize).div_ceil(8)
    }
}

/// The counting scheme selected for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountingPlan {
    /// One array slot per possible k-mer; viable only when `4^k` tables
    /// fit the budget
    Simple {
        /// Table length, `4^k`
        slots: u64,
        /// Worker count the size estimate assumed
        threads: usize,
        /// Projected peak footprint in bytes
        projected_bytes: u64,
    },
    /// Shard occurrences into per-bucket spill files, then sort and
    /// collapse one bucket at a time
    Bucketized {
        /// The prefix split for sharding
        layout: BucketLayout,
        /// Projected peak footprint of a single bucket pass in bytes
        projected_bytes: u64,
    },
}

impl CountingPlan {
    /// Short scheme name for logs
    pub fn name(&self) -> &'static str {
        match self {
            CountingPlan::Simple { .. } => "simple",
            CountingPlan::Bucketized { .. } => "bucketized",
        }
    }
}

/// Bytes the simple scheme needs: one u16 slot per possible k-mer, one
/// private table per worker plus the shared accumulator.
fn simple_table_bytes(k: u32, threads: usize) -> u128 {
    let slots = 1u128 << (2 * k);
    2 * slots * (threads as u128 + 1)
}

/// Bytes one bucket pass of the bucketized scheme needs at a given split:
/// the bucket's raw occurrence list plus its collapsed records, with
/// sort headroom.
fn bucket_pass_bytes(est_total: u64, est_distinct: u64, prefix_bits: u32) -> u64 {
    let buckets = 1u64 << prefix_bits;
    let occurrences = est_total.div_ceil(buckets).saturating_mul(8);
    let collapsed = est_distinct.div_ceil(buckets).saturating_mul(16);
    let base = occurrences.saturating_add(collapsed);
    base.saturating_add(base / 4)
}

/// Pick a counting scheme for `k` under `budget_bytes`
///
/// Prefers the simple scheme whenever its tables fit. Otherwise picks the
/// shallowest bucket split whose single-bucket pass stays inside half the
/// budget (the other half buffers unspilled shards). Deeper splits cost
/// more spill files, so the smallest workable prefix wins.
///
/// # Errors
/// Returns [`EngineError::MemoryBudget`] when even the deepest allowed
/// split cannot fit.
pub fn plan_counting(
    k: u32,
    budget_bytes: u64,
    threads: usize,
    est_total: u64,
    est_distinct: u64,
) -> Result<CountingPlan> {
    let simple_bytes = simple_table_bytes(k, threads);
    if simple_bytes <= budget_bytes as u128 {
        return Ok(CountingPlan::Simple {
            slots: 1u64 << (2 * k),
            threads,
            projected_bytes: simple_bytes as u64,
        });
    }

    let max_prefix = MAX_PLAN_PREFIX_BITS.min(2 * k - 1);
    // enough buckets that an average bucket fits, if the cap allows it
    let wanted = ceil_log2(
        bucket_pass_bytes(est_total, est_distinct, 0).div_ceil((budget_bytes / 2).max(1)),
    ) as u32;
    for prefix_bits in wanted.clamp(1, max_prefix)..=max_prefix {
        let pass_bytes = bucket_pass_bytes(est_total, est_distinct, prefix_bits);
        if pass_bytes <= budget_bytes / 2 {
            return Ok(CountingPlan::Bucketized {
                layout: BucketLayout::new(k, prefix_bits)?,
                projected_bytes: pass_bytes,
            });
        }
    }
    Err(EngineError::MemoryBudget {
        needed: bucket_pass_bytes(est_total, est_distinct, max_prefix).saturating_mul(2),
        budget: budget_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_roundtrip() {
        let layout = BucketLayout::new(11, 6).unwrap();
        assert_eq!(layout.bucket_count(), 64);
        assert_eq!(layout.suffix_bits(), 16);
        assert_eq!(layout.suffix_bytes(), 2);

        for kmer in [0u64, 1, 0x3FFFFF, 0x2A_5511, 0x15_FFFF] {
            let p = layout.prefix_of(kmer);
            let s = layout.suffix_of(kmer);
            assert!(p < layout.bucket_count());
            assert_eq!(layout.assemble(p, s), kmer);
        }
    }

    #[test]
    fn test_split_is_order_preserving() {
        let layout = BucketLayout::new(5, 4).unwrap();
        let keys = [0u64, 3, 17, 255, 256, 1000, (1 << 10) - 1];
        for pair in keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let pa = (layout.prefix_of(a), layout.suffix_of(a));
            let pb = (layout.prefix_of(b), layout.suffix_of(b));
            assert!(pa < pb, "bucket-major order must follow key order");
        }
    }

    #[test]
    fn test_degenerate_splits() {
        // whole key as suffix
        let layout = BucketLayout::new(32, 0).unwrap();
        assert_eq!(layout.bucket_count(), 1);
        assert_eq!(layout.prefix_of(u64::MAX), 0);
        assert_eq!(layout.suffix_of(u64::MAX), u64::MAX);
        assert_eq!(layout.assemble(0, 7), 7);

        // whole key as prefix
        let layout = BucketLayout::new(3, 6).unwrap();
        assert_eq!(layout.suffix_bits(), 0);
        assert_eq!(layout.suffix_of(0b101010), 0);
        assert_eq!(layout.assemble(0b101010, 0), 0b101010);

        assert!(BucketLayout::new(3, 7).is_err());
    }

    #[test]
    fn test_file_layout_clamps_small_k() {
        assert_eq!(BucketLayout::for_index_file(16).prefix_bits(), 6);
        assert_eq!(BucketLayout::for_index_file(3).prefix_bits(), 4);
        assert_eq!(BucketLayout::for_index_file(1).prefix_bits(), 0);
    }

    #[test]
    fn test_plan_prefers_simple_when_tables_fit() {
        let plan = plan_counting(7, 1 << 30, 4, 1_000_000, 16_000).unwrap();
        assert!(matches!(plan, CountingPlan::Simple { slots, .. } if slots == 1 << 14));
    }

    #[test]
    fn test_plan_falls_back_to_bucketized() {
        // 4^21 slots never fit 1 GiB
        let plan = plan_counting(21, 1 << 30, 4, 50_000_000, 40_000_000).unwrap();
        match plan {
            CountingPlan::Bucketized { layout, projected_bytes } => {
                assert!(layout.prefix_bits() >= 1);
                assert!(projected_bytes <= (1 << 30) / 2);
            }
            other => panic!("expected bucketized plan, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_rejects_impossible_budget() {
        let err = plan_counting(21, 1 << 16, 4, u64::MAX / 16, u64::MAX / 32).unwrap_err();
        assert!(matches!(err, EngineError::MemoryBudget { .. }));
    }
}
