//! The (k-mer, count) record that flows between every stage

/// One k-mer and its occurrence count
///
/// Records compare by key first, so sorting a batch of them yields the
/// global stream order; the count only breaks ties between records that
/// carry the same key (as in pre-aggregation multiset streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KmerRecord {
    /// Packed k-mer key
    pub kmer: u64,
    /// Occurrence count; in-memory counts are u64 and saturate on overflow
    pub count: u64,
}

impl KmerRecord {
    /// Create a record
    #[inline]
    pub fn new(kmer: u64, count: u64) -> Self {
        Self { kmer, count }
    }
}
