//! Simple counting: one table slot per possible k-mer
//!
//! Viable when `4^k` fits the memory budget. Slots are u16 to keep the
//! table small; the rare k-mer that overflows a slot spills its excess
//! into a wide side table. Each worker tallies a private table over its
//! shard of a batch and the tables merge afterwards, so no slot is ever
//! shared between threads.

use std::path::PathBuf;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::constants::SIMPLE_SLOT_MAX;
use crate::error::{EngineError, Result};
use crate::kmer::{KmerCodec, Orientation};
use crate::record::KmerRecord;
use crate::sequence::parse_batches;

/// Flat occurrence table over the whole key space
pub struct SimpleTable {
    slots: Vec<u16>,
    overflow: AHashMap<u64, u64>,
}

impl SimpleTable {
    /// Allocate a zeroed table of `slots` entries
    pub fn new(slots: u64) -> Self {
        Self {
            slots: vec![0u16; slots as usize],
            overflow: AHashMap::new(),
        }
    }

    /// Add `n` occurrences of a key
    #[inline]
    pub fn add(&mut self, kmer: u64, n: u64) {
        let slot = &mut self.slots[kmer as usize];
        let sum = (*slot as u64).saturating_add(n);
        if sum <= SIMPLE_SLOT_MAX as u64 {
            *slot = sum as u16;
        } else {
            *slot = SIMPLE_SLOT_MAX;
            let excess = sum - SIMPLE_SLOT_MAX as u64;
            let entry = self.overflow.entry(kmer).or_insert(0);
            *entry = entry.saturating_add(excess);
        }
    }

    /// Fold another table into this one
    pub fn merge(&mut self, other: SimpleTable) {
        for (kmer, &count) in other.slots.iter().enumerate() {
            if count != 0 {
                self.add(kmer as u64, count as u64);
            }
        }
        for (kmer, excess) in other.overflow {
            let entry = self.overflow.entry(kmer).or_insert(0);
            *entry = entry.saturating_add(excess);
        }
    }

    /// Occurrences recorded for a key
    pub fn count(&self, kmer: u64) -> u64 {
        let base = self.slots[kmer as usize] as u64;
        base.saturating_add(self.overflow.get(&kmer).copied().unwrap_or(0))
    }

    /// Drain into records, ascending by key, zero-count keys omitted
    pub fn into_sorted_records(self) -> Vec<KmerRecord> {
        let mut records = Vec::new();
        for (kmer, &count) in self.slots.iter().enumerate() {
            if count != 0 {
                let kmer = kmer as u64;
                let total =
                    (count as u64).saturating_add(self.overflow.get(&kmer).copied().unwrap_or(0));
                records.push(KmerRecord::new(kmer, total));
            }
        }
        records
    }
}

/// Count every oriented window of `paths` into one sorted record list
///
/// # Errors
/// Fails on unreadable or malformed sequence files and on any non-ACGT
/// base.
pub fn count_simple(
    codec: KmerCodec,
    orientation: Orientation,
    paths: &[PathBuf],
    slots: u64,
    batch_bases: usize,
) -> Result<Vec<KmerRecord>> {
    let mut global = SimpleTable::new(slots);

    for path in paths {
        parse_batches(path, batch_bases, |batch| {
            let table = batch
                .par_iter()
                .try_fold(
                    || SimpleTable::new(slots),
                    |mut table, seq| {
                        codec
                            .for_each_window(seq, orientation, |key| table.add(key, 1))
                            .map_err(|e| EngineError::Sequence {
                                path: path.clone(),
                                source: anyhow::Error::new(e),
                            })?;
                        Ok::<_, EngineError>(table)
                    },
                )
                .try_reduce(
                    || SimpleTable::new(slots),
                    |mut a, b| {
                        a.merge(b);
                        Ok(a)
                    },
                )?;
            global.merge(table);
            Ok(())
        })?;
    }

    Ok(global.into_sorted_records())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_table_counts_and_sorts() {
        let mut table = SimpleTable::new(16);
        table.add(5, 1);
        table.add(3, 2);
        table.add(5, 1);
        assert_eq!(table.count(5), 2);

        let records = table.into_sorted_records();
        assert_eq!(
            records,
            vec![KmerRecord::new(3, 2), KmerRecord::new(5, 2)]
        );
    }

    #[test]
    fn test_slot_overflow_spills_wide() {
        let mut table = SimpleTable::new(4);
        table.add(1, SIMPLE_SLOT_MAX as u64);
        table.add(1, 10);
        assert_eq!(table.count(1), SIMPLE_SLOT_MAX as u64 + 10);

        let records = table.into_sorted_records();
        assert_eq!(records, vec![KmerRecord::new(1, SIMPLE_SLOT_MAX as u64 + 10)]);
    }

    #[test]
    fn test_merge_carries_overflow() {
        let mut a = SimpleTable::new(4);
        let mut b = SimpleTable::new(4);
        a.add(2, SIMPLE_SLOT_MAX as u64 + 7);
        b.add(2, SIMPLE_SLOT_MAX as u64 + 5);
        b.add(3, 1);
        a.merge(b);
        assert_eq!(a.count(2), 2 * SIMPLE_SLOT_MAX as u64 + 12);
        assert_eq!(a.count(3), 1);
    }

    #[test]
    fn test_count_simple_matches_hand_tally() {
        let mut fasta = NamedTempFile::new().unwrap();
        // forward 3-mers: ACG CGT GTA TAC ACG CGT
        writeln!(fasta, ">s\nACGTACGT").unwrap();
        fasta.flush().unwrap();

        let codec = KmerCodec::new(3).unwrap();
        let records = count_simple(
            codec,
            Orientation::Forward,
            &[fasta.path().to_path_buf()],
            1 << 6,
            1024,
        )
        .unwrap();

        let acg = codec.encode(b"ACG").unwrap();
        let cgt = codec.encode(b"CGT").unwrap();
        let gta = codec.encode(b"GTA").unwrap();
        let tac = codec.encode(b"TAC").unwrap();

        let mut expected = vec![
            KmerRecord::new(acg, 2),
            KmerRecord::new(cgt, 2),
            KmerRecord::new(gta, 1),
            KmerRecord::new(tac, 1),
        ];
        expected.sort_unstable();
        assert_eq!(records, expected);

        let total: u64 = records.iter().map(|r| r.count).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_count_simple_rejects_invalid_base() {
        let mut fasta = NamedTempFile::new().unwrap();
        writeln!(fasta, ">s\nACGTNACGT").unwrap();
        fasta.flush().unwrap();

        let codec = KmerCodec::new(3).unwrap();
        let err = count_simple(
            codec,
            Orientation::Forward,
            &[fasta.path().to_path_buf()],
            1 << 6,
            1024,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Sequence { .. }));
    }
}
