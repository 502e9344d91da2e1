//! Bucketized counting: external-memory pass for key spaces that
//! outgrow the budget
//!
//! Phase 1 shards every window by key prefix into per-bucket buffers,
//! spilling them to temp files whenever the resident total crosses the
//! spill threshold. Phase 2 drains buckets one at a time in prefix
//! order: load the bucket's spill file and leftover buffer, sort the
//! suffixes, collapse equal runs into counts. Concatenating the buckets
//! in prefix order yields the global key order, so the stream needs no
//! final merge.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::Mmap;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{EngineError, IoPathExt, Result};
use crate::kmer::{KmerCodec, Orientation};
use crate::layout::BucketLayout;
use crate::record::KmerRecord;
use crate::sequence::parse_batches;

/// Owns the run's spill files; whatever is left on disk goes away with it
#[derive(Debug)]
struct SpillFiles {
    tmp_dir: PathBuf,
    run_id: u64,
    buckets: u64,
}

impl SpillFiles {
    fn path_for(&self, bucket: u64) -> PathBuf {
        self.tmp_dir
            .join(format!("merset.tmp.run_{}.bucket_{}.bin", self.run_id, bucket))
    }
}

impl Drop for SpillFiles {
    fn drop(&mut self) {
        for bucket in 0..self.buckets {
            let _ = fs::remove_file(self.path_for(bucket));
        }
    }
}

/// Phase 1: shards windows into per-bucket buffers and spill files
pub struct BucketAccumulator {
    files: SpillFiles,
    layout: BucketLayout,
    buffers: Vec<Vec<u64>>,
    has_spill: Vec<bool>,
    pending_bytes: usize,
    spill_bytes: usize,
    total_windows: u64,
}

impl BucketAccumulator {
    /// Create an accumulator spilling under `tmp_dir` once more than
    /// `spill_bytes` of suffixes sit in memory
    pub fn new(tmp_dir: impl AsRef<Path>, layout: BucketLayout, spill_bytes: usize) -> Result<Self> {
        let tmp_dir = tmp_dir.as_ref().to_path_buf();
        fs::create_dir_all(&tmp_dir).at_path(&tmp_dir)?;

        // timestamp-based run ID keeps concurrent runs apart
        let run_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_nanos() as u64;

        let bucket_count = layout.bucket_count();
        Ok(Self {
            files: SpillFiles {
                tmp_dir,
                run_id,
                buckets: bucket_count,
            },
            layout,
            buffers: vec![Vec::new(); bucket_count as usize],
            has_spill: vec![false; bucket_count as usize],
            pending_bytes: 0,
            spill_bytes: spill_bytes.max(1),
            total_windows: 0,
        })
    }

    /// Shard a batch of keys, spilling if the resident total crosses the
    /// threshold
    pub fn add_all(&mut self, keys: &[u64]) -> Result<()> {
        for &key in keys {
            let bucket = self.layout.prefix_of(key);
            self.buffers[bucket as usize].push(self.layout.suffix_of(key));
        }
        self.pending_bytes += 8 * keys.len();
        self.total_windows += keys.len() as u64;
        if self.pending_bytes >= self.spill_bytes {
            self.spill()?;
        }
        Ok(())
    }

    /// Windows sharded so far
    pub fn total_windows(&self) -> u64 {
        self.total_windows
    }

    fn spill(&mut self) -> Result<()> {
        debug!(
            pending_bytes = self.pending_bytes,
            "spilling bucket buffers"
        );
        for (bucket, buffer) in self.buffers.iter_mut().enumerate() {
            if buffer.is_empty() {
                continue;
            }
            let path = self.files.path_for(bucket as u64);
            let mut bytes = Vec::with_capacity(8 * buffer.len());
            for &suffix in buffer.iter() {
                bytes.extend_from_slice(&suffix.to_le_bytes());
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .at_path(&path)?;
            file.write_all(&bytes).at_path(&path)?;
            self.has_spill[bucket] = true;
            buffer.clear();
        }
        self.pending_bytes = 0;
        Ok(())
    }

    /// Switch to phase 2, positioned at the first record
    pub fn into_stream(self) -> Result<BucketStream> {
        let mut stream = BucketStream {
            files: self.files,
            layout: self.layout,
            resident: self.buffers,
            has_spill: self.has_spill,
            next_bucket: 0,
            current: Vec::new(),
            pos: 0,
            total_windows: self.total_windows,
        };
        stream.load_until_nonempty()?;
        Ok(stream)
    }
}

/// Phase 2: streams collapsed records bucket by bucket in prefix order
#[derive(Debug)]
pub struct BucketStream {
    files: SpillFiles,
    layout: BucketLayout,
    resident: Vec<Vec<u64>>,
    has_spill: Vec<bool>,
    next_bucket: usize,
    current: Vec<KmerRecord>,
    pos: usize,
    total_windows: u64,
}

impl BucketStream {
    /// Windows that went into this stream
    pub fn total_windows(&self) -> u64 {
        self.total_windows
    }

    /// The record the cursor is on, if any
    #[inline]
    pub fn peek(&self) -> Option<KmerRecord> {
        self.current.get(self.pos).copied()
    }

    /// Step to the next record and return it
    pub fn advance(&mut self) -> Result<Option<KmerRecord>> {
        self.pos += 1;
        if self.pos >= self.current.len() {
            self.load_until_nonempty()?;
        }
        Ok(self.peek())
    }

    fn load_until_nonempty(&mut self) -> Result<()> {
        self.current.clear();
        self.pos = 0;
        while self.current.is_empty() && self.next_bucket < self.resident.len() {
            let bucket = self.next_bucket;
            self.next_bucket += 1;
            self.current = self.load_bucket(bucket)?;
        }
        Ok(())
    }

    /// Sort and collapse one bucket's occurrences into counted records
    fn load_bucket(&mut self, bucket: usize) -> Result<Vec<KmerRecord>> {
        let mut suffixes = std::mem::take(&mut self.resident[bucket]);

        if self.has_spill[bucket] {
            let path = self.files.path_for(bucket as u64);
            let file = File::open(&path).at_path(&path)?;
            let mmap = unsafe { Mmap::map(&file) }.at_path(&path)?;
            suffixes.reserve(mmap.len() / 8);
            for chunk in mmap.chunks_exact(8) {
                suffixes.push(u64::from_le_bytes(chunk.try_into().expect("8-byte chunk")));
            }
            drop(mmap);
            let _ = fs::remove_file(&path);
        }

        if suffixes.is_empty() {
            return Ok(Vec::new());
        }
        suffixes.par_sort_unstable();

        let mut records = Vec::new();
        let mut run_suffix = suffixes[0];
        let mut run_len = 0u64;
        for &suffix in &suffixes {
            if suffix == run_suffix {
                run_len += 1;
            } else {
                records.push(KmerRecord::new(
                    self.layout.assemble(bucket as u64, run_suffix),
                    run_len,
                ));
                run_suffix = suffix;
                run_len = 1;
            }
        }
        records.push(KmerRecord::new(
            self.layout.assemble(bucket as u64, run_suffix),
            run_len,
        ));
        Ok(records)
    }
}

/// Count every oriented window of `paths` through the external pass
///
/// # Errors
/// Fails on unreadable or malformed sequence files, non-ACGT bases, and
/// temp-file I/O problems.
pub fn count_bucketized(
    codec: KmerCodec,
    orientation: Orientation,
    paths: &[PathBuf],
    layout: BucketLayout,
    batch_bases: usize,
    spill_bytes: usize,
    tmp_dir: &Path,
) -> Result<BucketStream> {
    let mut accumulator = BucketAccumulator::new(tmp_dir, layout, spill_bytes)?;

    for path in paths {
        parse_batches(path, batch_bases, |batch| {
            let keys: Vec<Vec<u64>> = batch
                .par_iter()
                .map(|seq| {
                    codec
                        .windows(seq, orientation)
                        .map_err(|e| EngineError::Sequence {
                            path: path.clone(),
                            source: anyhow::Error::new(e),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            for seq_keys in &keys {
                accumulator.add_all(seq_keys)?;
            }
            Ok(())
        })?;
    }

    accumulator.into_stream()
}
