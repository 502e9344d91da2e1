//! Validated index reader
//!
//! The whole file is memory-mapped once; records stream out in global
//! key order by walking the buckets in prefix order. Opening validates
//! the header against the trailer before the first record is surfaced,
//! so a reader that opens successfully is reading a complete file.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{EngineError, Result};
use crate::kmer::Orientation;
use crate::layout::BucketLayout;
use crate::record::KmerRecord;
use crate::serialization::{
    read_uint_le, IndexFormatError, IndexHeader, IndexTrailer, HEADER_BYTES,
};

/// Streams one index file's records in ascending key order
#[derive(Debug)]
pub struct IndexReader {
    path: PathBuf,
    mmap: Mmap,
    header: IndexHeader,
    layout: BucketLayout,
    directory: Vec<u64>,
    histogram: Vec<(u64, u64)>,
    body_len: usize,
    body_offset: usize,
    bucket: usize,
    read_in_bucket: u64,
    current: Option<KmerRecord>,
}

impl IndexReader {
    /// Open and validate an index, positioned at its first record
    ///
    /// # Errors
    /// Rejects files with foreign magic, unsupported versions, missing or
    /// inconsistent trailers, and bodies whose size disagrees with the
    /// directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| EngineError::Io {
            path: path.clone(),
            source: e,
        })?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| EngineError::Io {
            path: path.clone(),
            source: e,
        })?;

        let header = IndexHeader::read(&mut &mmap[..], &path)?;
        let layout = header.layout();
        let trailer = IndexTrailer::parse(&mmap, layout.bucket_count(), &path)?;

        let incomplete = |detail: String| {
            EngineError::from(IndexFormatError::Incomplete {
                path: path.clone(),
                detail,
            })
        };

        if trailer.distinct != header.distinct || trailer.total != header.total {
            return Err(incomplete(format!(
                "trailer echoes ({}, {}) but header says ({}, {})",
                trailer.distinct, trailer.total, header.distinct, header.total
            )));
        }
        let directory_sum: u64 = trailer.directory.iter().sum();
        if directory_sum != header.distinct {
            return Err(incomplete(format!(
                "bucket directory covers {directory_sum} records, header says {}",
                header.distinct
            )));
        }
        let body_len = mmap.len() as u64 - HEADER_BYTES - trailer.byte_size();
        let expected_body = header.distinct * header.record_bytes() as u64;
        if body_len != expected_body {
            return Err(incomplete(format!(
                "body holds {body_len} bytes, directory implies {expected_body}"
            )));
        }
        let hist_distinct: u64 = trailer.histogram.iter().map(|&(_, n)| n).sum();
        let hist_total = trailer
            .histogram
            .iter()
            .fold(0u64, |acc, &(v, n)| acc.saturating_add(v.saturating_mul(n)));
        if hist_distinct != header.distinct || hist_total != header.total {
            return Err(incomplete(
                "stored histogram disagrees with the totals".to_string(),
            ));
        }

        let mut reader = Self {
            path,
            mmap,
            header,
            layout,
            directory: trailer.directory,
            histogram: trailer.histogram,
            body_len: body_len as usize,
            body_offset: 0,
            bucket: 0,
            read_in_bucket: 0,
            current: None,
        };
        reader.advance()?;
        Ok(reader)
    }

    /// The file being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The validated header
    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// k of every key in the file
    pub fn k(&self) -> u32 {
        self.header.k
    }

    /// Orientation the keys were counted under
    pub fn orientation(&self) -> Orientation {
        self.header.orientation
    }

    /// Number of distinct keys
    pub fn distinct(&self) -> u64 {
        self.header.distinct
    }

    /// Sum of all stored counts
    pub fn total(&self) -> u64 {
        self.header.total
    }

    /// The stored count histogram, ascending by count value
    pub fn histogram(&self) -> &[(u64, u64)] {
        &self.histogram
    }

    /// The record the cursor is on, if any
    #[inline]
    pub fn peek(&self) -> Option<KmerRecord> {
        self.current
    }

    /// Step to the next record and return it
    ///
    /// # Errors
    /// Reports corrupt bodies: suffixes wider than the layout, zero or
    /// oversized counts, keys that fail to strictly ascend.
    pub fn advance(&mut self) -> Result<Option<KmerRecord>> {
        while self.bucket < self.directory.len()
            && self.read_in_bucket == self.directory[self.bucket]
        {
            self.bucket += 1;
            self.read_in_bucket = 0;
        }
        if self.bucket == self.directory.len() {
            self.current = None;
            return Ok(None);
        }

        let corrupt = |path: &Path, detail: String| {
            EngineError::from(IndexFormatError::Corrupt {
                path: path.to_path_buf(),
                detail,
            })
        };

        let suffix_bytes = self.layout.suffix_bytes();
        let counter_bytes = self.header.counter_bytes();
        let body = &self.mmap[HEADER_BYTES as usize..HEADER_BYTES as usize + self.body_len];
        let at = self.body_offset;
        let suffix = read_uint_le(&body[at..at + suffix_bytes]);
        let count = read_uint_le(&body[at + suffix_bytes..at + suffix_bytes + counter_bytes]);

        if self.layout.suffix_of(suffix) != suffix {
            return Err(corrupt(
                &self.path,
                format!("suffix {suffix:#x} wider than {} bits", self.layout.suffix_bits()),
            ));
        }
        if count == 0 || count > self.header.max_count() {
            return Err(corrupt(
                &self.path,
                format!("stored count {count} outside the counter range"),
            ));
        }

        let key = self.layout.assemble(self.bucket as u64, suffix);
        if let Some(prev) = self.current {
            if key <= prev.kmer {
                return Err(IndexFormatError::OutOfOrder {
                    path: self.path.clone(),
                    prev: prev.kmer,
                    key,
                }
                .into());
            }
        }

        self.body_offset += suffix_bytes + counter_bytes;
        self.read_in_bucket += 1;
        let record = KmerRecord::new(key, count);
        self.current = Some(record);
        Ok(Some(record))
    }
}
