//! Streaming index writer
//!
//! Records arrive in strictly ascending key order and are appended as
//! they come; nothing is buffered beyond the `BufWriter`. The header is
//! written first with zeroed totals, the trailer goes out at finalize,
//! and the totals are patched back into the header last. A crash at any
//! point leaves a file without a consistent trailer, which readers
//! refuse as incomplete.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use tracing::debug;

use crate::constants::is_valid_k;
use crate::error::{EngineError, IoPathExt, Result};
use crate::kmer::Orientation;
use crate::layout::BucketLayout;
use crate::record::KmerRecord;
use crate::serialization::{
    write_uint_le, IndexFormatError, IndexHeader, IndexTrailer, HEADER_TOTALS_OFFSET,
};

/// Writes one sorted (k-mer, count) stream to an index file
#[derive(Debug)]
pub struct IndexWriter {
    path: PathBuf,
    file: BufWriter<File>,
    header: IndexHeader,
    layout: BucketLayout,
    directory: Vec<u64>,
    histogram: AHashMap<u64, u64>,
    distinct: u64,
    total: u64,
    last_key: Option<u64>,
}

impl IndexWriter {
    /// Create an index at `path` with the default bucket split
    ///
    /// # Errors
    /// Fails if the path already exists, or if `k` or `counter_bits` is
    /// out of range.
    pub fn create<P: AsRef<Path>>(
        path: P,
        k: u32,
        orientation: Orientation,
        counter_bits: u32,
    ) -> Result<Self> {
        let layout = BucketLayout::for_index_file(k);
        Self::create_with_layout(path, layout, orientation, counter_bits)
    }

    /// Create an index at `path` with an explicit bucket split
    ///
    /// # Errors
    /// Fails if the path already exists, or if the layout or
    /// `counter_bits` is out of range.
    pub fn create_with_layout<P: AsRef<Path>>(
        path: P,
        layout: BucketLayout,
        orientation: Orientation,
        counter_bits: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !is_valid_k(layout.k()) {
            return Err(EngineError::InvalidConfig(format!(
                "index k={} out of range",
                layout.k()
            )));
        }
        if counter_bits == 0 || counter_bits > 64 {
            return Err(EngineError::InvalidConfig(format!(
                "counter width of {counter_bits} bits out of range"
            )));
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    EngineError::OutputExists(path.clone())
                } else {
                    EngineError::Io {
                        path: path.clone(),
                        source: e,
                    }
                }
            })?;
        let mut file = BufWriter::new(file);

        let header = IndexHeader::new(layout.k(), orientation, layout.prefix_bits(), counter_bits);
        header.write(&mut file).at_path(&path)?;
        debug!(
            path = %path.display(),
            k = layout.k(),
            prefix_bits = layout.prefix_bits(),
            counter_bits,
            "created index"
        );

        Ok(Self {
            path,
            file,
            header,
            layout,
            directory: vec![0u64; layout.bucket_count() as usize],
            histogram: AHashMap::new(),
            distinct: 0,
            total: 0,
            last_key: None,
        })
    }

    /// The file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// k of the keys this writer accepts
    pub fn k(&self) -> u32 {
        self.header.k
    }

    /// Append one record
    ///
    /// Counts wider than the configured counter saturate to its maximum;
    /// the stored histogram and totals reflect the saturated value so the
    /// file agrees with itself on read-back.
    ///
    /// # Errors
    /// Rejects keys that do not strictly ascend past the previous record.
    pub fn push(&mut self, record: KmerRecord) -> Result<()> {
        debug_assert!(record.count > 0, "zero-count records never reach the writer");
        if let Some(prev) = self.last_key {
            if record.kmer <= prev {
                return Err(IndexFormatError::OutOfOrder {
                    path: self.path.clone(),
                    prev,
                    key: record.kmer,
                }
                .into());
            }
        }
        self.last_key = Some(record.kmer);

        let stored = record.count.min(self.header.max_count());
        let prefix = self.layout.prefix_of(record.kmer);
        let suffix = self.layout.suffix_of(record.kmer);
        write_uint_le(&mut self.file, suffix, self.layout.suffix_bytes()).at_path(&self.path)?;
        write_uint_le(&mut self.file, stored, self.header.counter_bytes()).at_path(&self.path)?;

        self.directory[prefix as usize] += 1;
        self.distinct += 1;
        self.total = self.total.saturating_add(stored);
        *self.histogram.entry(stored).or_insert(0) += 1;
        Ok(())
    }

    /// Write the trailer, patch the header totals and close the file
    ///
    /// Returns (distinct keys, total count) as persisted.
    pub fn finalize(mut self) -> Result<(u64, u64)> {
        let mut histogram: Vec<(u64, u64)> = self.histogram.drain().collect();
        histogram.sort_unstable();

        let trailer = IndexTrailer {
            directory: std::mem::take(&mut self.directory),
            histogram,
            distinct: self.distinct,
            total: self.total,
        };
        trailer.write(&mut self.file).at_path(&self.path)?;

        // the totals only become readable once the trailer is in place
        self.file
            .seek(SeekFrom::Start(HEADER_TOTALS_OFFSET))
            .at_path(&self.path)?;
        self.file
            .write_all(&self.distinct.to_le_bytes())
            .at_path(&self.path)?;
        self.file
            .write_all(&self.total.to_le_bytes())
            .at_path(&self.path)?;
        self.file.flush().at_path(&self.path)?;

        debug!(
            path = %self.path.display(),
            distinct = self.distinct,
            total = self.total,
            "finalized index"
        );
        Ok((self.distinct, self.total))
    }
}
