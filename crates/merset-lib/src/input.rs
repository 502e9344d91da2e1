//! Inputs to an operation: the places counted records come from
//!
//! Every input drains as the same cursor contract the counting streams
//! and index readers follow: `peek` shows the current record, `advance`
//! steps past it, keys arrive strictly ascending with positive counts.
//! Sequence inputs turn into counted streams during `prepare`; until
//! then they hold only paths and a configuration.

use std::path::{Path, PathBuf};

use crate::counting::{count_files, CountStream, CountingConfig};
use crate::error::Result;
use crate::index_reader::IndexReader;
use crate::operation::MerOperation;
use crate::record::KmerRecord;

/// One operand of an operation
pub enum MerInput {
    /// Sequence files awaiting a counting pass
    Sequence {
        /// Files to count, drained in one pass
        paths: Vec<PathBuf>,
        /// Counting parameters, including k
        config: CountingConfig,
    },
    /// An in-memory or spill-backed stream of counted records
    Counted {
        /// Window size of the stream's keys
        k: u32,
        /// The records, ascending by key
        stream: CountStream,
    },
    /// A persisted index opened for sequential reads
    Index(IndexReader),
    /// A nested operation evaluated on demand
    Operation(Box<MerOperation>),
}

impl MerInput {
    /// Wrap sequence files for counting at `config.k`
    pub fn from_sequences(paths: Vec<PathBuf>, config: CountingConfig) -> Self {
        MerInput::Sequence { paths, config }
    }

    /// Wrap records already in ascending key order
    pub fn from_records(k: u32, records: Vec<KmerRecord>) -> Self {
        MerInput::Counted {
            k,
            stream: CountStream::from_records(records),
        }
    }

    /// Wrap a counting stream
    pub fn from_stream(k: u32, stream: CountStream) -> Self {
        MerInput::Counted { k, stream }
    }

    /// Wrap an opened index
    pub fn from_index(reader: IndexReader) -> Self {
        MerInput::Index(reader)
    }

    /// Open an index file and wrap it
    ///
    /// # Errors
    /// Fails when the file is missing, malformed, or incomplete.
    pub fn open_index<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(MerInput::Index(IndexReader::open(path)?))
    }

    /// Wrap a nested operation
    pub fn from_operation(op: MerOperation) -> Self {
        MerInput::Operation(Box::new(op))
    }

    /// Short kind name for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            MerInput::Sequence { .. } => "sequence",
            MerInput::Counted { .. } => "counted",
            MerInput::Index(_) => "index",
            MerInput::Operation(_) => "operation",
        }
    }

    /// Whether this input still holds uncounted sequence files
    pub fn is_sequence(&self) -> bool {
        matches!(self, MerInput::Sequence { .. })
    }

    /// The window size of this input's keys, if known yet
    ///
    /// Nested operations report `None` until finalized.
    pub fn k(&self) -> Option<u32> {
        match self {
            MerInput::Sequence { config, .. } => Some(config.k),
            MerInput::Counted { k, .. } => Some(*k),
            MerInput::Index(reader) => Some(reader.k()),
            MerInput::Operation(op) => op.k(),
        }
    }

    /// Make the input drainable: count sequences, finalize nested
    /// operations
    ///
    /// # Errors
    /// Fails when counting fails or a nested operation is invalid.
    pub fn prepare(&mut self) -> Result<()> {
        match self {
            MerInput::Sequence { paths, config } => {
                let k = config.k;
                let stream = count_files(config, paths)?;
                *self = MerInput::Counted { k, stream };
                Ok(())
            }
            MerInput::Operation(op) => op.finalize(),
            _ => Ok(()),
        }
    }

    /// The record the cursor is on, if any
    ///
    /// Sequence inputs have no records until prepared.
    pub fn peek(&self) -> Option<KmerRecord> {
        match self {
            MerInput::Sequence { .. } => None,
            MerInput::Counted { stream, .. } => stream.peek(),
            MerInput::Index(reader) => reader.peek(),
            MerInput::Operation(op) => op.peek(),
        }
    }

    /// Step past the current record and return the next
    ///
    /// # Errors
    /// Fails when the underlying source reports corruption or I/O
    /// trouble.
    pub fn advance(&mut self) -> Result<Option<KmerRecord>> {
        match self {
            MerInput::Sequence { .. } => Ok(None),
            MerInput::Counted { stream, .. } => stream.advance(),
            MerInput::Index(reader) => reader.advance(),
            MerInput::Operation(op) => op.advance(),
        }
    }
}
