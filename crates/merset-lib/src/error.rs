//! Engine-wide error taxonomy
//!
//! Configuration problems (bad parameters, wrong arity, mismatched k) are
//! reported before any work starts; resource and data errors carry the
//! path or input index they came from so a failing pipeline names its
//! culprit.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::serialization::IndexFormatError;

/// Any failure the engine can report
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation is missing a parameter its kind requires
    #[error("{op}: missing required parameter: {what}")]
    MissingParameter {
        /// Operation name
        op: &'static str,
        /// What was missing
        what: &'static str,
    },

    /// An operation parameter is present but unusable
    #[error("{op}: invalid parameter: {detail}")]
    InvalidParameter {
        /// Operation name
        op: &'static str,
        /// What is wrong with it
        detail: String,
    },

    /// An operation has the wrong number of inputs for its kind
    #[error("{op}: expected {expected} input(s), found {actual}")]
    ArityMismatch {
        /// Operation name
        op: &'static str,
        /// Human-readable arity requirement, e.g. "exactly 2" or "at least 1"
        expected: &'static str,
        /// How many inputs were attached
        actual: usize,
    },

    /// An operation input uses a different k than the operation
    #[error("{op}: input {index} carries k={found} but the operation runs at k={expected}")]
    KmerSizeMismatch {
        /// Operation name
        op: &'static str,
        /// Zero-based input position
        index: usize,
        /// k of the first input
        expected: u32,
        /// k of the offending input
        found: u32,
    },

    /// An operation input is of a kind the operation cannot consume
    #[error("{op}: input {index} must be a {wanted} source")]
    WrongInputKind {
        /// Operation name
        op: &'static str,
        /// Zero-based input position
        index: usize,
        /// The kind the operation needs there
        wanted: &'static str,
    },

    /// A fractional threshold needs stored statistics the input lacks
    #[error("{op}: fractional thresholds need a persisted index input with stored statistics")]
    MissingStatistics {
        /// Operation name
        op: &'static str,
    },

    /// A counting or engine configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No counting scheme fits the memory budget
    #[error("counting needs at least {needed} bytes but the memory budget is {budget} bytes")]
    MemoryBudget {
        /// Smallest footprint any scheme could achieve
        needed: u64,
        /// Configured budget
        budget: u64,
    },

    /// Refusing to clobber an existing output index
    #[error("output {} already exists", .0.display())]
    OutputExists(PathBuf),

    /// An I/O operation failed
    #[error("i/o failure on {}", path.display())]
    Io {
        /// File the operation touched
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A sequence input could not be parsed
    #[error("sequence input {}: {source}", path.display())]
    Sequence {
        /// The FASTA/FASTQ file
        path: PathBuf,
        /// Parser failure
        #[source]
        source: anyhow::Error,
    },

    /// A byte that is not A/C/G/T, or an unusable k
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// A malformed, truncated or incomplete index file
    #[error(transparent)]
    IndexFormat(#[from] IndexFormatError),
}

/// Shorthand result type used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Attach a path to a raw I/O result
pub(crate) trait IoPathExt<T> {
    fn at_path(self, path: &Path) -> Result<T>;
}

impl<T> IoPathExt<T> for std::io::Result<T> {
    fn at_path(self, path: &Path) -> Result<T> {
        self.map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
