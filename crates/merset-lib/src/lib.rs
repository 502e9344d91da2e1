// merset: k-mer counting and multiset algebra
//
// Converts DNA sequence into sorted indices of (k-mer, count) pairs
// under a memory budget, and evaluates set operations, filters, and
// reports over any number of such indices.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod constants;
pub mod counting;
pub mod encoding;
pub mod error;
pub mod index_reader;
pub mod index_writer;
pub mod input;
pub mod kmer;
pub mod layout;
pub mod operation;
pub mod record;
pub mod report;
pub mod sequence;
pub mod serialization;

// Re-export common types at crate root
pub use counting::{count_files, plan_run, CountStream, CountingConfig, PlanSummary};
pub use error::{EngineError, Result};
pub use index_reader::IndexReader;
pub use index_writer::IndexWriter;
pub use input::MerInput;
pub use kmer::{KmerCodec, Orientation};
pub use layout::{BucketLayout, CountingPlan};
pub use operation::{AdjustOp, Combine, FilterRule, MerOp, MerOperation, ThresholdSpec};
pub use record::KmerRecord;
pub use report::{CompareReport, Histogram, OpReport, Statistics};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}
