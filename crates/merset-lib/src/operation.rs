//! The operation engine: a k-way merge with per-operator rules
//!
//! One `MerOperation` node owns an operator and its ordered inputs.
//! Each merge step finds the smallest key across all live cursors,
//! gathers which inputs carry it and with what counts, advances those
//! cursors, and lets the operator decide whether a record comes out and
//! with what count. Nodes nest: an operation is itself a valid input,
//! so arbitrary pipelines stream without materializing intermediates.
//!
//! Validation happens once, in `finalize`, before any record moves:
//! arity, input kinds, k agreement, and parameter sanity are all
//! checked there so merge-time code never sees an invalid node.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::constants::DEFAULT_COUNTER_BITS;
use crate::counting::CountingConfig;
use crate::error::{EngineError, IoPathExt, Result};
use crate::index_reader::IndexReader;
use crate::index_writer::IndexWriter;
use crate::input::MerInput;
use crate::kmer::{KmerCodec, Orientation};
use crate::record::KmerRecord;
use crate::report::{CompareReport, Histogram, OpReport, Statistics};
use crate::serialization::index_file_path;

/// How set operators turn the counts present at one key into one count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    /// The first present input's count
    First,
    /// Smallest present count
    Min,
    /// Largest present count
    Max,
    /// Saturating sum of present counts
    Sum,
}

impl Combine {
    fn apply(self, counts: &[u64]) -> u64 {
        match self {
            Combine::First => counts[0],
            Combine::Min => counts.iter().copied().min().unwrap_or(0),
            Combine::Max => counts.iter().copied().max().unwrap_or(0),
            Combine::Sum => counts.iter().fold(0u64, |acc, &c| acc.saturating_add(c)),
        }
    }
}

/// Count comparisons available to the filter operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRule {
    /// Keep counts strictly below the threshold
    LessThan,
    /// Keep counts strictly above the threshold
    GreaterThan,
    /// Keep counts at or above the threshold
    AtLeast,
    /// Keep counts at or below the threshold
    AtMost,
    /// Keep counts equal to the threshold
    EqualTo,
    /// Keep counts different from the threshold
    NotEqualTo,
}

impl FilterRule {
    fn accepts(self, count: u64, threshold: u64) -> bool {
        match self {
            FilterRule::LessThan => count < threshold,
            FilterRule::GreaterThan => count > threshold,
            FilterRule::AtLeast => count >= threshold,
            FilterRule::AtMost => count <= threshold,
            FilterRule::EqualTo => count == threshold,
            FilterRule::NotEqualTo => count != threshold,
        }
    }
}

/// Where a filter threshold comes from
///
/// The fractional forms resolve against the statistics stored in a
/// persisted index, so they require an index input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdSpec {
    /// An absolute count
    Value(u64),
    /// The count value at which this fraction of distinct keys is
    /// reached, walking the stored histogram in ascending count order
    FractionDistinct(f64),
    /// This fraction of the total occurrence count
    WordFrequency(f64),
}

/// Count arithmetic available to the adjust operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustOp {
    /// Saturating add
    Increase,
    /// Saturating subtract; keys reaching zero are dropped
    Decrease,
    /// Saturating multiply
    Multiply,
    /// Integer divide; keys reaching zero are dropped
    Divide,
    /// Remainder; keys reaching zero are dropped
    Modulo,
}

impl AdjustOp {
    fn apply(self, count: u64, constant: u64) -> u64 {
        match self {
            AdjustOp::Increase => count.saturating_add(constant),
            AdjustOp::Decrease => count.saturating_sub(constant),
            AdjustOp::Multiply => count.saturating_mul(constant),
            AdjustOp::Divide => count / constant,
            AdjustOp::Modulo => count % constant,
        }
    }
}

/// One operator with its per-kind data
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MerOp {
    /// Count the single sequence input in the given orientation
    Count(Orientation),
    /// Identity merge of a single input
    PassThrough,
    /// Keep keys whose count satisfies a comparison
    Filter {
        /// The comparison
        rule: FilterRule,
        /// The threshold, absolute or resolved from stored statistics
        threshold: ThresholdSpec,
    },
    /// Transform every count arithmetically
    Adjust {
        /// The arithmetic
        op: AdjustOp,
        /// Its operand
        constant: u64,
    },
    /// Keys present in any input
    Union(Combine),
    /// Keys present in every input
    Intersect(Combine),
    /// Keys present in the first input and no other
    Difference,
    /// Keys present in exactly one input
    SymmetricDifference,
    /// Accumulate a count-value histogram, emitting nothing
    Histogram,
    /// Accumulate summary statistics, emitting nothing
    Statistics,
    /// Tally per-key agreement between exactly two inputs
    Compare,
}

impl MerOp {
    /// The operator's name, as used in error context and the CLI
    pub fn name(&self) -> &'static str {
        match self {
            MerOp::Count(Orientation::Canonical) => "count",
            MerOp::Count(Orientation::Forward) => "count-forward",
            MerOp::Count(Orientation::Reverse) => "count-reverse",
            MerOp::PassThrough => "pass-through",
            MerOp::Filter { rule, .. } => match rule {
                FilterRule::LessThan => "less-than",
                FilterRule::GreaterThan => "greater-than",
                FilterRule::AtLeast => "at-least",
                FilterRule::AtMost => "at-most",
                FilterRule::EqualTo => "equal-to",
                FilterRule::NotEqualTo => "not-equal-to",
            },
            MerOp::Adjust { op, .. } => match op {
                AdjustOp::Increase => "increase",
                AdjustOp::Decrease => "decrease",
                AdjustOp::Multiply => "multiply",
                AdjustOp::Divide => "divide",
                AdjustOp::Modulo => "modulo",
            },
            MerOp::Union(Combine::First) => "union",
            MerOp::Union(Combine::Min) => "union-min",
            MerOp::Union(Combine::Max) => "union-max",
            MerOp::Union(Combine::Sum) => "union-sum",
            MerOp::Intersect(Combine::First) => "intersect",
            MerOp::Intersect(Combine::Min) => "intersect-min",
            MerOp::Intersect(Combine::Max) => "intersect-max",
            MerOp::Intersect(Combine::Sum) => "intersect-sum",
            MerOp::Difference => "difference",
            MerOp::SymmetricDifference => "symmetric-difference",
            MerOp::Histogram => "histogram",
            MerOp::Statistics => "statistics",
            MerOp::Compare => "compare",
        }
    }

    /// Whether this operator produces a report instead of a stream
    fn is_report(&self) -> bool {
        matches!(self, MerOp::Histogram | MerOp::Statistics | MerOp::Compare)
    }

    /// Arity rule as (minimum, maximum, description)
    fn arity(&self) -> (usize, usize, &'static str) {
        match self {
            MerOp::Count(_)
            | MerOp::PassThrough
            | MerOp::Filter { .. }
            | MerOp::Adjust { .. }
            | MerOp::Histogram
            | MerOp::Statistics => (1, 1, "exactly 1"),
            MerOp::Compare => (2, 2, "exactly 2"),
            MerOp::Union(_) | MerOp::Intersect(_) => (1, usize::MAX, "at least 1"),
            MerOp::Difference | MerOp::SymmetricDifference => (2, usize::MAX, "at least 2"),
        }
    }
}

/// One node of an operation pipeline
pub struct MerOperation {
    op: MerOp,
    inputs: Vec<MerInput>,
    multiset: bool,
    memory_bytes: Option<u64>,
    num_threads: Option<usize>,
    output_path: Option<PathBuf>,
    counter_bits: u32,
    printer: Option<Box<dyn Write>>,
    k: Option<u32>,
    codec: Option<KmerCodec>,
    orientation: Orientation,
    threshold: u64,
    report: Option<OpReport>,
    finalized: bool,
    current: Option<KmerRecord>,
    act_inputs: Vec<usize>,
    act_counts: Vec<u64>,
}

impl MerOperation {
    /// Create a node with no inputs attached yet
    pub fn new(op: MerOp) -> Self {
        Self {
            op,
            inputs: Vec::new(),
            multiset: false,
            memory_bytes: None,
            num_threads: None,
            output_path: None,
            counter_bits: DEFAULT_COUNTER_BITS,
            printer: None,
            k: None,
            codec: None,
            orientation: Orientation::default(),
            threshold: 0,
            report: None,
            finalized: false,
            current: None,
            act_inputs: Vec::new(),
            act_counts: Vec::new(),
        }
    }

    /// The operator's name
    pub fn op_name(&self) -> &'static str {
        self.op.name()
    }

    /// Attach the next input; order matters for difference and compare
    pub fn add_input(&mut self, input: MerInput) {
        self.inputs.push(input);
    }

    /// Open an index file and attach it as the next input
    ///
    /// # Errors
    /// Fails when the file is missing, malformed, or incomplete.
    pub fn add_input_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.inputs.push(MerInput::open_index(path)?);
        Ok(())
    }

    /// Attach sequence files to be counted when the node finalizes
    pub fn add_input_sequences(&mut self, paths: Vec<PathBuf>, config: CountingConfig) {
        self.inputs.push(MerInput::from_sequences(paths, config));
    }

    /// Allow multiple records per key per input, collapsed by summation
    /// before the operator's rule applies
    pub fn set_multiset(&mut self, multiset: bool) {
        self.multiset = multiset;
    }

    /// Memory budget handed to counting runs this node triggers
    pub fn set_memory_limit(&mut self, bytes: u64) {
        self.memory_bytes = Some(bytes);
    }

    /// Thread count handed to counting runs this node triggers
    pub fn set_thread_limit(&mut self, threads: usize) {
        self.num_threads = Some(threads);
    }

    /// Stored count width of the output index
    pub fn set_counter_bits(&mut self, bits: u32) {
        self.counter_bits = bits;
    }

    /// Write the result stream to a new index at `path`
    ///
    /// A missing `.mset` extension is appended. The resulting path must
    /// not exist; `run_to_end` refuses to overwrite.
    pub fn set_output<P: AsRef<Path>>(&mut self, path: P) {
        self.output_path = Some(path.as_ref().to_path_buf());
    }

    /// Also dump every emitted record as `KMER<TAB>count` text
    pub fn add_printer(&mut self, printer: Box<dyn Write>) {
        self.printer = Some(printer);
    }

    /// The k this node runs at, known once finalized
    pub fn k(&self) -> Option<u32> {
        self.k
    }

    /// Whether the cursor is on a record
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key of the current record
    pub fn kmer(&self) -> Option<u64> {
        self.current.map(|r| r.kmer)
    }

    /// Count of the current record
    pub fn count(&self) -> Option<u64> {
        self.current.map(|r| r.count)
    }

    /// The current record
    pub fn peek(&self) -> Option<KmerRecord> {
        self.current
    }

    /// Step to the next record; same as [`MerOperation::next_mer`]
    pub fn advance(&mut self) -> Result<Option<KmerRecord>> {
        self.next_mer()
    }

    /// Validate the node and position the cursor on its first record
    ///
    /// Counting of sequence inputs happens here, as does recursive
    /// finalization of nested operations. Report operators consume their
    /// whole input here, leaving the report ready. Calling twice is a
    /// no-op.
    ///
    /// # Errors
    /// Reports arity violations, wrong input kinds, mismatched k,
    /// unusable parameters, and anything input preparation runs into.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let name = self.op.name();

        let (min_arity, max_arity, expected) = self.op.arity();
        if self.inputs.len() < min_arity || self.inputs.len() > max_arity {
            return Err(EngineError::ArityMismatch {
                op: name,
                expected,
                actual: self.inputs.len(),
            });
        }

        for (index, input) in self.inputs.iter().enumerate() {
            let wants_sequence = matches!(self.op, MerOp::Count(_));
            if wants_sequence != input.is_sequence() {
                return Err(EngineError::WrongInputKind {
                    op: name,
                    index,
                    wanted: if wants_sequence { "sequence" } else { "counted" },
                });
            }
        }

        self.check_parameters()?;
        if self.op.is_report() && self.output_path.is_some() {
            return Err(EngineError::InvalidParameter {
                op: name,
                detail: "produces a report, not an output index".to_string(),
            });
        }

        // counting runs below inherit this node's limits
        for input in &mut self.inputs {
            if let MerInput::Sequence { config, .. } = input {
                if let MerOp::Count(orientation) = self.op {
                    config.orientation = orientation;
                }
                if let Some(bytes) = self.memory_bytes {
                    config.memory_bytes = bytes;
                }
                if let Some(threads) = self.num_threads {
                    config.num_threads = threads;
                }
            }
        }

        debug!("{}: preparing {} input(s)", name, self.inputs.len());
        for input in &mut self.inputs {
            input.prepare()?;
        }

        let expected_k = match self.inputs[0].k() {
            Some(k) => k,
            None => {
                return Err(EngineError::InvalidConfig(format!(
                    "{name}: input 0 has no k after preparation"
                )))
            }
        };
        for (index, input) in self.inputs.iter().enumerate() {
            match input.k() {
                Some(k) if k == expected_k => {}
                Some(k) => {
                    return Err(EngineError::KmerSizeMismatch {
                        op: name,
                        index,
                        expected: expected_k,
                        found: k,
                    })
                }
                None => {
                    return Err(EngineError::InvalidConfig(format!(
                        "{name}: input {index} has no k after preparation"
                    )))
                }
            }
        }
        self.k = Some(expected_k);
        self.codec = Some(KmerCodec::new(expected_k)?);
        self.orientation = match self.op {
            MerOp::Count(orientation) => orientation,
            _ => match self.inputs.first() {
                Some(MerInput::Index(reader)) => reader.orientation(),
                _ => Orientation::default(),
            },
        };

        self.resolve_threshold()?;

        self.report = match self.op {
            MerOp::Histogram => Some(OpReport::Histogram(Histogram::new())),
            MerOp::Statistics => Some(OpReport::Statistics(Statistics::new())),
            MerOp::Compare => Some(OpReport::Compare(CompareReport::new())),
            _ => None,
        };

        self.act_inputs.reserve(self.inputs.len());
        self.act_counts.reserve(self.inputs.len());
        self.finalized = true;

        self.next_mer()?;
        Ok(())
    }

    /// Parameter sanity, checked before any input is touched
    fn check_parameters(&self) -> Result<()> {
        let name = self.op.name();
        match self.op {
            MerOp::Adjust {
                op: AdjustOp::Divide | AdjustOp::Modulo,
                constant: 0,
            } => Err(EngineError::InvalidParameter {
                op: name,
                detail: "constant must not be zero".to_string(),
            }),
            MerOp::Filter {
                threshold:
                    ThresholdSpec::FractionDistinct(fraction) | ThresholdSpec::WordFrequency(fraction),
                ..
            } if !(fraction > 0.0 && fraction <= 1.0) => Err(EngineError::InvalidParameter {
                op: name,
                detail: format!("fraction {fraction} is outside (0, 1]"),
            }),
            _ => Ok(()),
        }
    }

    /// Turn a fractional threshold into an absolute count using the
    /// statistics stored in the index input
    fn resolve_threshold(&mut self) -> Result<()> {
        let MerOp::Filter { threshold, .. } = self.op else {
            return Ok(());
        };
        self.threshold = match threshold {
            ThresholdSpec::Value(value) => value,
            ThresholdSpec::FractionDistinct(fraction) => {
                let reader = self.require_index_input()?;
                let target = (fraction * reader.distinct() as f64).ceil() as u64;
                let mut cumulative = 0u64;
                let mut resolved = 0u64;
                for &(value, keys) in reader.histogram() {
                    cumulative += keys;
                    resolved = value;
                    if cumulative >= target {
                        break;
                    }
                }
                resolved
            }
            ThresholdSpec::WordFrequency(fraction) => {
                let reader = self.require_index_input()?;
                (fraction * reader.total() as f64).ceil() as u64
            }
        };
        if !matches!(threshold, ThresholdSpec::Value(_)) {
            info!(
                "{}: threshold resolved to {}",
                self.op.name(),
                self.threshold
            );
        }
        Ok(())
    }

    fn require_index_input(&self) -> Result<&IndexReader> {
        match self.inputs.first() {
            Some(MerInput::Index(reader)) => Ok(reader),
            _ => Err(EngineError::MissingStatistics {
                op: self.op.name(),
            }),
        }
    }

    /// Advance the merge until the operator emits the next record
    ///
    /// Returns `None` at exhaustion; the cursor then holds nothing.
    /// Report operators never emit, so their first call consumes every
    /// input while accumulating the report.
    ///
    /// # Errors
    /// Propagates failures from the underlying inputs.
    pub fn next_mer(&mut self) -> Result<Option<KmerRecord>> {
        loop {
            let mut smallest: Option<u64> = None;
            for input in &self.inputs {
                if let Some(record) = input.peek() {
                    smallest = Some(match smallest {
                        None => record.kmer,
                        Some(key) => key.min(record.kmer),
                    });
                }
            }
            let Some(key) = smallest else {
                self.current = None;
                return Ok(None);
            };

            self.act_inputs.clear();
            self.act_counts.clear();
            for (index, input) in self.inputs.iter_mut().enumerate() {
                let Some(record) = input.peek() else { continue };
                if record.kmer != key {
                    continue;
                }
                let mut count = record.count;
                input.advance()?;
                if self.multiset {
                    // collapse per-input duplicates before the rule
                    while let Some(next) = input.peek() {
                        if next.kmer != key {
                            break;
                        }
                        count = count.saturating_add(next.count);
                        input.advance()?;
                    }
                }
                self.act_inputs.push(index);
                self.act_counts.push(count);
            }

            if let Some(record) = self.apply_rule(key) {
                self.current = Some(record);
                return Ok(Some(record));
            }
        }
    }

    /// The operator's decision for one key, given which inputs carry it
    fn apply_rule(&mut self, key: u64) -> Option<KmerRecord> {
        let present = self.act_inputs.len();
        match self.op {
            MerOp::Count(_) | MerOp::PassThrough => {
                Some(KmerRecord::new(key, self.act_counts[0]))
            }
            MerOp::Union(combine) => Some(KmerRecord::new(key, combine.apply(&self.act_counts))),
            MerOp::Intersect(combine) => (present == self.inputs.len())
                .then(|| KmerRecord::new(key, combine.apply(&self.act_counts))),
            MerOp::Difference => (present == 1 && self.act_inputs[0] == 0)
                .then(|| KmerRecord::new(key, self.act_counts[0])),
            MerOp::SymmetricDifference => {
                (present == 1).then(|| KmerRecord::new(key, self.act_counts[0]))
            }
            MerOp::Filter { rule, .. } => rule
                .accepts(self.act_counts[0], self.threshold)
                .then(|| KmerRecord::new(key, self.act_counts[0])),
            MerOp::Adjust { op, constant } => {
                let adjusted = op.apply(self.act_counts[0], constant);
                // zero-count keys leave the multiset entirely
                (adjusted > 0).then(|| KmerRecord::new(key, adjusted))
            }
            MerOp::Histogram => {
                if let Some(OpReport::Histogram(histogram)) = &mut self.report {
                    histogram.record(self.act_counts[0]);
                }
                None
            }
            MerOp::Statistics => {
                if let Some(OpReport::Statistics(statistics)) = &mut self.report {
                    statistics.record(self.act_counts[0]);
                }
                None
            }
            MerOp::Compare => {
                if let Some(OpReport::Compare(report)) = &mut self.report {
                    match (present, self.act_inputs[0]) {
                        (2, _) => {
                            if self.act_counts[0] == self.act_counts[1] {
                                report.record_equal();
                            } else {
                                report.record_differs(key, self.act_counts[0], self.act_counts[1]);
                            }
                        }
                        (1, 0) => report.record_only_first(key, self.act_counts[0]),
                        _ => report.record_only_second(key, self.act_counts[0]),
                    }
                }
                None
            }
        }
    }

    /// Drain the node, writing and printing every emitted record
    ///
    /// Finalizes the node if needed, writes the output index when one
    /// was requested, and returns the report for report operators.
    ///
    /// # Errors
    /// Anything `finalize` reports, plus output I/O failures, including
    /// an already-existing output path.
    pub fn run_to_end(&mut self) -> Result<Option<OpReport>> {
        self.finalize()?;
        let codec = self.codec.expect("finalize sets the codec");

        let mut writer = match self.output_path.take() {
            Some(path) => Some(IndexWriter::create(
                index_file_path(path),
                codec.k(),
                self.orientation,
                self.counter_bits,
            )?),
            None => None,
        };

        let mut emitted = 0u64;
        while let Some(record) = self.current {
            if let Some(writer) = writer.as_mut() {
                writer.push(record)?;
            }
            if let Some(printer) = self.printer.as_mut() {
                writeln!(printer, "{}\t{}", codec.decode(record.kmer), record.count)
                    .at_path(Path::new("print stream"))?;
            }
            emitted += 1;
            self.next_mer()?;
        }

        if let Some(printer) = self.printer.as_mut() {
            printer.flush().at_path(Path::new("print stream"))?;
        }
        if let Some(writer) = writer {
            let (distinct, total) = writer.finalize()?;
            info!(
                "{}: wrote {} distinct keys, {} total occurrences",
                self.op.name(),
                distinct,
                total
            );
        } else {
            debug!("{}: emitted {} record(s)", self.op.name(), emitted);
        }
        Ok(self.report.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn records(pairs: &[(u64, u64)]) -> Vec<KmerRecord> {
        pairs.iter().map(|&(k, c)| KmerRecord::new(k, c)).collect()
    }

    fn drain(op: &mut MerOperation) -> Vec<KmerRecord> {
        op.finalize().unwrap();
        let mut out = Vec::new();
        while let Some(record) = op.peek() {
            out.push(record);
            op.next_mer().unwrap();
        }
        out
    }

    #[test]
    fn test_union_sum_of_single_key_inputs() {
        let mut op = MerOperation::new(MerOp::Union(Combine::Sum));
        op.add_input(MerInput::from_records(7, records(&[(10, 3)])));
        op.add_input(MerInput::from_records(7, records(&[(10, 5)])));
        assert_eq!(drain(&mut op), records(&[(10, 8)]));
    }

    #[test]
    fn test_intersect_max_of_single_key_inputs() {
        let mut op = MerOperation::new(MerOp::Intersect(Combine::Max));
        op.add_input(MerInput::from_records(7, records(&[(10, 3)])));
        op.add_input(MerInput::from_records(7, records(&[(10, 5)])));
        assert_eq!(drain(&mut op), records(&[(10, 5)]));
    }

    #[test]
    fn test_difference_of_equal_inputs_is_empty() {
        let mut op = MerOperation::new(MerOp::Difference);
        op.add_input(MerInput::from_records(7, records(&[(10, 3)])));
        op.add_input(MerInput::from_records(7, records(&[(10, 5)])));
        assert_eq!(drain(&mut op), records(&[]));
    }

    #[test]
    fn test_union_first_keeps_earliest_present_count() {
        let mut op = MerOperation::new(MerOp::Union(Combine::First));
        op.add_input(MerInput::from_records(5, records(&[(1, 9), (4, 2)])));
        op.add_input(MerInput::from_records(5, records(&[(2, 7), (4, 100)])));
        assert_eq!(drain(&mut op), records(&[(1, 9), (2, 7), (4, 2)]));
    }

    #[test]
    fn test_difference_keeps_first_only_keys() {
        let mut op = MerOperation::new(MerOp::Difference);
        op.add_input(MerInput::from_records(5, records(&[(1, 4), (3, 1), (8, 2)])));
        op.add_input(MerInput::from_records(5, records(&[(3, 9)])));
        op.add_input(MerInput::from_records(5, records(&[(8, 1), (9, 1)])));
        assert_eq!(drain(&mut op), records(&[(1, 4)]));
    }

    #[test]
    fn test_symmetric_difference_exactly_one() {
        let mut op = MerOperation::new(MerOp::SymmetricDifference);
        op.add_input(MerInput::from_records(5, records(&[(1, 4), (3, 1)])));
        op.add_input(MerInput::from_records(5, records(&[(3, 2), (9, 6)])));
        assert_eq!(drain(&mut op), records(&[(1, 4), (9, 6)]));
    }

    #[test]
    fn test_union_intersect_duality_on_shared_keys() {
        let a = records(&[(1, 3), (5, 2), (9, 8)]);
        let b = records(&[(5, 7), (9, 1), (12, 4)]);

        let mut union_min = MerOperation::new(MerOp::Union(Combine::Min));
        union_min.add_input(MerInput::from_records(9, a.clone()));
        union_min.add_input(MerInput::from_records(9, b.clone()));
        let union_records = drain(&mut union_min);

        let mut intersect_min = MerOperation::new(MerOp::Intersect(Combine::Min));
        intersect_min.add_input(MerInput::from_records(9, a.clone()));
        intersect_min.add_input(MerInput::from_records(9, b.clone()));
        let intersect_records = drain(&mut intersect_min);

        let shared: Vec<KmerRecord> = union_records
            .into_iter()
            .filter(|r| {
                a.iter().any(|x| x.kmer == r.kmer) && b.iter().any(|x| x.kmer == r.kmer)
            })
            .collect();
        assert_eq!(shared, intersect_records);
        assert_eq!(intersect_records, records(&[(5, 2), (9, 1)]));
    }

    #[test]
    fn test_filter_at_least_keeps_matching_counts_unchanged() {
        let mut op = MerOperation::new(MerOp::Filter {
            rule: FilterRule::AtLeast,
            threshold: ThresholdSpec::Value(5),
        });
        op.add_input(MerInput::from_records(5, records(&[(2, 2), (6, 7)])));
        assert_eq!(drain(&mut op), records(&[(6, 7)]));
    }

    #[test]
    fn test_filter_rules_cover_all_comparisons() {
        let input = [(1u64, 1u64), (2, 4), (3, 5), (4, 9)];
        let cases = [
            (FilterRule::LessThan, vec![(1, 1), (2, 4)]),
            (FilterRule::GreaterThan, vec![(4, 9)]),
            (FilterRule::AtLeast, vec![(3, 5), (4, 9)]),
            (FilterRule::AtMost, vec![(1, 1), (2, 4), (3, 5)]),
            (FilterRule::EqualTo, vec![(3, 5)]),
            (FilterRule::NotEqualTo, vec![(1, 1), (2, 4), (4, 9)]),
        ];
        for (rule, expected) in cases {
            let mut op = MerOperation::new(MerOp::Filter {
                rule,
                threshold: ThresholdSpec::Value(5),
            });
            op.add_input(MerInput::from_records(5, records(&input)));
            assert_eq!(drain(&mut op), records(&expected), "{rule:?}");
        }
    }

    #[test]
    fn test_adjust_drops_keys_reaching_zero() {
        let mut op = MerOperation::new(MerOp::Adjust {
            op: AdjustOp::Decrease,
            constant: 3,
        });
        op.add_input(MerInput::from_records(5, records(&[(1, 2), (2, 3), (3, 10)])));
        assert_eq!(drain(&mut op), records(&[(3, 7)]));

        let mut op = MerOperation::new(MerOp::Adjust {
            op: AdjustOp::Divide,
            constant: 4,
        });
        op.add_input(MerInput::from_records(5, records(&[(1, 3), (2, 9)])));
        assert_eq!(drain(&mut op), records(&[(2, 2)]));

        let mut op = MerOperation::new(MerOp::Adjust {
            op: AdjustOp::Multiply,
            constant: u64::MAX,
        });
        op.add_input(MerInput::from_records(5, records(&[(1, 2)])));
        assert_eq!(drain(&mut op), records(&[(1, u64::MAX)]));
    }

    #[test]
    fn test_divide_by_zero_rejected_at_finalize() {
        let mut op = MerOperation::new(MerOp::Adjust {
            op: AdjustOp::Divide,
            constant: 0,
        });
        op.add_input(MerInput::from_records(5, records(&[(1, 2)])));
        let err = op.finalize().unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { op: "divide", .. }));
    }

    #[test]
    fn test_arity_violations_rejected() {
        let mut compare = MerOperation::new(MerOp::Compare);
        compare.add_input(MerInput::from_records(5, records(&[(1, 1)])));
        assert!(matches!(
            compare.finalize().unwrap_err(),
            EngineError::ArityMismatch { op: "compare", .. }
        ));

        let mut difference = MerOperation::new(MerOp::Difference);
        difference.add_input(MerInput::from_records(5, records(&[(1, 1)])));
        assert!(matches!(
            difference.finalize().unwrap_err(),
            EngineError::ArityMismatch { op: "difference", .. }
        ));

        let mut union = MerOperation::new(MerOp::Union(Combine::First));
        assert!(matches!(
            union.finalize().unwrap_err(),
            EngineError::ArityMismatch { op: "union", .. }
        ));
    }

    #[test]
    fn test_sequence_input_rejected_by_algebra_ops() {
        let mut op = MerOperation::new(MerOp::Union(Combine::Sum));
        op.add_input(MerInput::from_sequences(
            vec![PathBuf::from("reads.fasta")],
            CountingConfig::new(5).unwrap(),
        ));
        assert!(matches!(
            op.finalize().unwrap_err(),
            EngineError::WrongInputKind {
                op: "union-sum",
                index: 0,
                wanted: "counted"
            }
        ));
    }

    #[test]
    fn test_mismatched_k_rejected() {
        let mut op = MerOperation::new(MerOp::Union(Combine::Sum));
        op.add_input(MerInput::from_records(5, records(&[(1, 1)])));
        op.add_input(MerInput::from_records(7, records(&[(1, 1)])));
        assert!(matches!(
            op.finalize().unwrap_err(),
            EngineError::KmerSizeMismatch {
                index: 1,
                expected: 5,
                found: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_multiset_collapses_per_input_duplicates() {
        let duplicated = vec![
            KmerRecord::new(4, 2),
            KmerRecord::new(4, 3),
            KmerRecord::new(9, 1),
        ];
        let mut op = MerOperation::new(MerOp::Union(Combine::Sum));
        op.set_multiset(true);
        op.add_input(MerInput::from_stream(
            5,
            crate::counting::CountStream::Memory {
                records: duplicated,
                pos: 0,
            },
        ));
        op.add_input(MerInput::from_records(5, records(&[(4, 10)])));
        assert_eq!(drain(&mut op), records(&[(4, 15), (9, 1)]));
    }

    #[test]
    fn test_count_scenario_forward_windows() {
        let mut fasta = tempfile::NamedTempFile::new().unwrap();
        writeln!(fasta, ">s\nAAAACGT").unwrap();
        fasta.flush().unwrap();

        let mut config = CountingConfig::new(4).unwrap();
        config.num_threads = 1;
        let mut op = MerOperation::new(MerOp::Count(Orientation::Forward));
        op.add_input_sequences(vec![fasta.path().to_path_buf()], config);

        let out = drain(&mut op);
        let codec = KmerCodec::new(4).unwrap();
        let mut expected: Vec<KmerRecord> = [&b"AAAA"[..], b"AAAC", b"AACG", b"ACGT"]
            .iter()
            .map(|w| KmerRecord::new(codec.encode(w).unwrap(), 1))
            .collect();
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_nested_operations_stream_through() {
        // (A union-sum B) then at-least 3
        let mut union = MerOperation::new(MerOp::Union(Combine::Sum));
        union.add_input(MerInput::from_records(5, records(&[(1, 1), (5, 2)])));
        union.add_input(MerInput::from_records(5, records(&[(5, 2), (8, 9)])));

        let mut filter = MerOperation::new(MerOp::Filter {
            rule: FilterRule::AtLeast,
            threshold: ThresholdSpec::Value(3),
        });
        filter.add_input(MerInput::from_operation(union));
        assert_eq!(drain(&mut filter), records(&[(5, 4), (8, 9)]));
    }

    #[test]
    fn test_histogram_and_statistics_agree_on_totals() {
        let input = records(&[(1, 1), (2, 2), (3, 2), (4, 7)]);

        let mut histogram_op = MerOperation::new(MerOp::Histogram);
        histogram_op.add_input(MerInput::from_records(5, input.clone()));
        let histogram = match histogram_op.run_to_end().unwrap() {
            Some(OpReport::Histogram(h)) => h,
            other => panic!("expected histogram report, got {other:?}"),
        };

        let mut statistics_op = MerOperation::new(MerOp::Statistics);
        statistics_op.add_input(MerInput::from_records(5, input));
        let statistics = match statistics_op.run_to_end().unwrap() {
            Some(OpReport::Statistics(s)) => s,
            other => panic!("expected statistics report, got {other:?}"),
        };

        let weighted: u64 = histogram.bins().map(|(v, n)| v * n).sum();
        assert_eq!(weighted, statistics.total());
        assert_eq!(histogram.distinct(), 4);
        assert_eq!(statistics.total(), 12);
    }

    #[test]
    fn test_compare_reports_disagreements() {
        let mut op = MerOperation::new(MerOp::Compare);
        op.add_input(MerInput::from_records(5, records(&[(1, 1), (2, 5), (7, 2)])));
        op.add_input(MerInput::from_records(5, records(&[(1, 1), (2, 6), (9, 4)])));
        let report = match op.run_to_end().unwrap() {
            Some(OpReport::Compare(c)) => c,
            other => panic!("expected compare report, got {other:?}"),
        };
        assert_eq!(report.matches(), 1);
        assert_eq!(report.count_mismatches(), 1);
        assert_eq!(report.only_in_first(), 1);
        assert_eq!(report.only_in_second(), 1);
        assert!(!report.is_identical());
    }

    #[test]
    fn test_report_op_refuses_output_index() {
        let mut op = MerOperation::new(MerOp::Histogram);
        op.add_input(MerInput::from_records(5, records(&[(1, 1)])));
        op.set_output("never.mset");
        assert!(matches!(
            op.finalize().unwrap_err(),
            EngineError::InvalidParameter { op: "histogram", .. }
        ));
    }

    #[test]
    fn test_printer_emits_decoded_text() {
        let codec = KmerCodec::new(3).unwrap();
        let acg = codec.encode(b"ACG").unwrap();
        let tgt = codec.encode(b"TGT").unwrap();
        let mut input = records(&[(acg, 2), (tgt, 1)]);
        input.sort();

        let dir = tempfile::tempdir().unwrap();
        let text_path = dir.path().join("dump.txt");
        let mut op = MerOperation::new(MerOp::PassThrough);
        op.add_input(MerInput::from_records(3, input));
        op.add_printer(Box::new(std::fs::File::create(&text_path).unwrap()));
        op.run_to_end().unwrap();

        let text = std::fs::read_to_string(&text_path).unwrap();
        assert!(text.contains("ACG\t2"));
        assert!(text.contains("TGT\t1"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_difference_completeness() {
        // every key of A lands in exactly one of difference / intersect
        let a = records(&[(1, 3), (4, 1), (6, 2), (9, 5)]);
        let b = records(&[(4, 2), (9, 9), (11, 1)]);

        let mut difference = MerOperation::new(MerOp::Difference);
        difference.add_input(MerInput::from_records(5, a.clone()));
        difference.add_input(MerInput::from_records(5, b.clone()));
        let diff_keys: Vec<u64> = drain(&mut difference).iter().map(|r| r.kmer).collect();

        let mut intersect = MerOperation::new(MerOp::Intersect(Combine::First));
        intersect.add_input(MerInput::from_records(5, a.clone()));
        intersect.add_input(MerInput::from_records(5, b));
        let both_keys: Vec<u64> = drain(&mut intersect).iter().map(|r| r.kmer).collect();

        for record in &a {
            let in_diff = diff_keys.contains(&record.kmer);
            let in_both = both_keys.contains(&record.kmer);
            assert!(in_diff ^ in_both, "key {} must be in exactly one", record.kmer);
        }
    }
}
