//! Report accumulators for the non-emitting operators
//!
//! Histogram and statistics runs fold every record into an accumulator
//! instead of emitting a stream; compare tallies per-key agreement
//! between exactly two inputs. The histogram here is the same shape an
//! index file stores in its trailer, so a stored histogram can seed a
//! report without rescanning the records.

use std::collections::BTreeMap;
use std::io;

/// Mismatching keys kept as examples in a compare report
const COMPARE_SAMPLE_LIMIT: usize = 10;

/// Count-value histogram: how many distinct keys occur with each count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    bins: BTreeMap<u64, u64>,
    distinct: u64,
    total: u64,
}

impl Histogram {
    /// Empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored `(count value, distinct keys)` pairs
    pub fn from_stored(pairs: &[(u64, u64)]) -> Self {
        let mut histogram = Self::new();
        for &(value, keys) in pairs {
            *histogram.bins.entry(value).or_insert(0) += keys;
            histogram.distinct += keys;
            histogram.total = histogram.total.saturating_add(value.saturating_mul(keys));
        }
        histogram
    }

    /// Fold in one key occurring `count` times
    pub fn record(&mut self, count: u64) {
        *self.bins.entry(count).or_insert(0) += 1;
        self.distinct += 1;
        self.total = self.total.saturating_add(count);
    }

    /// Distinct keys seen
    pub fn distinct(&self) -> u64 {
        self.distinct
    }

    /// Total occurrences, summed over all keys
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Keys seen exactly once
    pub fn unique(&self) -> u64 {
        self.bins.get(&1).copied().unwrap_or(0)
    }

    /// Smallest count seen
    pub fn min_count(&self) -> u64 {
        self.bins.keys().next().copied().unwrap_or(0)
    }

    /// Largest count seen
    pub fn max_count(&self) -> u64 {
        self.bins.keys().next_back().copied().unwrap_or(0)
    }

    /// Mean count over distinct keys
    pub fn mean(&self) -> f64 {
        if self.distinct == 0 {
            0.0
        } else {
            self.total as f64 / self.distinct as f64
        }
    }

    /// `(count value, distinct keys)` pairs in ascending value order
    pub fn bins(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.bins.iter().map(|(&value, &keys)| (value, keys))
    }

    /// Whether anything was recorded
    pub fn is_empty(&self) -> bool {
        self.distinct == 0
    }

    /// Write `value<TAB>distinct` lines in ascending value order
    pub fn render(&self, out: &mut dyn io::Write) -> io::Result<()> {
        for (value, keys) in self.bins() {
            writeln!(out, "{value}\t{keys}")?;
        }
        Ok(())
    }
}

/// Summary statistics over one counted stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    histogram: Histogram,
}

impl Statistics {
    /// Empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an already-accumulated histogram
    pub fn from_histogram(histogram: Histogram) -> Self {
        Self { histogram }
    }

    /// Fold in one key occurring `count` times
    pub fn record(&mut self, count: u64) {
        self.histogram.record(count);
    }

    /// The underlying histogram
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Distinct keys seen
    pub fn distinct(&self) -> u64 {
        self.histogram.distinct()
    }

    /// Total occurrences
    pub fn total(&self) -> u64 {
        self.histogram.total()
    }

    /// Write the summary block and the cumulative table
    pub fn render(&self, out: &mut dyn io::Write) -> io::Result<()> {
        let h = &self.histogram;
        writeln!(out, "distinct\t{}", h.distinct())?;
        writeln!(out, "unique\t{}", h.unique())?;
        writeln!(out, "total\t{}", h.total())?;
        writeln!(out, "minimum\t{}", h.min_count())?;
        writeln!(out, "maximum\t{}", h.max_count())?;
        writeln!(out, "mean\t{:.3}", h.mean())?;
        if h.is_empty() {
            return Ok(());
        }
        writeln!(out)?;
        writeln!(out, "value\tdistinct\tcumulative_fraction")?;
        let mut cumulative = 0u64;
        for (value, keys) in h.bins() {
            cumulative += keys;
            writeln!(
                out,
                "{value}\t{keys}\t{:.6}",
                cumulative as f64 / h.distinct() as f64
            )?;
        }
        Ok(())
    }
}

/// Per-key agreement tally between exactly two inputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompareReport {
    matches: u64,
    count_mismatches: u64,
    only_in_first: u64,
    only_in_second: u64,
    samples: Vec<(u64, Option<u64>, Option<u64>)>,
}

impl CompareReport {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    fn sample(&mut self, key: u64, first: Option<u64>, second: Option<u64>) {
        if self.samples.len() < COMPARE_SAMPLE_LIMIT {
            self.samples.push((key, first, second));
        }
    }

    /// Key present in both inputs with equal counts
    pub fn record_equal(&mut self) {
        self.matches += 1;
    }

    /// Key present in both inputs with differing counts
    pub fn record_differs(&mut self, key: u64, first: u64, second: u64) {
        self.count_mismatches += 1;
        self.sample(key, Some(first), Some(second));
    }

    /// Key present only in the first input
    pub fn record_only_first(&mut self, key: u64, count: u64) {
        self.only_in_first += 1;
        self.sample(key, Some(count), None);
    }

    /// Key present only in the second input
    pub fn record_only_second(&mut self, key: u64, count: u64) {
        self.only_in_second += 1;
        self.sample(key, None, Some(count));
    }

    /// Keys present in both inputs with equal counts
    pub fn matches(&self) -> u64 {
        self.matches
    }

    /// Keys present in both inputs with differing counts
    pub fn count_mismatches(&self) -> u64 {
        self.count_mismatches
    }

    /// Keys missing from the second input
    pub fn only_in_first(&self) -> u64 {
        self.only_in_first
    }

    /// Keys missing from the first input
    pub fn only_in_second(&self) -> u64 {
        self.only_in_second
    }

    /// True when the two inputs agreed on every key
    pub fn is_identical(&self) -> bool {
        self.count_mismatches == 0 && self.only_in_first == 0 && self.only_in_second == 0
    }

    /// Write the tally and a bounded list of example mismatches
    pub fn render(&self, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "matching\t{}", self.matches)?;
        writeln!(out, "count_mismatch\t{}", self.count_mismatches)?;
        writeln!(out, "only_in_first\t{}", self.only_in_first)?;
        writeln!(out, "only_in_second\t{}", self.only_in_second)?;
        for &(key, first, second) in &self.samples {
            let first = first.map_or_else(|| "-".to_string(), |c| c.to_string());
            let second = second.map_or_else(|| "-".to_string(), |c| c.to_string());
            writeln!(out, "  {key:#018x}\t{first}\t{second}")?;
        }
        Ok(())
    }
}

/// The side product of a report operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpReport {
    /// Count-value histogram
    Histogram(Histogram),
    /// Summary statistics
    Statistics(Statistics),
    /// Two-input agreement tally
    Compare(CompareReport),
}

impl OpReport {
    /// Write the report in its text form
    pub fn render(&self, out: &mut dyn io::Write) -> io::Result<()> {
        match self {
            OpReport::Histogram(h) => h.render(out),
            OpReport::Statistics(s) => s.render(out),
            OpReport::Compare(c) => c.render(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_totals_are_consistent() {
        let mut histogram = Histogram::new();
        for count in [1, 1, 1, 2, 5, 5] {
            histogram.record(count);
        }
        assert_eq!(histogram.distinct(), 6);
        assert_eq!(histogram.unique(), 3);
        assert_eq!(histogram.min_count(), 1);
        assert_eq!(histogram.max_count(), 5);

        // sum of value * keys over the bins equals the occurrence total
        let weighted: u64 = histogram.bins().map(|(v, n)| v * n).sum();
        assert_eq!(weighted, histogram.total());
        assert_eq!(histogram.total(), 15);
    }

    #[test]
    fn test_histogram_from_stored_matches_recorded() {
        let mut recorded = Histogram::new();
        for count in [3, 3, 7] {
            recorded.record(count);
        }
        let stored = Histogram::from_stored(&[(3, 2), (7, 1)]);
        assert_eq!(stored, recorded);
    }

    #[test]
    fn test_statistics_render_shape() {
        let mut stats = Statistics::new();
        for count in [1, 2, 2, 9] {
            stats.record(count);
        }
        let mut out = Vec::new();
        stats.render(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("distinct\t4"));
        assert!(text.contains("unique\t1"));
        assert!(text.contains("total\t14"));
        assert!(text.contains("maximum\t9"));
        assert!(text.contains("cumulative_fraction"));
        assert!(text.contains("9\t1\t1.000000"));
    }

    #[test]
    fn test_empty_reports() {
        let histogram = Histogram::new();
        assert!(histogram.is_empty());
        assert_eq!(histogram.mean(), 0.0);

        let mut out = Vec::new();
        Statistics::new().render(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("distinct\t0"));
    }

    #[test]
    fn test_compare_tally() {
        let mut report = CompareReport::new();
        report.record_equal();
        report.record_equal();
        report.record_differs(42, 3, 5);
        report.record_only_first(7, 1);
        assert_eq!(report.matches(), 2);
        assert_eq!(report.count_mismatches(), 1);
        assert_eq!(report.only_in_first(), 1);
        assert!(!report.is_identical());

        let mut clean = CompareReport::new();
        clean.record_equal();
        assert!(clean.is_identical());

        let mut out = Vec::new();
        report.render(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("count_mismatch\t1"));
        assert!(text.contains("only_in_first\t1"));
    }

    #[test]
    fn test_compare_sample_cap() {
        let mut report = CompareReport::new();
        for key in 0..50 {
            report.record_only_first(key, 1);
        }
        assert_eq!(report.only_in_first(), 50);
        assert_eq!(report.samples.len(), COMPARE_SAMPLE_LIMIT);
    }
}
