//! Distinct-k-mer estimation
//!
//! The counting planner needs a distinct-key estimate before any input
//! byte is read. The estimator is a trait so callers with better
//! knowledge (a previous run, a sketch) can substitute their own; the
//! default assumes windows land uniformly in the key space.

use std::path::PathBuf;

use crate::error::Result;
use crate::sequence::guess_base_count;

/// Estimates how many distinct keys a counting run will produce
pub trait DistinctEstimator {
    /// Expected distinct keys among `total_windows` windows at size `k`
    fn estimate(&self, k: u32, total_windows: u64) -> u64;
}

/// Uniform-occupancy expectation: `4^k * (1 - e^(-n / 4^k))`
///
/// Exact for uniformly random windows; an overestimate for real genomes,
/// which err on the safe side for memory planning. Clamped to `n`, the
/// trivial upper bound.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosedFormEstimator;

impl DistinctEstimator for ClosedFormEstimator {
    fn estimate(&self, k: u32, total_windows: u64) -> u64 {
        if total_windows == 0 {
            return 0;
        }
        let space = (2f64).powi(2 * k as i32);
        let n = total_windows as f64;
        let expected = space * (1.0 - (-n / space).exp());
        (expected.ceil() as u64).clamp(1, total_windows)
    }
}

/// Guess the total window count of a set of sequence files from their
/// sizes alone
///
/// # Errors
/// Fails if a file cannot be stat'ed.
pub fn guess_total_windows(paths: &[PathBuf]) -> Result<u64> {
    let mut total = 0u64;
    for path in paths {
        total = total.saturating_add(guess_base_count(path)?);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_input_estimates_near_total() {
        // far fewer windows than the key space: nearly all distinct
        let est = ClosedFormEstimator.estimate(21, 1_000_000);
        assert!(est > 990_000);
        assert!(est <= 1_000_000);
    }

    #[test]
    fn test_dense_input_saturates_key_space() {
        // k=3 has 64 possible keys; a million windows hit them all
        let est = ClosedFormEstimator.estimate(3, 1_000_000);
        assert_eq!(est, 64);
    }

    #[test]
    fn test_estimate_is_monotone_in_total() {
        let mut prev = 0;
        for n in [0u64, 10, 1000, 100_000, 10_000_000] {
            let est = ClosedFormEstimator.estimate(9, n);
            assert!(est >= prev);
            prev = est;
        }
    }

    #[test]
    fn test_empty_input_estimates_zero() {
        assert_eq!(ClosedFormEstimator.estimate(15, 0), 0);
    }
}
