//! Counting configuration
//!
//! Parameters for one counting run: k, orientation, the memory budget
//! the planner must respect, and worker/temp-file settings.

use std::path::PathBuf;

use crate::constants::{is_valid_k, COUNT_BATCH_BASES, DEFAULT_MEMORY_LIMIT_GIB, GIB, MAX_K, MIN_K};
use crate::error::{EngineError, Result};
use crate::kmer::Orientation;

/// Configuration parameters for counting k-mers out of sequence files
#[derive(Debug, Clone)]
pub struct CountingConfig {
    /// K-mer length (1 to 32)
    pub k: u32,

    /// How scanned windows map to counted keys
    pub orientation: Orientation,

    /// Memory budget in bytes (0 = probe physical memory)
    pub memory_bytes: u64,

    /// Number of threads for parallel operations (0 = all available cores)
    pub num_threads: usize,

    /// Override the distinct-k-mer estimate instead of deriving it from
    /// the input size
    pub expected_distinct: Option<u64>,

    /// Bases buffered per parallel batch
    pub batch_bases: usize,

    /// Directory for spill files during bucketized counting
    pub tmp_dirname: PathBuf,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            k: 21,
            orientation: Orientation::Canonical,
            memory_bytes: 0, // 0 = probe physical memory
            num_threads: 0,  // 0 = use all available cores
            expected_distinct: None,
            batch_bases: COUNT_BATCH_BASES,
            tmp_dirname: PathBuf::from("merset_tmp"),
        }
    }
}

impl CountingConfig {
    /// Create a configuration for the given k with everything else default
    pub fn new(k: u32) -> Result<Self> {
        let config = Self {
            k,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if !is_valid_k(self.k) {
            return Err(EngineError::InvalidConfig(format!(
                "k must be in range [{MIN_K}, {MAX_K}], got k={}",
                self.k
            )));
        }
        if self.batch_bases == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_bases must be positive".to_string(),
            ));
        }
        if self.memory_bytes != 0 && self.memory_bytes < 1 << 20 {
            return Err(EngineError::InvalidConfig(format!(
                "memory budget of {} bytes is below the 1 MiB floor",
                self.memory_bytes
            )));
        }
        if let Some(0) = self.expected_distinct {
            return Err(EngineError::InvalidConfig(
                "expected_distinct must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// The memory budget to plan against, probing the machine when unset
    pub fn resolved_memory_bytes(&self) -> u64 {
        if self.memory_bytes != 0 {
            return self.memory_bytes;
        }
        detect_physical_memory().unwrap_or(DEFAULT_MEMORY_LIMIT_GIB as u64 * GIB)
    }

    /// The worker count to run with
    pub fn resolved_threads(&self) -> usize {
        if self.num_threads != 0 {
            return self.num_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Counting configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  orientation = {}", self.orientation.as_str());
        if self.memory_bytes == 0 {
            tracing::info!(
                "  memory = physical ({} bytes)",
                self.resolved_memory_bytes()
            );
        } else {
            tracing::info!("  memory = {} bytes", self.memory_bytes);
        }
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        if let Some(n) = self.expected_distinct {
            tracing::info!("  expected_distinct = {n}");
        }
        tracing::debug!("  batch_bases = {}", self.batch_bases);
        tracing::debug!("  tmp_dirname = {:?}", self.tmp_dirname);
    }
}

/// Total physical memory in bytes, if the machine exposes it
///
/// Reads `/proc/meminfo`; elsewhere the caller falls back to a fixed
/// default budget.
pub fn detect_physical_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CountingConfig::default();
        assert_eq!(config.k, 21);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_k_out_of_range() {
        let config = CountingConfig {
            k: 0,
            ..CountingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CountingConfig {
            k: 33,
            ..CountingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_tiny_budget() {
        let config = CountingConfig {
            memory_bytes: 1024,
            ..CountingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_defaults_are_positive() {
        let config = CountingConfig::default();
        assert!(config.resolved_memory_bytes() >= 1 << 20);
        assert!(config.resolved_threads() >= 1);
    }

    #[test]
    fn test_explicit_settings_win() {
        let config = CountingConfig {
            memory_bytes: 2 << 20,
            num_threads: 3,
            ..CountingConfig::default()
        };
        assert_eq!(config.resolved_memory_bytes(), 2 << 20);
        assert_eq!(config.resolved_threads(), 3);
    }
}
