// src/utils/matching_config.rs
use log::{info, warn};
use std::time::Duration;

use crate::utils::env::parse_env_or;

pub const DEFAULT_THRESHOLD: f64 = 0.29;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_ORACLE_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 4;
pub const DEFAULT_RUN_DEADLINE_SECONDS: u64 = 600;

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Candidates must score strictly above this to be kept.
    pub threshold: f64,
    pub top_k: usize,
    /// Oracle calls in flight per run.
    pub oracle_concurrency: usize,
    /// Runs in flight across the worker pool.
    pub max_concurrent_runs: usize,
    /// Deadline covering enumeration and scoring of one run.
    pub run_deadline: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            oracle_concurrency: DEFAULT_ORACLE_CONCURRENCY,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            run_deadline: Duration::from_secs(DEFAULT_RUN_DEADLINE_SECONDS),
        }
    }
}

impl MatchingConfig {
    pub fn from_env() -> Self {
        let mut threshold = parse_env_or("MATCH_THRESHOLD", DEFAULT_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            warn!(
                "MATCH_THRESHOLD {} outside [0, 1], using default {}",
                threshold, DEFAULT_THRESHOLD
            );
            threshold = DEFAULT_THRESHOLD;
        }

        Self {
            threshold,
            top_k: parse_env_or("MATCH_TOP_K", DEFAULT_TOP_K),
            oracle_concurrency: parse_env_or("ORACLE_CONCURRENCY", DEFAULT_ORACLE_CONCURRENCY)
                .max(1),
            max_concurrent_runs: parse_env_or("MAX_CONCURRENT_RUNS", DEFAULT_MAX_CONCURRENT_RUNS)
                .max(1),
            run_deadline: Duration::from_secs(parse_env_or(
                "RUN_DEADLINE_SECONDS",
                DEFAULT_RUN_DEADLINE_SECONDS,
            )),
        }
    }

    /// One connection per in-flight run plus one for the caller that
    /// enumerates and reports.
    pub fn db_pool_size(&self) -> u32 {
        u32::try_from(self.max_concurrent_runs)
            .unwrap_or(u32::MAX - 1)
            .saturating_add(1)
    }

    pub fn log_config(&self) {
        info!("🔍 Matching configuration");
        info!("   Threshold (exclusive): {}", self.threshold);
        info!("   Top K: {}", self.top_k);
        info!("   Oracle concurrency per run: {}", self.oracle_concurrency);
        info!("   Max concurrent runs: {}", self.max_concurrent_runs);
        info!("   Run deadline: {}s", self.run_deadline.as_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MatchingConfig::default();
        assert_eq!(config.threshold, 0.29);
        assert_eq!(config.top_k, 10);
        assert_eq!(config.run_deadline, Duration::from_secs(600));
    }

    #[test]
    fn test_db_pool_follows_run_pool() {
        let config = MatchingConfig {
            max_concurrent_runs: 8,
            ..MatchingConfig::default()
        };
        assert_eq!(config.db_pool_size(), 9);
        assert_eq!(MatchingConfig::default().db_pool_size(), 5);
    }

    #[test]
    fn test_from_env_rejects_out_of_range_threshold() {
        env::set_var("MATCH_THRESHOLD", "1.5");
        env::set_var("ORACLE_CONCURRENCY", "0");

        let config = MatchingConfig::from_env();
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.oracle_concurrency, 1);

        env::remove_var("MATCH_THRESHOLD");
        env::remove_var("ORACLE_CONCURRENCY");
    }
}
