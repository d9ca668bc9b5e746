// src/matching/ranking.rs
use futures::stream::{self, StreamExt};
use log::debug;

use crate::models::{Candidate, MatchScore};
use crate::oracle::OracleClient;
use crate::utils::matching_config::{
    MatchingConfig, DEFAULT_ORACLE_CONCURRENCY, DEFAULT_THRESHOLD, DEFAULT_TOP_K,
};

#[derive(Debug, Clone, Copy)]
pub struct RankingParams {
    /// Exclusive lower bound on kept scores.
    pub threshold: f64,
    pub top_k: usize,
    /// Oracle calls in flight at once.
    pub concurrency: usize,
}

impl Default for RankingParams {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            concurrency: DEFAULT_ORACLE_CONCURRENCY,
        }
    }
}

impl From<&MatchingConfig> for RankingParams {
    fn from(config: &MatchingConfig) -> Self {
        Self {
            threshold: config.threshold,
            top_k: config.top_k,
            concurrency: config.oracle_concurrency,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RankingReport {
    /// Kept matches, highest score first.
    pub matches: Vec<MatchScore>,
    pub scored: usize,
    /// Comparisons that failed and counted as 0.0.
    pub degraded: usize,
}

/// Scores a subject against candidates and keeps the best `top_k` above the threshold.
#[derive(Clone)]
pub struct RankingEngine {
    oracle: OracleClient,
    params: RankingParams,
}

impl RankingEngine {
    pub fn new(oracle: OracleClient, params: RankingParams) -> Self {
        Self { oracle, params }
    }

    /// Oracle calls fan out up to `concurrency`, but results are collected in
    /// enumeration order before anything is sorted, so equal scores keep
    /// their input order.
    pub async fn rank(&self, subject_text: &str, candidates: &[Candidate]) -> RankingReport {
        let concurrency = self.params.concurrency.max(1);
        let comparisons: Vec<(MatchScore, bool)> = stream::iter(0..candidates.len())
            .map(|index| async move {
                let candidate = &candidates[index];
                let comparison = self
                    .oracle
                    .compare(subject_text, &candidate.description)
                    .await;
                debug!(
                    "Candidate {} scored {:.3}{}",
                    candidate.id,
                    comparison.score,
                    if comparison.degraded { " (degraded)" } else { "" }
                );
                (
                    MatchScore {
                        candidate_id: candidate.id,
                        score: comparison.score,
                    },
                    comparison.degraded,
                )
            })
            .buffered(concurrency)
            .collect()
            .await;

        let degraded = comparisons.iter().filter(|(_, degraded)| *degraded).count();
        let scores = comparisons.into_iter().map(|(score, _)| score).collect();

        RankingReport {
            matches: select_top_matches(scores, self.params.threshold, self.params.top_k),
            scored: candidates.len(),
            degraded,
        }
    }
}

/// Keeps scores strictly above `threshold`, sorts them descending (stable for
/// ties) and truncates to `top_k`. Non-finite scores are dropped.
pub fn select_top_matches(scores: Vec<MatchScore>, threshold: f64, top_k: usize) -> Vec<MatchScore> {
    let mut kept: Vec<MatchScore> = scores
        .into_iter()
        .filter(|m| m.score.is_finite() && m.score > threshold)
        .collect();
    kept.sort_by(|a, b| b.score.total_cmp(&a.score));
    kept.truncate(top_k);
    kept
}
