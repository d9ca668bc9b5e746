// src/oracle/mod.rs
pub mod config;
pub mod gemini;
pub mod parse;
pub mod prompt;

use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use thiserror::Error;

pub use config::OracleConfig;
pub use gemini::GeminiService;
pub use parse::ScoreParseError;

/// Transport-level failure talking to the oracle service.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unreadable oracle envelope: {0}")]
    Envelope(String),
    #[error("oracle returned no text")]
    EmptyResponse,
    #[error("{0}")]
    Other(String),
}

/// Why a single comparison degraded to a zero score.
#[derive(Debug, Error)]
pub enum ScoreFailure {
    #[error("oracle call failed: {0}")]
    Transport(#[from] OracleError),
    #[error("oracle reply unusable: {0}")]
    Parse(#[from] ScoreParseError),
}

/// External text-in/text-out service that judges similarity.
#[async_trait]
pub trait OracleService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Result of one comparison. `degraded` is set when a failure was folded into
/// a zero score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub score: f64,
    pub degraded: bool,
}

/// Scores pairs of descriptions through an `OracleService`.
///
/// Never fails: empty input short-circuits to `0.0` without a call, and any
/// transport or parse failure is logged and yields `0.0`. There is no retry.
#[derive(Clone)]
pub struct OracleClient {
    service: Arc<dyn OracleService>,
}

impl OracleClient {
    pub fn new(service: Arc<dyn OracleService>) -> Self {
        Self { service }
    }

    pub async fn score(&self, text_a: &str, text_b: &str) -> f64 {
        self.compare(text_a, text_b).await.score
    }

    pub async fn compare(&self, text_a: &str, text_b: &str) -> Comparison {
        if text_a.trim().is_empty() || text_b.trim().is_empty() {
            return Comparison {
                score: 0.0,
                degraded: false,
            };
        }

        match self.try_score(text_a, text_b).await {
            Ok(score) => {
                debug!("Oracle similarity score: {:.3}", score);
                Comparison {
                    score,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!("Similarity comparison degraded to 0.0: {}", e);
                Comparison {
                    score: 0.0,
                    degraded: true,
                }
            }
        }
    }

    async fn try_score(&self, text_a: &str, text_b: &str) -> Result<f64, ScoreFailure> {
        let prompt = prompt::build_similarity_prompt(text_a, text_b);
        let reply = self.service.generate(&prompt).await?;
        parse::parse_similarity_score(&reply).map_err(|e| {
            debug!("Raw oracle reply: {}", reply);
            ScoreFailure::from(e)
        })
    }
}
