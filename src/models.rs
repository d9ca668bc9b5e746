// src/models.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a record in the `records` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Matching progress of a record. Failure collapses into `Done`; there is no
/// separate failed state visible to readers of the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Idle,
    Processing,
    Done,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Idle => "idle",
            ProcessingState::Processing => "processing",
            ProcessingState::Done => "done",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ProcessingState::Idle),
            "processing" => Ok(ProcessingState::Processing),
            "done" => Ok(ProcessingState::Done),
            other => Err(anyhow::anyhow!("Unknown processing state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub description: String,
    pub state: ProcessingState,
}

/// Read-only projection of a record used while scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: RecordId,
    pub description: String,
}

/// Score for one candidate within a single ranking run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub candidate_id: RecordId,
    pub score: f64,
}

/// Persisted row of a subject's match set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub subject_id: RecordId,
    pub candidate_id: RecordId,
    pub score: f64,
}

impl MatchRecord {
    pub fn from_score(subject_id: RecordId, scored: &MatchScore) -> Self {
        Self {
            subject_id,
            candidate_id: scored.candidate_id,
            score: scored.score,
        }
    }
}
