pub mod candidates;
pub mod orchestrator;
pub mod persistence;
pub mod ranking;
pub mod worker;

pub use candidates::CandidateEnumerator;
pub use orchestrator::{MatchingOrchestrator, RunOutcome, RunStatus};
pub use persistence::MatchStore;
pub use ranking::{RankingEngine, RankingParams, RankingReport};
pub use worker::{MatchingWorker, TriggerAck};
