// src/matching/orchestrator.rs
//! Drives one matching run per subject.
//!
//! A run clears the subject's old matches, flags it `processing`, enumerates
//! candidates, ranks them and stores the new match set. Whatever happens in
//! between, the run ends by flagging the subject `done`. Failures are logged
//! and reported in the returned `RunOutcome`, never raised.

use anyhow::{Context, Result};
use futures::FutureExt;
use log::{error, info, warn};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::candidates::CandidateEnumerator;
use super::persistence::MatchStore;
use super::ranking::{RankingEngine, RankingParams};
use crate::db::Datastore;
use crate::models::{ProcessingState, RecordId};
use crate::oracle::OracleClient;
use crate::utils::matching_config::MatchingConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed {
        matches: usize,
        candidates: usize,
        degraded: usize,
        insert_failed: bool,
    },
    Failed {
        reason: String,
    },
    /// The run never started: another run for the same subject was already
    /// in flight, or no run slot could be acquired.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub subject_id: RecordId,
    pub status: RunStatus,
    /// Whether this run wrote the final `done` flag.
    pub finalized: bool,
    pub elapsed: Duration,
}

struct RunSummary {
    matches: usize,
    candidates: usize,
    degraded: usize,
    insert_failed: bool,
}

type InFlight = Arc<Mutex<HashSet<RecordId>>>;

/// Held for the duration of a run; releases the subject on drop.
struct SubjectLease {
    subject_id: RecordId,
    in_flight: InFlight,
}

impl SubjectLease {
    fn acquire(in_flight: &InFlight, subject_id: RecordId) -> Option<Self> {
        let mut held = in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !held.insert(subject_id) {
            return None;
        }
        Some(Self {
            subject_id,
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for SubjectLease {
    fn drop(&mut self) {
        let mut held = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        held.remove(&self.subject_id);
    }
}

pub struct MatchingOrchestrator {
    store: Arc<dyn Datastore>,
    enumerator: CandidateEnumerator,
    ranking: RankingEngine,
    matches: MatchStore,
    run_deadline: Duration,
    in_flight: InFlight,
}

impl MatchingOrchestrator {
    pub fn new(store: Arc<dyn Datastore>, oracle: OracleClient, config: &MatchingConfig) -> Self {
        Self {
            enumerator: CandidateEnumerator::new(store.clone()),
            ranking: RankingEngine::new(oracle, RankingParams::from(config)),
            matches: MatchStore::new(store.clone()),
            store,
            run_deadline: config.run_deadline,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_running(&self, subject_id: RecordId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&subject_id)
    }

    /// Runs matching for one subject to completion. Always returns an outcome.
    pub async fn run(&self, subject_id: RecordId, subject_text: &str) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let Some(_lease) = SubjectLease::acquire(&self.in_flight, subject_id) else {
            warn!(
                "[{}] Subject {} already has a run in flight, skipping",
                run_id, subject_id
            );
            return RunOutcome {
                run_id,
                subject_id,
                status: RunStatus::Skipped,
                finalized: false,
                elapsed: started.elapsed(),
            };
        };

        info!("[{}] --- RUN START for subject {} ---", run_id, subject_id);

        let execution = AssertUnwindSafe(self.execute(run_id, subject_id, subject_text))
            .catch_unwind()
            .await;

        let status = match execution {
            Ok(Ok(summary)) => RunStatus::Completed {
                matches: summary.matches,
                candidates: summary.candidates,
                degraded: summary.degraded,
                insert_failed: summary.insert_failed,
            },
            Ok(Err(e)) => {
                error!("[{}] Run for subject {} failed: {:#}", run_id, subject_id, e);
                RunStatus::Failed {
                    reason: format!("{:#}", e),
                }
            }
            Err(_) => {
                error!("[{}] Run for subject {} panicked", run_id, subject_id);
                RunStatus::Failed {
                    reason: "run panicked".to_string(),
                }
            }
        };

        let finalized = self.finalize(run_id, subject_id).await;

        let elapsed = started.elapsed();
        info!(
            "[{}] --- RUN COMPLETE for subject {} in {:.2?} ({:?}) ---",
            run_id, subject_id, elapsed, status
        );

        RunOutcome {
            run_id,
            subject_id,
            status,
            finalized,
            elapsed,
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        subject_id: RecordId,
        subject_text: &str,
    ) -> Result<RunSummary> {
        let cleared = self.matches.clear(subject_id).await?;
        info!("[{}] Cleared {} old matches for subject {}", run_id, cleared, subject_id);

        self.store
            .set_processing_state(subject_id, ProcessingState::Processing)
            .await
            .context("Failed to flag subject as processing")?;

        let scoring = async {
            let candidates = self.enumerator.enumerate(subject_id).await?;
            if candidates.is_empty() {
                info!("[{}] No other records to match against", run_id);
            }
            let report = self.ranking.rank(subject_text, &candidates).await;
            Ok::<_, anyhow::Error>((candidates.len(), report))
        };

        let (candidate_count, report) = tokio::time::timeout(self.run_deadline, scoring)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Run exceeded deadline of {}s before scoring finished",
                    self.run_deadline.as_secs()
                )
            })??;

        info!(
            "[{}] Found {} potential matches among {} candidates ({} degraded comparisons)",
            run_id,
            report.matches.len(),
            candidate_count,
            report.degraded
        );

        let replaced = self.matches.replace(subject_id, &report.matches).await?;

        Ok(RunSummary {
            matches: replaced.inserted as usize,
            candidates: candidate_count,
            degraded: report.degraded,
            insert_failed: replaced.insert_failed,
        })
    }

    async fn finalize(&self, run_id: Uuid, subject_id: RecordId) -> bool {
        match self
            .store
            .set_processing_state(subject_id, ProcessingState::Done)
            .await
        {
            Ok(()) => {
                info!("[{}] Marked subject {} as done", run_id, subject_id);
                true
            }
            Err(e) => {
                error!(
                    "[{}] CRITICAL - failed to mark subject {} as done, it may stay in processing: {:#}",
                    run_id, subject_id, e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatastore;
    use crate::oracle::{OracleError, OracleService};
    use async_trait::async_trait;

    struct FixedOracle(f64);

    #[async_trait]
    impl OracleService for FixedOracle {
        async fn generate(&self, _prompt: &str) -> Result<String, OracleError> {
            Ok(format!("{{\"similarity_score\": {}}}", self.0))
        }
    }

    struct PanickingOracle;

    #[async_trait]
    impl OracleService for PanickingOracle {
        async fn generate(&self, _prompt: &str) -> Result<String, OracleError> {
            panic!("oracle blew up");
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl OracleService for SlowOracle {
        async fn generate(&self, _prompt: &str) -> Result<String, OracleError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(r#"{"similarity_score": 0.9}"#.to_string())
        }
    }

    fn orchestrator(db: Arc<MemoryDatastore>, oracle: Arc<dyn OracleService>) -> MatchingOrchestrator {
        MatchingOrchestrator::new(db, OracleClient::new(oracle), &MatchingConfig::default())
    }

    #[tokio::test]
    async fn test_successful_run_marks_done() {
        let db = Arc::new(MemoryDatastore::new());
        let subject = db.add_record("subject").await;
        db.add_record("candidate").await;

        let outcome = orchestrator(db.clone(), Arc::new(FixedOracle(0.6)))
            .run(subject, "subject")
            .await;

        assert!(outcome.finalized);
        assert!(matches!(outcome.status, RunStatus::Completed { matches: 1, .. }));
        let record = db.get_record(subject).await.unwrap().unwrap();
        assert_eq!(record.state, ProcessingState::Done);
    }

    #[tokio::test]
    async fn test_concurrent_run_for_same_subject_is_skipped() {
        let db = Arc::new(MemoryDatastore::new());
        let subject = db.add_record("subject").await;
        let orchestrator = orchestrator(db, Arc::new(FixedOracle(0.6)));

        let _held = SubjectLease::acquire(&orchestrator.in_flight, subject).unwrap();
        assert!(orchestrator.is_running(subject));

        let outcome = orchestrator.run(subject, "subject").await;
        assert_eq!(outcome.status, RunStatus::Skipped);
        assert!(!outcome.finalized);
    }

    #[tokio::test]
    async fn test_panic_during_run_still_finalizes_and_releases_subject() {
        let db = Arc::new(MemoryDatastore::new());
        let subject = db.add_record("subject").await;
        db.add_record("candidate").await;
        let orchestrator = orchestrator(db.clone(), Arc::new(PanickingOracle));

        let outcome = orchestrator.run(subject, "subject").await;

        assert_eq!(
            outcome.status,
            RunStatus::Failed {
                reason: "run panicked".to_string()
            }
        );
        assert!(outcome.finalized);
        assert!(!orchestrator.is_running(subject));
        assert_eq!(
            db.get_record(subject).await.unwrap().unwrap().state,
            ProcessingState::Done
        );

        // The subject can be matched again after the panic.
        let rerun = orchestrator.run(subject, "subject").await;
        assert_ne!(rerun.status, RunStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fails_run_but_still_finalizes() {
        let db = Arc::new(MemoryDatastore::new());
        let subject = db.add_record("subject").await;
        db.add_record("candidate").await;

        let outcome = orchestrator(db.clone(), Arc::new(SlowOracle))
            .run(subject, "subject")
            .await;

        assert!(matches!(outcome.status, RunStatus::Failed { .. }));
        assert!(outcome.finalized);
        assert!(db.list_matches(subject).await.unwrap().is_empty());
        assert_eq!(
            db.get_record(subject).await.unwrap().unwrap().state,
            ProcessingState::Done
        );
    }
}
