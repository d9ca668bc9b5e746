// src/matching/worker.rs
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use uuid::Uuid;

use super::orchestrator::{MatchingOrchestrator, RunOutcome, RunStatus};
use crate::models::{Record, RecordId};

/// Returned to the trigger caller as soon as a run is queued.
#[derive(Debug, Clone)]
pub struct TriggerAck {
    pub subject_id: RecordId,
    pub submitted_at: DateTime<Utc>,
    abort: AbortHandle,
}

impl TriggerAck {
    /// Cancels the run. A run aborted mid-flight may leave its subject flagged
    /// `processing`.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Bounded pool of background matching runs.
///
/// `submit` never waits for a run slot; queued runs block on the semaphore
/// inside their own task. Runs that finished since the last call are reaped
/// and logged on every `submit` and `pending`, so a caller that never drains
/// does not accumulate outcomes.
pub struct MatchingWorker {
    orchestrator: Arc<MatchingOrchestrator>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<RunOutcome>>,
}

impl MatchingWorker {
    pub fn new(orchestrator: Arc<MatchingOrchestrator>, max_concurrent_runs: usize) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Queues a run for `subject_id` and returns immediately. Must be called
    /// from within a tokio runtime.
    pub fn submit(&self, subject_id: RecordId, subject_text: String) -> TriggerAck {
        let mut tasks = self.lock_tasks();
        reap_finished(&mut tasks);
        self.spawn_run(&mut tasks, subject_id, subject_text)
    }

    pub fn submit_record(&self, record: &Record) -> TriggerAck {
        self.submit(record.id, record.description.clone())
    }

    /// Queues one run per record under a single lock, so none of the batch is
    /// reaped before `drain` collects it.
    pub fn submit_all(&self, records: &[Record]) -> Vec<TriggerAck> {
        let mut tasks = self.lock_tasks();
        reap_finished(&mut tasks);
        records
            .iter()
            .map(|record| self.spawn_run(&mut tasks, record.id, record.description.clone()))
            .collect()
    }

    /// Runs still queued or in flight.
    pub fn pending(&self) -> usize {
        let mut tasks = self.lock_tasks();
        reap_finished(&mut tasks);
        tasks.len()
    }

    /// Waits for every submitted run that has not been reaped yet and returns
    /// their outcomes in completion order.
    pub async fn drain(&self) -> Vec<RunOutcome> {
        self.drain_with(|_| {}).await
    }

    /// Like `drain`, calling `on_complete` as each run finishes.
    pub async fn drain_with<F>(&self, mut on_complete: F) -> Vec<RunOutcome>
    where
        F: FnMut(&RunOutcome),
    {
        let mut tasks = std::mem::take(&mut *self.lock_tasks());
        let mut outcomes = Vec::with_capacity(tasks.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    on_complete(&outcome);
                    outcomes.push(outcome);
                }
                Err(e) => log_join_error(&e),
            }
        }
        outcomes
    }

    /// Aborts all queued and running runs and collects whatever finished.
    pub async fn shutdown(&self) -> Vec<RunOutcome> {
        self.lock_tasks().abort_all();
        self.drain().await
    }

    fn spawn_run(
        &self,
        tasks: &mut JoinSet<RunOutcome>,
        subject_id: RecordId,
        subject_text: String,
    ) -> TriggerAck {
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();

        let abort = tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(
                        "Run slot unavailable for subject {} ({}), not starting run",
                        subject_id, e
                    );
                    return RunOutcome {
                        run_id: Uuid::new_v4(),
                        subject_id,
                        status: RunStatus::Skipped,
                        finalized: false,
                        elapsed: Duration::ZERO,
                    };
                }
            };
            orchestrator.run(subject_id, &subject_text).await
        });

        debug!("Queued matching run for subject {}", subject_id);
        TriggerAck {
            subject_id,
            submitted_at: Utc::now(),
            abort,
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, JoinSet<RunOutcome>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn reap_finished(tasks: &mut JoinSet<RunOutcome>) {
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Ok(outcome) => match &outcome.status {
                RunStatus::Completed { matches, .. } => info!(
                    "[{}] Reaped run for subject {}: {} matches (finalized: {})",
                    outcome.run_id, outcome.subject_id, matches, outcome.finalized
                ),
                RunStatus::Failed { reason } => warn!(
                    "[{}] Reaped failed run for subject {}: {} (finalized: {})",
                    outcome.run_id, outcome.subject_id, reason, outcome.finalized
                ),
                RunStatus::Skipped => debug!(
                    "[{}] Reaped skipped run for subject {}",
                    outcome.run_id, outcome.subject_id
                ),
            },
            Err(e) => log_join_error(&e),
        }
    }
}

fn log_join_error(e: &JoinError) {
    if e.is_cancelled() {
        warn!("A matching run was cancelled before completing");
    } else {
        error!("A matching run task failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Datastore, MemoryDatastore};
    use crate::models::ProcessingState;
    use crate::oracle::{OracleClient, OracleError, OracleService};
    use crate::utils::matching_config::MatchingConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks the peak number of overlapping oracle calls.
    #[derive(Default)]
    struct GaugedOracle {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl OracleService for GaugedOracle {
        async fn generate(&self, _prompt: &str) -> Result<String, OracleError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(r#"{"similarity_score": 0.5}"#.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_are_bounded_and_all_finish_done() {
        let db = Arc::new(MemoryDatastore::new());
        let mut ids = Vec::new();
        for i in 0..6 {
            ids.push(db.add_record(&format!("person {}", i)).await);
        }

        let oracle = Arc::new(GaugedOracle::default());
        let config = MatchingConfig {
            oracle_concurrency: 1,
            ..MatchingConfig::default()
        };
        let orchestrator = Arc::new(MatchingOrchestrator::new(
            db.clone(),
            OracleClient::new(oracle.clone()),
            &config,
        ));
        let worker = MatchingWorker::new(orchestrator, 2);

        let mut records = Vec::new();
        for id in &ids {
            records.push(db.get_record(*id).await.unwrap().unwrap());
        }
        let acks = worker.submit_all(&records);
        assert_eq!(acks.len(), 6);
        assert_eq!(worker.pending(), 6);

        let outcomes = worker.drain().await;
        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().all(|o| o.finalized));
        assert!(oracle.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(worker.pending(), 0);

        for id in ids {
            let record = db.get_record(id).await.unwrap().unwrap();
            assert_eq!(record.state, ProcessingState::Done);
            assert_eq!(db.list_matches(id).await.unwrap().len(), 5);
        }
    }

    fn worker_with(db: Arc<MemoryDatastore>, oracle: Arc<GaugedOracle>, slots: usize) -> MatchingWorker {
        let orchestrator = Arc::new(MatchingOrchestrator::new(
            db,
            OracleClient::new(oracle),
            &MatchingConfig::default(),
        ));
        MatchingWorker::new(orchestrator, slots)
    }

    #[tokio::test]
    async fn test_finished_runs_are_reaped_without_drain() {
        let db = Arc::new(MemoryDatastore::new());
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(db.add_record(&format!("person {}", i)).await);
        }
        let worker = worker_with(db.clone(), Arc::new(GaugedOracle::default()), 2);

        let mut acks = Vec::new();
        for id in &ids {
            acks.push(worker.submit(*id, format!("subject {}", id)));
        }
        while !acks.iter().all(TriggerAck::is_finished) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(worker.pending(), 0);
        assert!(worker.drain().await.is_empty());
        for id in ids {
            assert_eq!(
                db.get_record(id).await.unwrap().unwrap().state,
                ProcessingState::Done
            );
        }

        // A later submit reaps whatever finished before it and keeps only itself.
        let ack = worker.submit(RecordId(1), "again".to_string());
        while !ack.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        worker.submit(RecordId(2), "again".to_string());
        assert!(worker.pending() <= 1);
        worker.drain().await;
        assert_eq!(worker.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_run_never_touches_its_subject() {
        let db = Arc::new(MemoryDatastore::new());
        let first = db.add_record("first").await;
        let second = db.add_record("second").await;
        let worker = worker_with(db.clone(), Arc::new(GaugedOracle::default()), 1);

        worker.submit(first, "first".to_string());
        let ack = worker.submit(second, "second".to_string());
        ack.abort();

        let outcomes = worker.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].subject_id, first);
        assert!(ack.is_finished());
        assert_eq!(
            db.get_record(second).await.unwrap().unwrap().state,
            ProcessingState::Idle
        );
        assert!(db.list_matches(second).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_pool_skips_instead_of_running_unbounded() {
        let db = Arc::new(MemoryDatastore::new());
        let subject = db.add_record("subject").await;
        db.add_record("candidate").await;
        let oracle = Arc::new(GaugedOracle::default());
        let worker = worker_with(db.clone(), oracle.clone(), 1);

        worker.permits.close();
        worker.submit(subject, "subject".to_string());

        let outcomes = worker.drain().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, RunStatus::Skipped);
        assert!(!outcomes[0].finalized);
        assert_eq!(oracle.peak.load(Ordering::SeqCst), 0);
        assert_eq!(
            db.get_record(subject).await.unwrap().unwrap().state,
            ProcessingState::Idle
        );
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_queued() {
        let worker = worker_with(Arc::new(MemoryDatastore::new()), Arc::new(GaugedOracle::default()), 1);
        assert!(worker.shutdown().await.is_empty());
    }
}
