// src/db/mod.rs
//! Datastore seam for records and match sets.
//!
//! Every method is a single call that either succeeds or fails as a unit; no
//! multi-call transactions are assumed by the matching pipeline.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Candidate, MatchRecord, ProcessingState, Record, RecordId};

pub use memory::MemoryDatastore;
pub use postgres::PgDatastore;

#[async_trait]
pub trait Datastore: Send + Sync {
    // ── Records ──

    async fn get_record(&self, id: RecordId) -> Result<Option<Record>>;

    /// Every record except `excluded`, projected to id and description.
    async fn list_candidates(&self, excluded: RecordId) -> Result<Vec<Candidate>>;

    async fn set_processing_state(&self, id: RecordId, state: ProcessingState) -> Result<()>;

    async fn list_records_by_state(&self, state: ProcessingState) -> Result<Vec<Record>>;

    /// Records whose flag has been `processing` since before `older_than`.
    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Record>>;

    // ── Matches ──

    /// Returns the number of rows removed.
    async fn delete_matches(&self, subject_id: RecordId) -> Result<u64>;

    /// Inserts the whole batch in one call.
    async fn insert_matches(&self, matches: &[MatchRecord]) -> Result<u64>;

    async fn list_matches(&self, subject_id: RecordId) -> Result<Vec<MatchRecord>>;
}
