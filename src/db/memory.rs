// src/db/memory.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::Datastore;
use crate::models::{Candidate, MatchRecord, ProcessingState, Record, RecordId};

#[derive(Debug, Clone)]
struct StoredRecord {
    record: Record,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<RecordId, StoredRecord>,
    matches: Vec<MatchRecord>,
    next_id: i64,
}

/// In-process datastore with the same per-call semantics as `PgDatastore`.
/// Candidates are enumerated in ascending id order.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    tables: RwLock<Tables>,
}

/// Seed file entry for `MemoryDatastore::from_seed_json`.
#[derive(Debug, Deserialize)]
pub struct SeedRecord {
    pub id: Option<i64>,
    pub description: String,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a JSON array of `{ "id"?: n, "description": "..." }`.
    pub async fn from_seed_json(json: &str) -> Result<Self> {
        let seeds: Vec<SeedRecord> =
            serde_json::from_str(json).context("Failed to parse seed records")?;
        let store = Self::new();
        for seed in seeds {
            match seed.id {
                Some(id) => {
                    store
                        .put_record(RecordId(id), &seed.description, ProcessingState::Idle)
                        .await
                }
                None => {
                    store.add_record(&seed.description).await;
                }
            }
        }
        Ok(store)
    }

    /// Adds a new `idle` record with the next free id.
    pub async fn add_record(&self, description: &str) -> RecordId {
        let mut tables = self.tables.write().await;
        tables.next_id += 1;
        let id = RecordId(tables.next_id);
        tables.records.insert(
            id,
            StoredRecord {
                record: Record {
                    id,
                    description: description.to_string(),
                    state: ProcessingState::Idle,
                },
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub async fn put_record(&self, id: RecordId, description: &str, state: ProcessingState) {
        let mut tables = self.tables.write().await;
        tables.next_id = tables.next_id.max(id.0);
        tables.records.insert(
            id,
            StoredRecord {
                record: Record {
                    id,
                    description: description.to_string(),
                    state,
                },
                updated_at: Utc::now(),
            },
        );
    }

    /// Overrides a record's last-update time; used to simulate long-stuck runs.
    pub async fn backdate_record(&self, id: RecordId, updated_at: DateTime<Utc>) {
        if let Some(stored) = self.tables.write().await.records.get_mut(&id) {
            stored.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_record(&self, id: RecordId) -> Result<Option<Record>> {
        let tables = self.tables.read().await;
        Ok(tables.records.get(&id).map(|stored| stored.record.clone()))
    }

    async fn list_candidates(&self, excluded: RecordId) -> Result<Vec<Candidate>> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .values()
            .filter(|stored| stored.record.id != excluded)
            .map(|stored| Candidate {
                id: stored.record.id,
                description: stored.record.description.clone(),
            })
            .collect())
    }

    async fn set_processing_state(&self, id: RecordId, state: ProcessingState) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .records
            .get_mut(&id)
            .with_context(|| format!("Record {} not found", id))?;
        stored.record.state = state;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn list_records_by_state(&self, state: ProcessingState) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .values()
            .filter(|stored| stored.record.state == state)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .values()
            .filter(|stored| {
                stored.record.state == ProcessingState::Processing
                    && stored.updated_at < older_than
            })
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn delete_matches(&self, subject_id: RecordId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.matches.len();
        tables.matches.retain(|m| m.subject_id != subject_id);
        Ok((before - tables.matches.len()) as u64)
    }

    async fn insert_matches(&self, matches: &[MatchRecord]) -> Result<u64> {
        let mut tables = self.tables.write().await;
        tables.matches.extend_from_slice(matches);
        Ok(matches.len() as u64)
    }

    async fn list_matches(&self, subject_id: RecordId) -> Result<Vec<MatchRecord>> {
        let tables = self.tables.read().await;
        let mut found: Vec<MatchRecord> = tables
            .matches
            .iter()
            .filter(|m| m.subject_id == subject_id)
            .copied()
            .collect();
        found.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(found)
    }
}
