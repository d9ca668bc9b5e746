// src/db/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row as PgRow;

use super::Datastore;
use crate::models::{Candidate, MatchRecord, ProcessingState, Record, RecordId};
use crate::utils::db_connect::PgPool;

/// `Datastore` backed by `public.records` and `public.matches` (see `sql/schema.sql`).
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<Record> {
    let state: String = row.get("processing_state");
    Ok(Record {
        id: RecordId(row.get("id")),
        description: row.get("description"),
        state: state.parse()?,
    })
}

fn records_from_rows(rows: &[PgRow]) -> Result<Vec<Record>> {
    rows.iter().map(record_from_row).collect()
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn get_record(&self, id: RecordId) -> Result<Option<Record>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for get_record")?;
        let row = conn
            .query_opt(
                "SELECT id, description, processing_state FROM public.records WHERE id = $1",
                &[&id.0],
            )
            .await
            .context(format!("Failed to fetch record {}", id))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_candidates(&self, excluded: RecordId) -> Result<Vec<Candidate>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for list_candidates")?;
        let rows = conn
            .query(
                "SELECT id, description FROM public.records WHERE id <> $1 ORDER BY id",
                &[&excluded.0],
            )
            .await
            .context(format!("Failed to list candidates excluding {}", excluded))?;

        Ok(rows
            .iter()
            .map(|row| Candidate {
                id: RecordId(row.get("id")),
                description: row.get::<_, Option<String>>("description").unwrap_or_default(),
            })
            .collect())
    }

    async fn set_processing_state(&self, id: RecordId, state: ProcessingState) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for set_processing_state")?;
        let updated = conn
            .execute(
                "UPDATE public.records
                 SET processing_state = $1, updated_at = CURRENT_TIMESTAMP
                 WHERE id = $2",
                &[&state.as_str(), &id.0],
            )
            .await
            .context(format!("Failed to set record {} to {}", id, state))?;
        if updated == 0 {
            anyhow::bail!("Record {} not found while setting state {}", id, state);
        }
        debug!("Record {} -> {}", id, state);
        Ok(())
    }

    async fn list_records_by_state(&self, state: ProcessingState) -> Result<Vec<Record>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for list_records_by_state")?;
        let rows = conn
            .query(
                "SELECT id, description, processing_state FROM public.records
                 WHERE processing_state = $1 ORDER BY id",
                &[&state.as_str()],
            )
            .await
            .context(format!("Failed to list records in state {}", state))?;
        records_from_rows(&rows)
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<Record>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for list_stuck_processing")?;
        let rows = conn
            .query(
                "SELECT id, description, processing_state FROM public.records
                 WHERE processing_state = 'processing' AND updated_at < $1 ORDER BY id",
                &[&older_than],
            )
            .await
            .context("Failed to list stuck processing records")?;
        records_from_rows(&rows)
    }

    async fn delete_matches(&self, subject_id: RecordId) -> Result<u64> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for delete_matches")?;
        conn.execute(
            "DELETE FROM public.matches WHERE subject_id = $1",
            &[&subject_id.0],
        )
        .await
        .context(format!("Failed to delete matches for subject {}", subject_id))
    }

    async fn insert_matches(&self, matches: &[MatchRecord]) -> Result<u64> {
        if matches.is_empty() {
            return Ok(0);
        }

        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for insert_matches")?;

        let mut placeholders = Vec::with_capacity(matches.len());
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(matches.len() * 3);
        for (i, m) in matches.iter().enumerate() {
            let base = i * 3;
            placeholders.push(format!("(${}, ${}, ${})", base + 1, base + 2, base + 3));
            params.push(&m.subject_id.0);
            params.push(&m.candidate_id.0);
            params.push(&m.score);
        }

        let query = format!(
            "INSERT INTO public.matches (subject_id, candidate_id, match_score) VALUES {}",
            placeholders.join(", ")
        );

        conn.execute(query.as_str(), &params)
            .await
            .context(format!("Failed to insert {} matches", matches.len()))
    }

    async fn list_matches(&self, subject_id: RecordId) -> Result<Vec<MatchRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for list_matches")?;
        let rows = conn
            .query(
                "SELECT subject_id, candidate_id, match_score FROM public.matches
                 WHERE subject_id = $1 ORDER BY match_score DESC",
                &[&subject_id.0],
            )
            .await
            .context(format!("Failed to list matches for subject {}", subject_id))?;

        Ok(rows
            .iter()
            .map(|row| MatchRecord {
                subject_id: RecordId(row.get("subject_id")),
                candidate_id: RecordId(row.get("candidate_id")),
                score: row.get("match_score"),
            })
            .collect())
    }
}
