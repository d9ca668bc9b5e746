// src/matching/persistence.rs
use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;

use crate::db::Datastore;
use crate::models::{MatchRecord, MatchScore, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceOutcome {
    pub deleted: u64,
    pub inserted: u64,
    /// The delete went through but the new batch did not; the subject is
    /// left with an empty match set.
    pub insert_failed: bool,
}

/// Owns the delete-then-insert replacement of a subject's match set.
#[derive(Clone)]
pub struct MatchStore {
    store: Arc<dyn Datastore>,
}

impl MatchStore {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    pub async fn clear(&self, subject_id: RecordId) -> Result<u64> {
        self.store
            .delete_matches(subject_id)
            .await
            .context(format!("Failed to clear matches for subject {}", subject_id))
    }

    /// Replaces the subject's match set with `ranked`.
    ///
    /// A failed delete aborts before anything is inserted. A failed insert is
    /// logged and reported in the outcome; the deleted rows are not restored.
    pub async fn replace(&self, subject_id: RecordId, ranked: &[MatchScore]) -> Result<ReplaceOutcome> {
        let deleted = self.clear(subject_id).await?;

        if ranked.is_empty() {
            info!("Subject {}: cleared {} old matches, no new matches", subject_id, deleted);
            return Ok(ReplaceOutcome {
                deleted,
                ..Default::default()
            });
        }

        let rows: Vec<MatchRecord> = ranked
            .iter()
            .map(|scored| MatchRecord::from_score(subject_id, scored))
            .collect();

        match self.store.insert_matches(&rows).await {
            Ok(inserted) => {
                info!(
                    "Subject {}: replaced {} old matches with {} new matches",
                    subject_id, deleted, inserted
                );
                Ok(ReplaceOutcome {
                    deleted,
                    inserted,
                    insert_failed: false,
                })
            }
            Err(e) => {
                error!(
                    "Subject {}: failed to insert {} matches after clearing old set: {:#}",
                    subject_id,
                    rows.len(),
                    e
                );
                Ok(ReplaceOutcome {
                    deleted,
                    inserted: 0,
                    insert_failed: true,
                })
            }
        }
    }

    pub async fn list(&self, subject_id: RecordId) -> Result<Vec<MatchRecord>> {
        self.store
            .list_matches(subject_id)
            .await
            .context(format!("Failed to list matches for subject {}", subject_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatastore;

    fn scored(id: i64, score: f64) -> MatchScore {
        MatchScore {
            candidate_id: RecordId(id),
            score,
        }
    }

    #[tokio::test]
    async fn test_replace_with_empty_clears_set() {
        let db = Arc::new(MemoryDatastore::new());
        let store = MatchStore::new(db.clone());
        let subject = RecordId(1);
        store.replace(subject, &[scored(2, 0.9)]).await.unwrap();

        let outcome = store.replace(subject, &[]).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.inserted, 0);
        assert!(store.list(subject).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_supersedes_previous_set() {
        let db = Arc::new(MemoryDatastore::new());
        let store = MatchStore::new(db.clone());
        let subject = RecordId(1);
        store
            .replace(subject, &[scored(2, 0.9), scored(3, 0.8), scored(4, 0.7)])
            .await
            .unwrap();

        store.replace(subject, &[scored(5, 0.6), scored(3, 0.4)]).await.unwrap();

        let mut stored: Vec<(i64, f64)> = store
            .list(subject)
            .await
            .unwrap()
            .iter()
            .map(|m| (m.candidate_id.0, m.score))
            .collect();
        stored.sort_by_key(|(id, _)| *id);
        assert_eq!(stored, vec![(3, 0.4), (5, 0.6)]);
    }

    #[tokio::test]
    async fn test_replace_leaves_other_subjects_alone() {
        let db = Arc::new(MemoryDatastore::new());
        let store = MatchStore::new(db.clone());
        store.replace(RecordId(1), &[scored(2, 0.9)]).await.unwrap();
        store.replace(RecordId(2), &[scored(1, 0.5)]).await.unwrap();

        store.replace(RecordId(1), &[]).await.unwrap();

        assert_eq!(store.list(RecordId(2)).await.unwrap().len(), 1);
    }
}
