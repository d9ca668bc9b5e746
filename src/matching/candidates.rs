// src/matching/candidates.rs
use anyhow::{Context, Result};
use log::debug;
use std::sync::Arc;

use crate::db::Datastore;
use crate::models::{Candidate, RecordId};

/// Lists every record eligible for comparison against a subject.
#[derive(Clone)]
pub struct CandidateEnumerator {
    store: Arc<dyn Datastore>,
}

impl CandidateEnumerator {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// All records other than `subject_id`. An empty result is not an error;
    /// a datastore failure is.
    pub async fn enumerate(&self, subject_id: RecordId) -> Result<Vec<Candidate>> {
        let candidates = self
            .store
            .list_candidates(subject_id)
            .await
            .context(format!("Failed to enumerate candidates for subject {}", subject_id))?;
        debug!(
            "Enumerated {} candidates for subject {}",
            candidates.len(),
            subject_id
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatastore;

    #[tokio::test]
    async fn test_lone_record_has_no_candidates() {
        let store = Arc::new(MemoryDatastore::new());
        let only = store.add_record("the only one").await;

        let candidates = CandidateEnumerator::new(store).enumerate(only).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_projects_id_and_description() {
        let store = Arc::new(MemoryDatastore::new());
        let subject = store.add_record("subject").await;
        let other = store.add_record("other person").await;

        let candidates = CandidateEnumerator::new(store).enumerate(subject).await.unwrap();
        assert_eq!(
            candidates,
            vec![Candidate {
                id: other,
                description: "other person".to_string()
            }]
        );
    }
}
