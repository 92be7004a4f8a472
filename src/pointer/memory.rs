//! In-memory pointer store
//!
//! Backs tests and local runs. The whole map sits behind one mutex, so
//! the read-compare-write inside `conditional_update` is atomic and the
//! per-key linearizability contract holds trivially.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::errors::PublicationResult;
use crate::events::PipelineKind;

use super::{candidate_is_newer, CasOutcome, PointerStore, PointerUpdate, PublishedPointer};

/// Pointer store keeping all rows in process memory
#[derive(Debug, Default)]
pub struct MemoryPointerStore {
    rows: Mutex<HashMap<PipelineKind, PublishedPointer>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PointerStore for MemoryPointerStore {
    async fn read(&self, pipeline: PipelineKind) -> PublicationResult<Option<PublishedPointer>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(&pipeline).cloned())
    }

    async fn seed(&self, pipeline: PipelineKind) -> PublicationResult<PublishedPointer> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let row = rows
            .entry(pipeline)
            .or_insert_with(PublishedPointer::sentinel);
        Ok(row.clone())
    }

    async fn conditional_update(
        &self,
        pipeline: PipelineKind,
        candidate: PointerUpdate,
    ) -> PublicationResult<CasOutcome> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);

        let stored = rows.get(&pipeline).and_then(|row| row.last_build_version);
        if !candidate_is_newer(stored, candidate.build_version) {
            return Ok(CasOutcome::Rejected {
                current_version: stored,
            });
        }

        let pointer = PublishedPointer {
            artifact_id: candidate.artifact_id,
            last_build_version: Some(candidate.build_version),
            updated_at: candidate.updated_at,
        };
        rows.insert(pipeline, pointer.clone());

        Ok(CasOutcome::Applied { pointer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test]
    async fn read_of_missing_row_is_none() {
        let store = MemoryPointerStore::new();
        assert_eq!(store.read(PipelineKind::Host).await.unwrap(), None);
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let store = MemoryPointerStore::new();

        let first = store.seed(PipelineKind::Host).await.unwrap();
        assert!(!first.is_published());

        // Apply a real update, then seed again: the update must survive.
        store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-a", 1))
            .await
            .unwrap();
        let second = store.seed(PipelineKind::Host).await.unwrap();
        assert_eq!(second.artifact_id, "ami-a");
    }

    #[tokio::test]
    async fn update_creates_absent_row() {
        let store = MemoryPointerStore::new();

        let outcome = store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-a", 1))
            .await
            .unwrap();

        assert!(outcome.is_applied());
        let pointer = store.read(PipelineKind::Host).await.unwrap().unwrap();
        assert_eq!(pointer.artifact_id, "ami-a");
        assert_eq!(pointer.last_build_version, Some(1));
    }

    #[tokio::test]
    async fn stale_update_is_rejected() {
        let store = MemoryPointerStore::new();

        store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-c", 3))
            .await
            .unwrap();
        let outcome = store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-b", 2))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CasOutcome::Rejected {
                current_version: Some(3)
            }
        );
        let pointer = store.read(PipelineKind::Host).await.unwrap().unwrap();
        assert_eq!(pointer.artifact_id, "ami-c");
    }

    #[tokio::test]
    async fn equal_version_is_rejected() {
        let store = MemoryPointerStore::new();

        store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-a", 1))
            .await
            .unwrap();
        let outcome = store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-a", 1))
            .await
            .unwrap();

        assert!(!outcome.is_applied());
    }

    #[tokio::test]
    async fn pipelines_are_independent() {
        let store = MemoryPointerStore::new();

        store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-host", 5))
            .await
            .unwrap();

        assert_eq!(store.read(PipelineKind::EksHost).await.unwrap(), None);
        let outcome = store
            .conditional_update(PipelineKind::EksHost, PointerUpdate::new("ami-eks", 1))
            .await
            .unwrap();
        assert!(outcome.is_applied());
    }

    #[tokio::test]
    async fn store_survives_a_poisoned_lock() {
        let store = Arc::new(MemoryPointerStore::new());
        store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-a", 1))
            .await
            .unwrap();

        // Poison the mutex by panicking while holding the guard.
        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.rows.lock().unwrap();
            panic!("poisoning the pointer map");
        })
        .join();

        let pointer = store.read(PipelineKind::Host).await.unwrap().unwrap();
        assert_eq!(pointer.artifact_id, "ami-a");

        let outcome = store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-b", 2))
            .await
            .unwrap();
        assert!(outcome.is_applied());
    }

    #[tokio::test]
    async fn concurrent_updates_converge_to_max_version() {
        let store = Arc::new(MemoryPointerStore::new());

        let mut tasks = Vec::new();
        for version in [5_i64, 7] {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .conditional_update(
                        PipelineKind::Host,
                        PointerUpdate::new(format!("ami-v{version}"), version),
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let pointer = store.read(PipelineKind::Host).await.unwrap().unwrap();
        assert_eq!(pointer.artifact_id, "ami-v7");
        assert_eq!(pointer.last_build_version, Some(7));
    }
}
