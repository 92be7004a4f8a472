//! JetStream key-value pointer store
//!
//! Durable implementation backed by a NATS JetStream KV bucket. The
//! version-conditioned write is realized with the bucket's revision
//! CAS: read the entry, check the build-version predicate, then write
//! with the expected revision. A revision conflict means a concurrent
//! handler got there first; the entry is re-read and the predicate
//! re-checked, a bounded number of times.

use async_nats::jetstream;
use async_nats::jetstream::kv;
use tracing::{debug, warn};

use crate::errors::{PublicationError, PublicationResult};
use crate::events::PipelineKind;

use super::{candidate_is_newer, CasOutcome, PointerStore, PointerUpdate, PublishedPointer};

/// How many revision conflicts to absorb before reporting a transient error
const MAX_CAS_ATTEMPTS: u32 = 4;

/// Pointer store backed by a JetStream KV bucket
pub struct KvPointerStore {
    bucket: kv::Store,
    application: String,
}

impl KvPointerStore {
    /// Wrap an already-opened KV bucket
    pub fn new(bucket: kv::Store, application: impl Into<String>) -> Self {
        Self {
            bucket,
            application: application.into(),
        }
    }

    /// Open (or create) the pointer bucket on a JetStream context
    pub async fn open(
        context: &jetstream::Context,
        bucket_name: impl Into<String>,
        application: impl Into<String>,
    ) -> PublicationResult<Self> {
        let bucket = context
            .create_key_value(kv::Config {
                bucket: bucket_name.into(),
                history: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| PublicationError::Store(e.to_string()))?;

        Ok(Self::new(bucket, application))
    }

    /// KV key for one pipeline's pointer row
    fn key(&self, pipeline: PipelineKind) -> String {
        format!("{}.{}", self.application, pipeline)
    }

    async fn read_entry(
        &self,
        key: &str,
    ) -> PublicationResult<Option<(PublishedPointer, u64)>> {
        let entry = self
            .bucket
            .entry(key.to_string())
            .await
            .map_err(|e| PublicationError::Store(e.to_string()))?;

        let Some(entry) = entry else {
            return Ok(None);
        };

        let pointer: PublishedPointer = serde_json::from_slice(&entry.value)
            .map_err(|e| PublicationError::Deserialization(e.to_string()))?;

        Ok(Some((pointer, entry.revision)))
    }

    /// Write with revision CAS. Revision 0 requires that the key does
    /// not exist yet, which doubles as insert-if-absent. `Ok(false)`
    /// means a concurrent writer advanced the revision first; any
    /// other failure is surfaced with its real cause.
    async fn write_at_revision(
        &self,
        key: &str,
        pointer: &PublishedPointer,
        revision: u64,
    ) -> PublicationResult<bool> {
        let payload = serde_json::to_vec(pointer)
            .map_err(|e| PublicationError::Serialization(e.to_string()))?;

        match self
            .bucket
            .update(key.to_string(), payload.into(), revision)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_revision_conflict(&e) => Ok(false),
            Err(e) => Err(PublicationError::Store(e.to_string())),
        }
    }
}

/// The client collapses the server's wrong-last-sequence rejection
/// into `UpdateErrorKind::Other`, so the conflict is only visible in
/// the rendered message chain.
fn is_revision_conflict(error: &kv::UpdateError) -> bool {
    error.kind() == kv::UpdateErrorKind::Other
        && error.to_string().contains("wrong last sequence")
}

#[async_trait::async_trait]
impl PointerStore for KvPointerStore {
    async fn read(&self, pipeline: PipelineKind) -> PublicationResult<Option<PublishedPointer>> {
        let key = self.key(pipeline);
        Ok(self.read_entry(&key).await?.map(|(pointer, _)| pointer))
    }

    async fn seed(&self, pipeline: PipelineKind) -> PublicationResult<PublishedPointer> {
        let key = self.key(pipeline);

        for _ in 0..MAX_CAS_ATTEMPTS {
            if let Some((pointer, _)) = self.read_entry(&key).await? {
                return Ok(pointer);
            }

            let sentinel = PublishedPointer::sentinel();
            if self.write_at_revision(&key, &sentinel, 0).await? {
                debug!(pipeline = %pipeline, "Seeded sentinel pointer row");
                return Ok(sentinel);
            }
            // Lost the create race; re-read whatever won.
        }

        Err(PublicationError::Store(format!(
            "could not seed pointer row for '{pipeline}'"
        )))
    }

    async fn conditional_update(
        &self,
        pipeline: PipelineKind,
        candidate: PointerUpdate,
    ) -> PublicationResult<CasOutcome> {
        let key = self.key(pipeline);

        for attempt in 0..MAX_CAS_ATTEMPTS {
            let (stored_version, revision) = match self.read_entry(&key).await? {
                Some((pointer, revision)) => (pointer.last_build_version, revision),
                None => (None, 0),
            };

            if !candidate_is_newer(stored_version, candidate.build_version) {
                return Ok(CasOutcome::Rejected {
                    current_version: stored_version,
                });
            }

            let pointer = PublishedPointer {
                artifact_id: candidate.artifact_id.clone(),
                last_build_version: Some(candidate.build_version),
                updated_at: candidate.updated_at,
            };

            if self.write_at_revision(&key, &pointer, revision).await? {
                debug!(
                    pipeline = %pipeline,
                    build_version = candidate.build_version,
                    "Pointer updated"
                );
                return Ok(CasOutcome::Applied { pointer });
            }

            warn!(
                pipeline = %pipeline,
                build_version = candidate.build_version,
                attempt = attempt + 1,
                "Revision conflict on pointer update, re-reading"
            );
        }

        Err(PublicationError::Store(format!(
            "pointer CAS for '{pipeline}' lost {MAX_CAS_ATTEMPTS} revision races"
        )))
    }
}
