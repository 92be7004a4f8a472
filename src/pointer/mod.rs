//! Published pointer storage
//!
//! One `PublishedPointer` row exists per pipeline, holding the latest
//! validated artifact identifier. The row is created with a sentinel
//! value at provisioning time and mutated only through the conditional
//! update below, which applies a candidate iff its build version is
//! strictly greater than the stored one. That single compare-and-swap
//! is what recovers ordering correctness from an at-least-once,
//! unordered notification channel: stale and duplicate deliveries lose
//! the version comparison and become no-ops.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PublicationResult;
use crate::events::PipelineKind;

mod kv;
mod memory;

pub use kv::KvPointerStore;
pub use memory::MemoryPointerStore;

/// Reserved value meaning "no artifact has ever been published".
///
/// Distinguishable from any real image identifier; written only at row
/// creation, never by a build success.
pub const SENTINEL_ARTIFACT_ID: &str = "n/a";

/// Latest published artifact for one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPointer {
    /// Currently published identifier, or the sentinel
    pub artifact_id: String,

    /// Highest build version that has ever updated this row.
    /// `None` until the first successful publication.
    pub last_build_version: Option<i64>,

    /// Timestamp of the last successful update
    pub updated_at: DateTime<Utc>,
}

impl PublishedPointer {
    /// The sentinel row written at provisioning time
    pub fn sentinel() -> Self {
        Self {
            artifact_id: SENTINEL_ARTIFACT_ID.to_string(),
            last_build_version: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether this row holds a real artifact identifier
    pub fn is_published(&self) -> bool {
        self.artifact_id != SENTINEL_ARTIFACT_ID
    }
}

/// Candidate write produced by the record handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerUpdate {
    pub artifact_id: String,
    pub build_version: i64,
    pub updated_at: DateTime<Utc>,
}

impl PointerUpdate {
    pub fn new(artifact_id: impl Into<String>, build_version: i64) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            build_version,
            updated_at: Utc::now(),
        }
    }
}

/// Result of a conditional pointer update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The candidate was newer and is now the published pointer
    Applied { pointer: PublishedPointer },
    /// A version at least as new was already applied; nothing changed.
    /// This is the expected outcome for duplicates and stale events.
    Rejected { current_version: Option<i64> },
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied { .. })
    }
}

/// Durable key-value storage for published pointers
///
/// Implementations must make `conditional_update` linearizable per
/// pipeline: concurrent updates for the same pipeline never both apply
/// when their versions conflict. The conditional update is the sole
/// mutation path; rows are never deleted by this subsystem.
#[async_trait]
pub trait PointerStore: Send + Sync {
    /// Read the current pointer, or `None` if the row was never created
    async fn read(&self, pipeline: PipelineKind) -> PublicationResult<Option<PublishedPointer>>;

    /// Create the sentinel row if it does not exist yet.
    ///
    /// Idempotent: a second call (or a call racing a real update) is a
    /// no-op and returns the row that won.
    async fn seed(&self, pipeline: PipelineKind) -> PublicationResult<PublishedPointer>;

    /// Apply `candidate` iff its build version is strictly greater than
    /// the stored `last_build_version` (an absent or sentinel row loses
    /// to any version). Creates the row when absent.
    async fn conditional_update(
        &self,
        pipeline: PipelineKind,
        candidate: PointerUpdate,
    ) -> PublicationResult<CasOutcome>;
}

/// Version predicate shared by every store implementation.
///
/// A candidate applies only when strictly newer than the stored version;
/// an uninitialized row compares as minus infinity.
pub(crate) fn candidate_is_newer(stored: Option<i64>, candidate_version: i64) -> bool {
    match stored {
        None => true,
        Some(current) => candidate_version > current,
    }
}
