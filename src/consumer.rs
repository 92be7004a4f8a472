//! Provisioning consumer boundary
//!
//! Provisioning reads the published pointer at deployment time. A
//! missing row or the sentinel value is a hard precondition failure:
//! the caller must abort rather than substitute a default image. The
//! published identifier is returned verbatim.

use tracing::{info, warn};

use crate::errors::{PublicationError, PublicationResult};
use crate::events::PipelineKind;
use crate::pointer::PointerStore;

/// Resolve the latest published artifact identifier for a pipeline.
///
/// # Errors
///
/// Returns [`PublicationError::Unpublished`] when the pointer row is
/// absent or still holds the sentinel, meaning no build has ever
/// completed successfully for this pipeline.
pub async fn resolve_artifact<S: PointerStore>(
    store: &S,
    pipeline: PipelineKind,
) -> PublicationResult<String> {
    let Some(pointer) = store.read(pipeline).await? else {
        warn!(pipeline = %pipeline, "Pointer row does not exist");
        return Err(PublicationError::Unpublished(pipeline.to_string()));
    };

    if !pointer.is_published() {
        warn!(pipeline = %pipeline, "Pointer still holds the sentinel");
        return Err(PublicationError::Unpublished(pipeline.to_string()));
    }

    info!(
        pipeline = %pipeline,
        artifact_id = %pointer.artifact_id,
        build_version = ?pointer.last_build_version,
        "Resolved published artifact"
    );
    Ok(pointer.artifact_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::{MemoryPointerStore, PointerUpdate};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_row_is_a_precondition_failure() {
        let store = MemoryPointerStore::new();

        let err = resolve_artifact(&store, PipelineKind::Host)
            .await
            .unwrap_err();

        assert!(matches!(err, PublicationError::Unpublished(_)));
    }

    #[tokio::test]
    async fn sentinel_row_is_rejected() {
        let store = MemoryPointerStore::new();
        store.seed(PipelineKind::Host).await.unwrap();

        let err = resolve_artifact(&store, PipelineKind::Host)
            .await
            .unwrap_err();

        assert!(matches!(err, PublicationError::Unpublished(_)));
    }

    #[tokio::test]
    async fn published_artifact_is_returned_verbatim() {
        let store = MemoryPointerStore::new();
        store
            .conditional_update(PipelineKind::Host, PointerUpdate::new("ami-0abc123", 9))
            .await
            .unwrap();

        let artifact = resolve_artifact(&store, PipelineKind::Host).await.unwrap();

        assert_eq!(artifact, "ami-0abc123");
    }
}
