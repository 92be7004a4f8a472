//! Record handler
//!
//! Turns a possibly-duplicated, possibly-reordered stream of
//! build-completion events into a monotone, idempotent update of one
//! published pointer. The handler is stateless; instances for the same
//! pipeline may run concurrently, and the only serialization point is
//! the store's conditional update. Idempotency falls out of the version
//! comparison rather than a separate dedup store: replaying an applied
//! event loses the comparison and becomes a no-op.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::errors::{PublicationError, PublicationResult};
use crate::events::{BuildCompletionEvent, BuildStatus};
use crate::pointer::{CasOutcome, PointerStore, PointerUpdate};

/// Bounded retry policy for transient store failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt
    pub base_delay: Duration,
    /// Backoff ceiling
    pub max_delay: Duration,
    /// Wall-clock budget for a single store call
    pub store_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for a zero-based attempt index
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// What a handler invocation did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The pointer now holds this event's artifact
    Applied { build_version: i64 },
    /// A version at least as new was already published; no-op.
    /// Expected for duplicate and out-of-order deliveries.
    Stale { current_version: Option<i64> },
    /// FAILURE events never mutate the pointer
    FailureDiscarded,
}

/// Stateless, idempotent processor for one pipeline's completion events
pub struct RecordHandler<S: PointerStore> {
    store: Arc<S>,
    config: PipelineConfig,
    retry: RetryPolicy,
}

impl<S: PointerStore> RecordHandler<S> {
    pub fn new(store: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The pipeline this handler records for
    pub fn pipeline(&self) -> crate::events::PipelineKind {
        self.config.kind
    }

    /// Process one delivery of a build-completion event.
    ///
    /// Validation failures are terminal and surface immediately; store
    /// failures are retried per the policy and, once exhausted, surface
    /// as [`PublicationError::RetriesExhausted`] so the channel's own
    /// redelivery provides a further retry window.
    pub async fn handle(&self, event: &BuildCompletionEvent) -> PublicationResult<RecordOutcome> {
        if event.pipeline != self.config.kind {
            return Err(PublicationError::Validation(format!(
                "handler for pipeline '{}' received event for '{}'",
                self.config.kind, event.pipeline
            )));
        }
        event.validate()?;

        if event.status == BuildStatus::Failure {
            info!(
                pipeline = %event.pipeline,
                build_version = event.build_version,
                "Build failed, pointer unchanged"
            );
            return Ok(RecordOutcome::FailureDiscarded);
        }

        // validate() guarantees the artifact is present on SUCCESS
        let artifact_id = event.artifact_id.clone().ok_or_else(|| {
            PublicationError::Validation("SUCCESS event lost its artifact_id".to_string())
        })?;

        let outcome = self
            .update_with_retry(PointerUpdate::new(artifact_id, event.build_version))
            .await;

        match &outcome {
            Ok(RecordOutcome::Applied { build_version }) => {
                info!(
                    pipeline = %event.pipeline,
                    build_version,
                    "Published pointer advanced"
                );
            }
            Ok(RecordOutcome::Stale { current_version }) => {
                debug!(
                    pipeline = %event.pipeline,
                    build_version = event.build_version,
                    ?current_version,
                    "Event superseded, pointer unchanged"
                );
            }
            Err(e) => {
                error!(
                    pipeline = %event.pipeline,
                    build_version = event.build_version,
                    error = %e,
                    "Failed to record published artifact"
                );
            }
            // Failures returned early above
            Ok(RecordOutcome::FailureDiscarded) => {}
        }

        outcome
    }

    async fn update_with_retry(
        &self,
        candidate: PointerUpdate,
    ) -> PublicationResult<RecordOutcome> {
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }

            let call = self
                .store
                .conditional_update(self.config.kind, candidate.clone());
            let result = match tokio::time::timeout(self.retry.store_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(PublicationError::Timeout(format!(
                    "pointer update for '{}' exceeded {:?}",
                    self.config.kind, self.retry.store_timeout
                ))),
            };

            match result {
                Ok(CasOutcome::Applied { pointer }) => {
                    return Ok(RecordOutcome::Applied {
                        build_version: pointer
                            .last_build_version
                            .unwrap_or(candidate.build_version),
                    });
                }
                Ok(CasOutcome::Rejected { current_version }) => {
                    // Equal versions with differing artifacts would be a
                    // build-system anomaly; first writer wins either way.
                    if current_version == Some(candidate.build_version) {
                        warn!(
                            pipeline = %self.config.kind,
                            build_version = candidate.build_version,
                            "Duplicate build version already published"
                        );
                    }
                    return Ok(RecordOutcome::Stale { current_version });
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        pipeline = %self.config.kind,
                        build_version = candidate.build_version,
                        attempt = attempt + 1,
                        error = %e,
                        "Transient store failure, will retry"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(PublicationError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| PublicationError::Store("unknown".to_string())),
            ),
        })
    }
}
