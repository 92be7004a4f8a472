//! Record service
//!
//! Binds one pipeline's durable completion consumer to its record
//! handler. Acknowledgment drives the channel's at-least-once contract:
//! a message is acked after the handler succeeds or fails terminally;
//! retry-exhausted messages are left unacked so the stream redelivers
//! them later. Deliveries for the same pipeline may be processed
//! concurrently with other service instances; no mutual exclusion is
//! assumed in-process.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::NotificationChannel;
use crate::config::PublicationConfig;
use crate::errors::{PublicationError, PublicationResult};
use crate::events::BuildCompletionEvent;
use crate::handler::RecordHandler;
use crate::pointer::PointerStore;

/// Create the sentinel pointer rows for every configured pipeline.
///
/// Called once at provisioning time; idempotent, so re-running a
/// deployment never clobbers a published artifact.
pub async fn seed_pointers<S: PointerStore>(
    store: &S,
    config: &PublicationConfig,
) -> PublicationResult<()> {
    for pipeline in &config.pipelines {
        let row = store.seed(pipeline.kind).await?;
        info!(
            pipeline = %pipeline.kind,
            published = row.is_published(),
            "Pointer row present"
        );
    }
    Ok(())
}

/// Subscription loop feeding one record handler
pub struct RecordService<S: PointerStore> {
    channel: NotificationChannel,
    handler: Arc<RecordHandler<S>>,
}

impl<S: PointerStore + 'static> RecordService<S> {
    pub fn new(channel: NotificationChannel, handler: Arc<RecordHandler<S>>) -> Self {
        Self { channel, handler }
    }

    /// Start consuming completion events for this handler's pipeline.
    ///
    /// Returns the task driving the loop; the task ends when the
    /// consumer's message stream ends.
    pub async fn run(self) -> PublicationResult<JoinHandle<()>> {
        let pipeline = self.handler.pipeline();
        let consumer = self.channel.completion_consumer(pipeline).await?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| PublicationError::Channel(e.to_string()))?;

        info!(pipeline = %pipeline, "Record service started");

        let handler = self.handler;
        let handle = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match message {
                    Ok(message) => {
                        Self::process_message(&handler, message).await;
                    }
                    Err(e) => {
                        warn!(pipeline = %pipeline, error = %e, "Consumer stream error");
                    }
                }
            }
            warn!(pipeline = %pipeline, "Record service stopped");
        });

        Ok(handle)
    }

    async fn process_message(
        handler: &RecordHandler<S>,
        message: async_nats::jetstream::Message,
    ) {
        let event: BuildCompletionEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                // Redelivery cannot fix a malformed payload; surface and ack.
                error!(
                    subject = %message.subject,
                    error = %e,
                    "Discarding undecodable notification"
                );
                Self::ack(&message).await;
                return;
            }
        };

        match handler.handle(&event).await {
            Ok(outcome) => {
                debug!(
                    pipeline = %event.pipeline,
                    build_version = event.build_version,
                    ?outcome,
                    "Notification processed"
                );
                Self::ack(&message).await;
            }
            Err(e @ PublicationError::Validation(_))
            | Err(e @ PublicationError::Serialization(_))
            | Err(e @ PublicationError::Deserialization(_)) => {
                // Terminal for this event: visible to operators, not retried.
                error!(
                    pipeline = %event.pipeline,
                    build_version = event.build_version,
                    error = %e,
                    "Terminal notification failure"
                );
                Self::ack(&message).await;
            }
            Err(e) => {
                // Leave unacked so the stream redelivers the event later.
                warn!(
                    pipeline = %event.pipeline,
                    build_version = event.build_version,
                    error = %e,
                    "Handler failed, awaiting redelivery"
                );
            }
        }
    }

    async fn ack(message: &async_nats::jetstream::Message) {
        if let Err(e) = message.ack().await {
            warn!(subject = %message.subject, error = %e, "Failed to ack message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PipelineKind;
    use crate::pointer::MemoryPointerStore;

    #[tokio::test]
    async fn seeding_covers_every_pipeline() {
        let store = MemoryPointerStore::new();
        let config = PublicationConfig::default();

        seed_pointers(&store, &config).await.unwrap();

        for kind in PipelineKind::ALL {
            let row = store.read(kind).await.unwrap().unwrap();
            assert!(!row.is_published());
        }
    }
}
