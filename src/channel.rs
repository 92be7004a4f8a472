//! Notification channel over NATS JetStream
//!
//! Durable fan-out channel carrying build-completion events from the
//! build system to the record handlers. JetStream gives at-least-once
//! delivery with redelivery of unacknowledged messages; no ordering is
//! guaranteed across messages, and the publisher is fire-and-forget
//! with respect to subscriber failures.

use async_nats::jetstream::{self, consumer, stream::Stream};
use async_nats::ConnectOptions;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{PublicationError, PublicationResult};
use crate::events::PipelineKind;
use crate::subjects;

/// Configuration for the notification channel connection
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// NATS server URLs
    pub servers: Vec<String>,
    /// Client name
    pub name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout
    pub request_timeout: Duration,
    /// Stream holding build notifications
    pub stream_name: String,
    /// How long undelivered notifications are retained
    pub max_age: Duration,
    /// NATS credentials file; the connection is anonymous when unset
    pub credentials_path: Option<PathBuf>,
    /// Refuse plaintext connections
    pub require_tls: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_string()],
            name: "ami-publication".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            stream_name: "IMAGEBUILDER_NOTIFICATIONS".to_string(),
            max_age: Duration::from_secs(14 * 24 * 60 * 60),
            credentials_path: None,
            require_tls: false,
        }
    }
}

/// Durable publish/subscribe channel for build notifications
#[derive(Clone)]
pub struct NotificationChannel {
    context: jetstream::Context,
    config: ChannelConfig,
}

impl NotificationChannel {
    /// Connect to NATS and open a JetStream context
    pub async fn connect(config: ChannelConfig) -> PublicationResult<Self> {
        let mut connect_options = ConnectOptions::new()
            .name(&config.name)
            .connection_timeout(config.connect_timeout)
            .request_timeout(Some(config.request_timeout))
            .require_tls(config.require_tls);

        if let Some(path) = &config.credentials_path {
            connect_options = connect_options.credentials_file(path).await.map_err(|e| {
                PublicationError::Configuration(format!(
                    "credentials file '{}': {e}",
                    path.display()
                ))
            })?;
        }

        let client = async_nats::connect_with_options(config.servers.join(","), connect_options)
            .await
            .map_err(|e| PublicationError::Channel(e.to_string()))?;

        info!("Connected to NATS at {:?}", config.servers);

        Ok(Self {
            context: jetstream::new(client),
            config,
        })
    }

    /// Wrap an existing client (used by tests against a local server)
    pub fn from_client(client: async_nats::Client, config: ChannelConfig) -> Self {
        Self {
            context: jetstream::new(client),
            config,
        }
    }

    /// Get the underlying JetStream context for advanced operations
    pub fn context(&self) -> &jetstream::Context {
        &self.context
    }

    /// Create or update the notification stream.
    ///
    /// Idempotent; provisioning calls this once per deployment, but the
    /// subscriber side also calls it defensively before binding.
    pub async fn ensure_stream(&self) -> PublicationResult<Stream> {
        let stream = self
            .context
            .get_or_create_stream(jetstream::stream::Config {
                name: self.config.stream_name.clone(),
                subjects: vec![subjects::all_notifications()],
                max_age: self.config.max_age,
                retention: jetstream::stream::RetentionPolicy::Limits,
                ..Default::default()
            })
            .await
            .map_err(|e| PublicationError::Channel(e.to_string()))?;

        debug!(stream = %self.config.stream_name, "Notification stream ready");
        Ok(stream)
    }

    /// Publish a message to a subject, fire-and-forget.
    ///
    /// The ack only confirms the stream stored the message; subscriber
    /// failures are handled by redelivery, never surfaced here.
    pub async fn publish<T>(&self, subject: &str, message: &T) -> PublicationResult<()>
    where
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)?;

        self.context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| PublicationError::Channel(e.to_string()))?
            .await
            .map_err(|e| PublicationError::Channel(e.to_string()))?;

        debug!("Published message to subject: {}", subject);
        Ok(())
    }

    /// Bind a durable pull consumer for one pipeline's completion events.
    ///
    /// Explicit acks: a message stays in the stream until the handler
    /// acknowledges it, so retry-exhausted events are redelivered.
    pub async fn completion_consumer(
        &self,
        pipeline: PipelineKind,
    ) -> PublicationResult<consumer::Consumer<consumer::pull::Config>> {
        let stream = self.ensure_stream().await?;

        let durable_name = format!("record-{}", pipeline);
        let consumer = stream
            .get_or_create_consumer(
                &durable_name,
                consumer::pull::Config {
                    durable_name: Some(durable_name.clone()),
                    filter_subject: subjects::completed(pipeline),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| PublicationError::Channel(e.to_string()))?;

        info!(
            pipeline = %pipeline,
            durable = %durable_name,
            "Bound completion consumer"
        );
        Ok(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ChannelConfig::default();

        assert_eq!(config.stream_name, "IMAGEBUILDER_NOTIFICATIONS");
        assert_eq!(config.name, "ami-publication");
        assert_eq!(config.servers, vec!["nats://localhost:4222".to_string()]);
        assert_eq!(config.credentials_path, None);
        assert!(!config.require_tls);
    }

    #[tokio::test]
    async fn missing_credentials_file_is_a_configuration_error() {
        let config = ChannelConfig {
            credentials_path: Some(PathBuf::from("/nonexistent/nats.creds")),
            ..ChannelConfig::default()
        };

        // The credentials file is read before any connection attempt,
        // so this fails without a reachable server.
        let result = NotificationChannel::connect(config).await;
        assert!(matches!(
            result,
            Err(PublicationError::Configuration(_))
        ));
    }
}
