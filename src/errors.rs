//! Error types for the publication pipeline

use thiserror::Error;

/// Errors that can occur while recording or resolving published artifacts
#[derive(Debug, Error)]
pub enum PublicationError {
    /// Event failed validation and must not be retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Notification channel (NATS) error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Pointer store error
    #[error("Pointer store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation exceeded its wall-clock budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Retry budget exhausted; the channel's redelivery will try again
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PublicationError>,
    },

    /// No artifact has ever been published for the requested pipeline
    #[error("No published artifact for pipeline '{0}'")]
    Unpublished(String),
}

impl PublicationError {
    /// Whether a bounded retry inside the handler may succeed.
    ///
    /// Validation and serialization failures are terminal for the event;
    /// channel, store, and timeout failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PublicationError::Channel(_)
                | PublicationError::Store(_)
                | PublicationError::Timeout(_)
        )
    }
}

/// Result type for publication operations
pub type PublicationResult<T> = Result<T, PublicationError>;

impl From<async_nats::Error> for PublicationError {
    fn from(err: async_nats::Error) -> Self {
        PublicationError::Channel(err.to_string())
    }
}

impl From<serde_json::Error> for PublicationError {
    fn from(err: serde_json::Error) -> Self {
        PublicationError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PublicationError::Store("throttled".to_string()).is_transient());
        assert!(PublicationError::Channel("disconnected".to_string()).is_transient());
        assert!(PublicationError::Timeout("store call".to_string()).is_transient());

        assert!(!PublicationError::Validation("missing artifact".to_string()).is_transient());
        assert!(!PublicationError::Unpublished("host".to_string()).is_transient());
        assert!(!PublicationError::RetriesExhausted {
            attempts: 3,
            source: Box::new(PublicationError::Store("down".to_string())),
        }
        .is_transient());
    }
}
