//! Build-completion events emitted by the image build pipelines
//!
//! One event is emitted per pipeline execution, success or failure. The
//! notification channel may deliver an event more than once and in any
//! order, so events carry a monotone `build_version` that the record
//! handler conditions its pointer update on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{PublicationError, PublicationResult};

/// The image build pipelines this system publishes artifacts for.
///
/// The two pipelines are fully independent: separate notification
/// topics, separate pointer rows, no shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineKind {
    /// General-purpose hardened host image
    Host,
    /// Host image for EKS orchestrator nodes
    EksHost,
}

impl PipelineKind {
    /// All known pipeline kinds
    pub const ALL: [PipelineKind; 2] = [PipelineKind::Host, PipelineKind::EksHost];

    /// Stable token used in subjects and pointer paths
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Host => "host",
            PipelineKind::EksHost => "eks-host",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a build pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Success,
    Failure,
}

/// Notification emitted once per build pipeline execution
///
/// Unknown additional fields in the wire payload are ignored on
/// deserialization; the build system is free to extend the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCompletionEvent {
    /// Which build pipeline produced this event
    pub pipeline: PipelineKind,

    /// Whether the run produced a usable artifact
    pub status: BuildStatus,

    /// Identifier of the produced image; present iff `status` is SUCCESS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,

    /// Monotone counter assigned by the build system at trigger time
    pub build_version: i64,

    /// Deployment region the artifact is valid in
    pub region: String,

    /// When the build system emitted the event. Producers may omit
    /// this field; it then defaults to the time of decoding.
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

impl BuildCompletionEvent {
    /// Create a success event
    pub fn success(
        pipeline: PipelineKind,
        artifact_id: impl Into<String>,
        build_version: i64,
        region: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            status: BuildStatus::Success,
            artifact_id: Some(artifact_id.into()),
            build_version,
            region: region.into(),
            emitted_at: Utc::now(),
        }
    }

    /// Create a failure event
    pub fn failure(pipeline: PipelineKind, build_version: i64, region: impl Into<String>) -> Self {
        Self {
            pipeline,
            status: BuildStatus::Failure,
            artifact_id: None,
            build_version,
            region: region.into(),
            emitted_at: Utc::now(),
        }
    }

    /// Key under which duplicate deliveries of this event coincide
    pub fn idempotency_key(&self) -> (PipelineKind, i64) {
        (self.pipeline, self.build_version)
    }

    /// Check the event invariant: `artifact_id` is set iff SUCCESS.
    ///
    /// A violation is terminal for the event; it is never retried.
    pub fn validate(&self) -> PublicationResult<()> {
        match (self.status, &self.artifact_id) {
            (BuildStatus::Success, None) => Err(PublicationError::Validation(format!(
                "SUCCESS event for pipeline '{}' at version {} has no artifact_id",
                self.pipeline, self.build_version
            ))),
            (BuildStatus::Failure, Some(_)) => Err(PublicationError::Validation(format!(
                "FAILURE event for pipeline '{}' at version {} carries an artifact_id",
                self.pipeline, self.build_version
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn success_event_carries_artifact() {
        let event =
            BuildCompletionEvent::success(PipelineKind::Host, "ami-0abc123", 7, "eu-west-1");

        assert_eq!(event.status, BuildStatus::Success);
        assert_eq!(event.artifact_id.as_deref(), Some("ami-0abc123"));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn failure_event_has_no_artifact() {
        let event = BuildCompletionEvent::failure(PipelineKind::EksHost, 3, "eu-west-1");

        assert_eq!(event.status, BuildStatus::Failure);
        assert!(event.artifact_id.is_none());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn success_without_artifact_is_invalid() {
        let mut event =
            BuildCompletionEvent::success(PipelineKind::Host, "ami-0abc123", 7, "eu-west-1");
        event.artifact_id = None;

        assert!(matches!(
            event.validate(),
            Err(PublicationError::Validation(_))
        ));
    }

    #[test]
    fn failure_with_artifact_is_invalid() {
        let mut event = BuildCompletionEvent::failure(PipelineKind::Host, 3, "eu-west-1");
        event.artifact_id = Some("ami-0abc123".to_string());

        assert!(matches!(
            event.validate(),
            Err(PublicationError::Validation(_))
        ));
    }

    #[test]
    fn idempotency_key_ignores_payload() {
        let a = BuildCompletionEvent::success(PipelineKind::Host, "ami-a", 5, "eu-west-1");
        let b = BuildCompletionEvent::success(PipelineKind::Host, "ami-b", 5, "us-east-1");

        assert_eq!(a.idempotency_key(), b.idempotency_key());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{
            "pipeline": "host",
            "status": "SUCCESS",
            "artifact_id": "ami-0abc123",
            "build_version": 12,
            "region": "eu-west-1",
            "emitted_at": "2025-06-01T12:00:00Z",
            "build_arn": "arn:aws:imagebuilder:eu-west-1:123:image/foo",
            "extra": {"nested": true}
        }"#;

        let event: BuildCompletionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.pipeline, PipelineKind::Host);
        assert_eq!(event.build_version, 12);
    }

    #[test]
    fn minimal_payload_decodes() {
        // Producers are only required to send these five fields.
        let json = r#"{
            "pipeline": "host",
            "status": "SUCCESS",
            "artifact_id": "ami-0abc123",
            "build_version": 7,
            "region": "eu-west-1"
        }"#;

        let event: BuildCompletionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.pipeline, PipelineKind::Host);
        assert_eq!(event.build_version, 7);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn status_wire_format_is_uppercase() {
        let event = BuildCompletionEvent::failure(PipelineKind::EksHost, 1, "eu-west-1");
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"FAILURE\""));
        assert!(json.contains("\"eks-host\""));
    }
}
