//! AMI publication pipeline
//!
//! The asynchronous path from "an image build finished" to "the latest
//! validated image identifier is durably recorded". Build pipelines
//! publish completion events to a durable NATS channel; stateless
//! record handlers turn that at-least-once, unordered stream into a
//! monotone pointer per pipeline; provisioning reads the pointer and
//! refuses to run against the sentinel.
//!
//! Two independent pipeline instances (general-purpose host image and
//! EKS orchestrator-node host image) run side by side, sharing no state.

pub mod channel;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod events;
pub mod handler;
pub mod pointer;
pub mod service;
pub mod subjects;

// Re-export commonly used types
pub use channel::{ChannelConfig, NotificationChannel};
pub use config::{PipelineConfig, PublicationConfig};
pub use consumer::resolve_artifact;
pub use errors::{PublicationError, PublicationResult};
pub use events::{BuildCompletionEvent, BuildStatus, PipelineKind};
pub use handler::{RecordHandler, RecordOutcome, RetryPolicy};
pub use pointer::{
    CasOutcome, KvPointerStore, MemoryPointerStore, PointerStore, PointerUpdate, PublishedPointer,
    SENTINEL_ARTIFACT_ID,
};
pub use service::{seed_pointers, RecordService};
