//! NATS subject hierarchy for build notifications
//!
//! All build notifications follow the hierarchical pattern:
//!
//! ```text
//! imagebuilder.{pipeline}.completed
//! ```
//!
//! This allows precise per-pipeline subscriptions
//! (`imagebuilder.host.completed`) and a global one (`imagebuilder.>`).

use crate::events::PipelineKind;

/// Root namespace for all build notification subjects
pub const IMAGEBUILDER_ROOT: &str = "imagebuilder";

/// Subject carrying completion events for one pipeline
pub fn completed(pipeline: PipelineKind) -> String {
    format!("{}.{}.completed", IMAGEBUILDER_ROOT, pipeline)
}

/// Wildcard subscription for every build notification
pub fn all_notifications() -> String {
    format!("{}.>", IMAGEBUILDER_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(PipelineKind::Host, "imagebuilder.host.completed")]
    #[test_case(PipelineKind::EksHost, "imagebuilder.eks-host.completed")]
    fn completed_subjects(pipeline: PipelineKind, expected: &str) {
        assert_eq!(completed(pipeline), expected);
    }

    #[test]
    fn global_wildcard_covers_every_pipeline() {
        assert_eq!(all_notifications(), "imagebuilder.>");
    }
}
