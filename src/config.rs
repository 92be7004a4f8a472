//! Pipeline configuration
//!
//! Region, topic subjects, and pointer paths are explicit values passed
//! into the handler at construction rather than ambient environment
//! state, so handlers stay testable in isolation. An environment loader
//! is provided for deployment convenience only.

use serde::{Deserialize, Serialize};

use crate::errors::{PublicationError, PublicationResult};
use crate::events::PipelineKind;
use crate::subjects;

/// Configuration for one pipeline instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Which build pipeline this instance records for
    pub kind: PipelineKind,

    /// Subject the build system publishes completion events to
    pub subject: String,

    /// Path of the published pointer row in the store
    pub parameter_path: String,
}

impl PipelineConfig {
    /// Default configuration for a pipeline under an application namespace
    pub fn for_kind(application: &str, kind: PipelineKind) -> Self {
        Self {
            kind,
            subject: subjects::completed(kind),
            parameter_path: format!("/{}/{}/latest-ami-id", application, kind),
        }
    }
}

/// Configuration for the whole publication subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationConfig {
    /// Application namespace for pointer paths
    pub application: String,

    /// Deployment region artifacts are published in
    pub region: String,

    /// One entry per pipeline instance; the instances share no state
    pub pipelines: Vec<PipelineConfig>,
}

impl PublicationConfig {
    /// Build a configuration covering both pipeline instances
    pub fn new(application: impl Into<String>, region: impl Into<String>) -> Self {
        let application = application.into();
        let pipelines = PipelineKind::ALL
            .iter()
            .map(|kind| PipelineConfig::for_kind(&application, *kind))
            .collect();

        Self {
            application,
            region: region.into(),
            pipelines,
        }
    }

    /// Load application name and region from the environment.
    ///
    /// Reads `AMI_PUBLICATION_APPLICATION` and `AMI_PUBLICATION_REGION`.
    pub fn from_env() -> PublicationResult<Self> {
        let application = std::env::var("AMI_PUBLICATION_APPLICATION").map_err(|_| {
            PublicationError::Configuration("AMI_PUBLICATION_APPLICATION not set".to_string())
        })?;
        let region = std::env::var("AMI_PUBLICATION_REGION").map_err(|_| {
            PublicationError::Configuration("AMI_PUBLICATION_REGION not set".to_string())
        })?;

        Ok(Self::new(application, region))
    }

    /// Configuration for a single pipeline kind
    pub fn pipeline(&self, kind: PipelineKind) -> PublicationResult<&PipelineConfig> {
        self.pipelines
            .iter()
            .find(|p| p.kind == kind)
            .ok_or_else(|| {
                PublicationError::Configuration(format!("no pipeline configured for '{kind}'"))
            })
    }
}

impl Default for PublicationConfig {
    fn default() -> Self {
        Self::new("sev-snp-host", "eu-west-1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_covers_both_pipelines() {
        let config = PublicationConfig::default();

        assert_eq!(config.pipelines.len(), 2);
        assert!(config.pipeline(PipelineKind::Host).is_ok());
        assert!(config.pipeline(PipelineKind::EksHost).is_ok());
    }

    #[test]
    fn pipeline_paths_are_namespaced() {
        let config = PublicationConfig::new("myapp", "us-east-1");
        let host = config.pipeline(PipelineKind::Host).unwrap();
        let eks = config.pipeline(PipelineKind::EksHost).unwrap();

        assert_eq!(host.parameter_path, "/myapp/host/latest-ami-id");
        assert_eq!(eks.parameter_path, "/myapp/eks-host/latest-ami-id");
        assert_eq!(host.subject, "imagebuilder.host.completed");
    }
}
