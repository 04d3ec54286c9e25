//! Content generation seam.
//!
//! Stages never call a model or image service directly; they build a
//! [`StudioRequest`] and hand it to whichever [`Studio`] the process was
//! configured with. [`CommandStudio`] shells out to an external generator
//! command; [`TemplateStudio`] produces deterministic offline documents so
//! the whole pipeline runs end to end with no external services.

mod command;
mod template;

pub use command::CommandStudio;
pub use template::TemplateStudio;

use std::path::PathBuf;

/// One generation request from a stage.
#[derive(Debug, Clone)]
pub struct StudioRequest {
    /// Stage issuing the request (`research`, `design`, ...).
    pub stage: String,
    /// Which document is being asked for (`market_report`, `gdd`, ...).
    pub label: String,
    /// What the document is about, usually the game theme.
    pub subject: String,
    /// Full instruction text handed to the generator.
    pub instruction: String,
    /// Directory the stage will write resulting artifacts into.
    pub artifact_dir: PathBuf,
}

impl StudioRequest {
    pub fn new(stage: &str, label: &str) -> Self {
        Self {
            stage: stage.to_string(),
            label: label.to_string(),
            subject: String::new(),
            instruction: String::new(),
            artifact_dir: PathBuf::new(),
        }
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }
}

/// A content generator the pipeline delegates to.
///
/// Implementations are called from inside the stage envelope on a blocking
/// thread. They may take arbitrarily long and must not install their own
/// timeout: the envelope owns the clock, and an implementation that gives up
/// early would turn an abandonable stage into a failed one.
pub trait Studio: Send + Sync {
    fn generate(&self, request: &StudioRequest) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = StudioRequest::new("research", "market_report")
            .with_subject("gold rush")
            .with_instruction("Write the report.")
            .with_artifact_dir("/tmp/out/01_research");

        assert_eq!(request.stage, "research");
        assert_eq!(request.label, "market_report");
        assert_eq!(request.subject, "gold rush");
        assert_eq!(request.instruction, "Write the report.");
        assert_eq!(request.artifact_dir, PathBuf::from("/tmp/out/01_research"));
    }
}
