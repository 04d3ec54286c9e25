//! Adversarial review hook.
//!
//! Before each checkpoint the pipeline asks the studio for a structured
//! critique of the work so far and drops it next to the artifacts as
//! `adversarial_review_<checkpoint>.md`, so the reviewer reads a second
//! opinion alongside the stage output. The hook is strictly best-effort: a
//! failed or timed-out critique is logged and the checkpoint proceeds
//! without one.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::envelope::{self, StageOutcome, best_effort};
use crate::layout::ArtifactLayout;
use crate::studio::{Studio, StudioRequest};

pub struct ReviewHook {
    studio: Arc<dyn Studio>,
    budget: Duration,
}

impl ReviewHook {
    /// `budget` is the recon timeout; critiques share it with the other
    /// pre-flight style probes rather than getting a stage budget of their own.
    pub fn new(studio: Arc<dyn Studio>, budget: Duration) -> Self {
        Self { studio, budget }
    }

    /// Produce the critique file for one checkpoint. Never fails the run.
    pub async fn critique(&self, layout: &ArtifactLayout, checkpoint: &str, context: String) {
        let path = layout.adversarial_review(checkpoint);
        let studio = self.studio.clone();
        let request = StudioRequest::new("recon", "adversarial_review")
            .with_subject(checkpoint)
            .with_instruction(critique_instruction(checkpoint, &context, layout))
            .with_artifact_dir(layout.root());

        let outcome =
            envelope::run_stage("recon", self.budget, move || studio.generate(&request)).await;

        match outcome {
            Ok(StageOutcome::Completed(text)) => {
                // The generator may have written the file itself
                if !path.exists() {
                    best_effort("save adversarial review", layout.write_text(&path, &text));
                }
                info!(checkpoint, path = %path.display(), "adversarial review complete");
            }
            Ok(StageOutcome::TimedOut) => {
                warn!(checkpoint, "adversarial review timed out, proceeding without critique");
            }
            Err(err) => {
                warn!(checkpoint, error = ?err, "adversarial review failed (non-fatal)");
            }
        }
    }
}

fn critique_instruction(checkpoint: &str, context: &str, layout: &ArtifactLayout) -> String {
    format!(
        "You are a hostile competitor's lead designer reviewing '{checkpoint}' output.\n\
         Find the weaknesses: derivative mechanics, math that won't certify,\n\
         art that won't survive a casino floor, claims the research doesn't back.\n\
         Context:\n{context}\n\n\
         Write a structured critique with a severity-ranked findings list and a\n\
         one-line verdict. Save it to {}.",
        layout.adversarial_review(checkpoint).display()
    )
}

/// First `limit` characters of a document, for bounded critique context.
pub fn excerpt(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::studio::TemplateStudio;
    use std::time::Instant;
    use tempfile::tempdir;

    struct FailingStudio;

    impl Studio for FailingStudio {
        fn generate(&self, _request: &StudioRequest) -> anyhow::Result<String> {
            anyhow::bail!("generator offline")
        }
    }

    struct SlowStudio;

    impl Studio for SlowStudio {
        fn generate(&self, _request: &StudioRequest) -> anyhow::Result<String> {
            std::thread::sleep(Duration::from_millis(400));
            Ok("late critique".to_string())
        }
    }

    fn layout() -> (tempfile::TempDir, ArtifactLayout) {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path(), "slug");
        layout.ensure_skeleton().unwrap();
        (dir, layout)
    }

    #[tokio::test]
    async fn test_critique_writes_review_file() {
        let (_dir, layout) = layout();
        let hook = ReviewHook::new(Arc::new(TemplateStudio::new()), Duration::from_secs(5));

        hook.critique(&layout, "post_research", "Theme: gold rush".to_string())
            .await;

        let path = layout.adversarial_review("post_research");
        assert!(path.is_file());
        assert!(!layout.read_text(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_critique_keeps_file_the_generator_wrote() {
        let (_dir, layout) = layout();
        let path = layout.adversarial_review("post_design_math");
        layout.write_text(&path, "critique from the generator").unwrap();

        let hook = ReviewHook::new(Arc::new(TemplateStudio::new()), Duration::from_secs(5));
        hook.critique(&layout, "post_design_math", String::new()).await;

        assert_eq!(
            layout.read_text(&path).unwrap(),
            "critique from the generator"
        );
    }

    #[tokio::test]
    async fn test_failed_critique_is_swallowed() {
        let (_dir, layout) = layout();
        let hook = ReviewHook::new(Arc::new(FailingStudio), Duration::from_secs(5));

        hook.critique(&layout, "post_art_review", String::new()).await;

        assert!(!layout.adversarial_review("post_art_review").exists());
    }

    #[tokio::test]
    async fn test_timed_out_critique_returns_promptly() {
        let (_dir, layout) = layout();
        let hook = ReviewHook::new(Arc::new(SlowStudio), Duration::from_millis(50));

        let start = Instant::now();
        hook.critique(&layout, "post_research", String::new()).await;

        assert!(start.elapsed() < Duration::from_millis(350));
        assert!(!layout.adversarial_review("post_research").exists());
    }

    #[test]
    fn test_excerpt_bounds_long_documents() {
        assert_eq!(excerpt("short", 100), "short");
        assert_eq!(excerpt("abcdef", 3), "abc");
        // Multibyte input truncates on character boundaries
        assert_eq!(excerpt("日本語のテキスト", 3), "日本語");
    }
}
