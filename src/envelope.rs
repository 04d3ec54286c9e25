//! Stage execution envelope: run stage work on a detached worker thread with
//! a wall-clock budget.
//!
//! The envelope never cancels work. When the budget expires the caller gets
//! control back as [`StageOutcome::TimedOut`] and the worker thread runs on
//! unobserved; whatever it writes later lands in state slots the downstream
//! checkpoint may already have sealed. Failures inside the work are captured
//! and re-raised exactly once, and nothing here retries.

use std::time::Duration;
use tracing::warn;

use crate::errors::EnvelopeError;

/// What the caller got back within the stage budget.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Completed(T),
    /// Budget expired before the worker finished. The work is still running.
    TimedOut,
}

impl<T> StageOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            StageOutcome::Completed(value) => Some(value),
            StageOutcome::TimedOut => None,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, StageOutcome::TimedOut)
    }
}

/// Run `work` on the blocking pool and wait for it at most `budget`.
///
/// On timeout the join handle is dropped, which detaches the worker rather
/// than aborting it.
pub async fn run_stage<T, F>(
    stage: &str,
    budget: Duration,
    work: F,
) -> Result<StageOutcome<T>, EnvelopeError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);

    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(Ok(value))) => Ok(StageOutcome::Completed(value)),
        Ok(Ok(Err(source))) => Err(EnvelopeError::Stage {
            stage: stage.to_string(),
            source,
        }),
        // The handle is never aborted, so a join error means the work panicked
        Ok(Err(_join)) => Err(EnvelopeError::Panicked {
            stage: stage.to_string(),
        }),
        Err(_elapsed) => {
            warn!(
                stage,
                budget_secs = budget.as_secs(),
                "stage exceeded its budget, abandoning the worker thread"
            );
            Ok(StageOutcome::TimedOut)
        }
    }
}

/// Run a side effect that must not take the pipeline down. Errors are logged
/// and swallowed; the caller gets `None`.
pub fn best_effort<T>(label: &str, result: anyhow::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(label, error = ?err, "non-fatal step failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn test_completed_value_passes_through() {
        let outcome = run_stage("research", Duration::from_secs(5), || Ok(42u32))
            .await
            .unwrap();
        assert_eq!(outcome.completed(), Some(42));
    }

    #[tokio::test]
    async fn test_error_is_captured_with_stage_name() {
        let result: Result<StageOutcome<()>, _> =
            run_stage("design", Duration::from_secs(5), || {
                anyhow::bail!("simulation diverged")
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.stage(), "design");
        match err {
            EnvelopeError::Stage { source, .. } => {
                assert!(source.to_string().contains("simulation diverged"));
            }
            other => panic!("expected Stage error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_returns_control_promptly() {
        let start = Instant::now();
        let outcome = run_stage("production", Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_millis(400));
            Ok(())
        })
        .await
        .unwrap();

        assert!(outcome.is_timed_out());
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_abandoned_work_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let outcome = run_stage("research", Duration::from_millis(50), move || {
            std::thread::sleep(Duration::from_millis(250));
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        assert!(outcome.is_timed_out());
        assert!(!finished.load(Ordering::SeqCst));

        // No cancellation: the detached worker completes on its own schedule
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_panicked() {
        let result: Result<StageOutcome<()>, _> =
            run_stage("mood_board", Duration::from_secs(5), || {
                panic!("palette generator crashed")
            })
            .await;

        match result.unwrap_err() {
            EnvelopeError::Panicked { stage } => assert_eq!(stage, "mood_board"),
            other => panic!("expected Panicked error, got {other:?}"),
        }
    }

    #[test]
    fn test_best_effort_swallows_errors() {
        assert_eq!(best_effort("ok step", anyhow::Ok(7)), Some(7));
        let failing: anyhow::Result<u32> = Err(anyhow::anyhow!("disk full"));
        assert_eq!(best_effort("failing step", failing), None);
    }
}
