//! Typed error hierarchy for the slotsmith executor.
//!
//! Three top-level enums cover the three subsystems:
//! - `EnvelopeError` — stage work unit failures surfaced by the envelope
//! - `StoreError` — job/review store failures
//! - `GateError` — checkpoint gate channel failures

use thiserror::Error;

/// Errors surfaced by the stage invocation envelope.
///
/// A timeout is deliberately not represented here: the envelope reports it as
/// a [`StageOutcome::TimedOut`](crate::envelope::StageOutcome) value so the
/// driver can continue with whatever partial state the stage produced.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Stage {stage} work unit panicked")]
    Panicked { stage: String },
}

impl EnvelopeError {
    /// The stage this error originated from.
    pub fn stage(&self) -> &str {
        match self {
            EnvelopeError::Stage { stage, .. } => stage,
            EnvelopeError::Panicked { stage } => stage,
        }
    }
}

/// Errors from the shared job + review store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: std::path::PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Migration failed: {0}")]
    Migration(#[source] rusqlite::Error),

    #[error("Job {id} not found")]
    JobNotFound { id: String },

    #[error("Review {id} not found")]
    ReviewNotFound { id: String },

    #[error("Invalid {column} value '{value}'")]
    InvalidColumn { column: String, value: String },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the checkpoint gate's approval channels.
///
/// `Remote` triggers the fallback to the synchronous prompt; `WaitExpired` is
/// resolved inside the gate by recording a non-approval. Neither ever fails a
/// job on its own.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Remote approval channel failed at checkpoint {name}: {source}")]
    Remote {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Approval wait expired after {waited_secs}s at checkpoint {name}")]
    WaitExpired { name: String, waited_secs: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_error_stage_carries_name_and_source() {
        let err = EnvelopeError::Stage {
            stage: "research".to_string(),
            source: anyhow::anyhow!("model endpoint unreachable"),
        };
        assert_eq!(err.stage(), "research");
        assert!(err.to_string().contains("research"));
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn envelope_error_panicked_is_matchable() {
        let err = EnvelopeError::Panicked {
            stage: "production".to_string(),
        };
        assert!(matches!(err, EnvelopeError::Panicked { .. }));
        assert_eq!(err.stage(), "production");
    }

    #[test]
    fn store_error_open_failed_carries_path() {
        use std::path::PathBuf;
        let path = PathBuf::from("/var/lib/slotsmith/studio.db");
        let err = StoreError::OpenFailed {
            path: path.clone(),
            source: rusqlite::Error::InvalidQuery,
        };
        match &err {
            StoreError::OpenFailed { path: p, .. } => assert_eq!(p, &path),
            _ => panic!("Expected OpenFailed variant"),
        }
    }

    #[test]
    fn store_error_job_not_found_carries_id() {
        let err = StoreError::JobNotFound {
            id: "job-1".to_string(),
        };
        match &err {
            StoreError::JobNotFound { id } => assert_eq!(id, "job-1"),
            _ => panic!("Expected JobNotFound"),
        }
        assert!(err.to_string().contains("job-1"));
    }

    #[test]
    fn store_error_variants_are_distinct() {
        let job_err = StoreError::JobNotFound { id: "a".into() };
        let review_err = StoreError::ReviewNotFound { id: "a".into() };
        assert!(matches!(job_err, StoreError::JobNotFound { .. }));
        assert!(!matches!(job_err, StoreError::ReviewNotFound { .. }));
        assert!(matches!(review_err, StoreError::ReviewNotFound { .. }));
    }

    #[test]
    fn gate_error_wait_expired_carries_duration() {
        let err = GateError::WaitExpired {
            name: "post_art_review".to_string(),
            waited_secs: 7200,
        };
        match &err {
            GateError::WaitExpired { waited_secs, .. } => assert_eq!(*waited_secs, 7200),
            _ => panic!("Expected WaitExpired"),
        }
        assert!(err.to_string().contains("7200"));
    }

    #[test]
    fn gate_error_converts_from_anyhow() {
        let err: GateError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, GateError::Other(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        let env_err = EnvelopeError::Panicked { stage: "x".into() };
        assert_std_error(&env_err);
        let store_err = StoreError::LockPoisoned;
        assert_std_error(&store_err);
        let gate_err = GateError::WaitExpired {
            name: "x".into(),
            waited_secs: 1,
        };
        assert_std_error(&gate_err);
    }
}
