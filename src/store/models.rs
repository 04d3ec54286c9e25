//! Typed records for the shared job and review store.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::errors::StoreError;

/// Lifecycle status of one pipeline job.
///
/// Transitions are `queued -> running -> complete | failed`; terminal
/// statuses never change again except through data surgery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::InvalidColumn {
                column: "status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// One pipeline job as stored in the `jobs` table.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub title: String,
    /// Submitted game idea, JSON exactly as received.
    pub params: String,
    pub status: JobStatus,
    /// Human-readable label of the stage currently in flight.
    pub current_stage: String,
    pub game_slug: Option<String>,
    pub output_dir: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Resolution state of one checkpoint review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(StoreError::InvalidColumn {
                column: "status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// One checkpoint review as stored in the `reviews` table.
///
/// A pending row is what a worker blocks on; a reviewer session (CLI or
/// dashboard) resolves it.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRecord {
    pub id: String,
    pub job_id: String,
    /// Checkpoint name, e.g. `post_research`.
    pub checkpoint: String,
    pub title: String,
    pub summary: String,
    /// Most recent artifact paths, job-root-relative, for the reviewer.
    pub files: Vec<String>,
    pub status: ReviewStatus,
    pub feedback: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl ReviewRecord {
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }

    /// The decision, once one exists.
    pub fn decision(&self) -> Option<bool> {
        match self.status {
            ReviewStatus::Pending => None,
            ReviewStatus::Approved => Some(true),
            ReviewStatus::Rejected => Some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_job_status_rejects_unknown() {
        let err = "paused".parse::<JobStatus>().unwrap_err();
        match err {
            StoreError::InvalidColumn { column, value } => {
                assert_eq!(column, "status");
                assert_eq!(value, "paused");
            }
            other => panic!("expected InvalidColumn, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Running.is_active());
    }

    #[test]
    fn test_review_status_round_trip() {
        for status in [
            ReviewStatus::Pending,
            ReviewStatus::Approved,
            ReviewStatus::Rejected,
        ] {
            let parsed: ReviewStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_review_decision() {
        let mut review = ReviewRecord {
            id: "r1".into(),
            job_id: "j1".into(),
            checkpoint: "post_research".into(),
            title: "Post Research".into(),
            summary: "".into(),
            files: vec![],
            status: ReviewStatus::Pending,
            feedback: None,
            created_at: "".into(),
            resolved_at: None,
        };
        assert!(review.is_pending());
        assert_eq!(review.decision(), None);

        review.status = ReviewStatus::Rejected;
        assert_eq!(review.decision(), Some(false));
    }
}
