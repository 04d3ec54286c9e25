//! SQLite-backed job and review store shared across processes.
//!
//! One row per job, one row per checkpoint review. A worker process writes
//! status and blocks on pending reviews; a reviewer session (the `reviews` /
//! `review` commands, or a dashboard reading the same file) resolves them.
//! WAL mode plus a busy timeout absorb the cross-process contention; every
//! mutation is a single auto-committed row write.

mod models;

pub use models::{JobRecord, JobStatus, ReviewRecord, ReviewStatus};

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::errors::StoreError;

/// Error recorded on jobs reaped by the staleness sweep. Kept byte-identical
/// to what existing dashboards match on.
pub const STALE_JOB_ERROR: &str = "Timed out — exceeded maximum pipeline duration";

/// Async-safe handle to the studio database.
///
/// Wraps `StudioDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<StudioDb>>,
}

impl DbHandle {
    pub fn new(db: StudioDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&StudioDb) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|_| StoreError::Other(anyhow::anyhow!("DB task panicked")))?
    }

    /// Acquire the database mutex synchronously. Used where blocking is
    /// acceptable: startup sweeps, one-shot CLI commands, and tests. Not for
    /// hot async paths.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, StudioDb>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

pub struct StudioDb {
    conn: Connection,
}

impl StudioDb {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn
            .busy_timeout(Duration::from_millis(5000))
            .map_err(StoreError::Migration)?;
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StoreError::Migration)?;
        // WAL lets a dashboard read while a worker writes
        self.conn
            .query_row("PRAGMA journal_mode=WAL", [], |_row| Ok(()))
            .map_err(StoreError::Migration)?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    params TEXT NOT NULL DEFAULT '{}',
                    status TEXT NOT NULL DEFAULT 'queued',
                    current_stage TEXT NOT NULL DEFAULT 'Initializing',
                    output_dir TEXT,
                    error TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS reviews (
                    id TEXT PRIMARY KEY,
                    job_id TEXT NOT NULL REFERENCES jobs(id),
                    stage TEXT NOT NULL,
                    title TEXT NOT NULL,
                    summary TEXT NOT NULL DEFAULT '',
                    files TEXT NOT NULL DEFAULT '[]',
                    status TEXT NOT NULL DEFAULT 'pending',
                    feedback TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    resolved_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
                CREATE INDEX IF NOT EXISTS idx_reviews_job ON reviews(job_id);
                CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status);
                ",
            )
            .map_err(StoreError::Migration)?;

        // Additive migrations (columns are nullable, safe to re-run).
        // Only "duplicate column" errors are ignored — anything else propagates.
        match self
            .conn
            .execute("ALTER TABLE jobs ADD COLUMN game_slug TEXT", [])
        {
            Ok(_) => {}
            Err(e) if e.to_string().contains("duplicate column") => {}
            Err(e) => return Err(StoreError::Migration(e)),
        }

        Ok(())
    }

    // ── Job CRUD ──────────────────────────────────────────────────────

    pub fn create_job(&self, id: &str, title: &str, params_json: &str) -> Result<JobRecord, StoreError> {
        self.conn
            .execute(
                "INSERT INTO jobs (id, title, params) VALUES (?1, ?2, ?3)",
                params![id, title, params_json],
            )
            .context("Failed to insert job")?;
        self.require_job(id)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, params, status, current_stage, game_slug, output_dir, error, created_at, completed_at
                 FROM jobs WHERE id = ?1",
            )
            .context("Failed to prepare get_job")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(JobRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    params: row.get(2)?,
                    status: row.get(3)?,
                    current_stage: row.get(4)?,
                    game_slug: row.get(5)?,
                    output_dir: row.get(6)?,
                    error: row.get(7)?,
                    created_at: row.get(8)?,
                    completed_at: row.get(9)?,
                })
            })
            .context("Failed to query job")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read job row")?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    pub fn require_job(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.get_job(id)?.ok_or_else(|| StoreError::JobNotFound {
            id: id.to_string(),
        })
    }

    /// Most recent jobs first.
    pub fn list_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, params, status, current_stage, game_slug, output_dir, error, created_at, completed_at
                 FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .context("Failed to prepare list_jobs")?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(JobRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    params: row.get(2)?,
                    status: row.get(3)?,
                    current_stage: row.get(4)?,
                    game_slug: row.get(5)?,
                    output_dir: row.get(6)?,
                    error: row.get(7)?,
                    created_at: row.get(8)?,
                    completed_at: row.get(9)?,
                })
            })
            .context("Failed to query jobs")?;
        let mut jobs = Vec::new();
        for row in rows {
            let r = row.context("Failed to read job row")?;
            jobs.push(r.into_record()?);
        }
        Ok(jobs)
    }

    /// Update status, stamping `completed_at` when the status is terminal.
    pub fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<JobRecord, StoreError> {
        let affected = if status.is_terminal() {
            self.conn
                .execute(
                    "UPDATE jobs SET status = ?1, error = ?2, completed_at = datetime('now') WHERE id = ?3",
                    params![status.as_str(), error, id],
                )
                .context("Failed to update job status")?
        } else {
            self.conn
                .execute(
                    "UPDATE jobs SET status = ?1, error = ?2 WHERE id = ?3",
                    params![status.as_str(), error, id],
                )
                .context("Failed to update job status")?
        };
        if affected == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        self.require_job(id)
    }

    pub fn mark_running(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.set_status(id, JobStatus::Running, None)
    }

    pub fn mark_complete(&self, id: &str) -> Result<JobRecord, StoreError> {
        self.set_status(id, JobStatus::Complete, None)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<JobRecord, StoreError> {
        self.set_status(id, JobStatus::Failed, Some(error))
    }

    /// Update the human-readable stage label. A missing job is a no-op:
    /// stage visibility is a UX concern, not a correctness concern.
    pub fn set_stage(&self, id: &str, stage: &str) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE jobs SET current_stage = ?1 WHERE id = ?2",
                params![stage, id],
            )
            .context("Failed to update job stage")?;
        Ok(())
    }

    pub fn set_output(
        &self,
        id: &str,
        game_slug: &str,
        output_dir: &str,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE jobs SET game_slug = ?1, output_dir = ?2 WHERE id = ?3",
                params![game_slug, output_dir, id],
            )
            .context("Failed to update job output location")?;
        Ok(())
    }

    /// Mark still-queued/running jobs older than the staleness threshold as
    /// failed. Liveness is inferred purely from age; there is no heartbeat.
    pub fn reap_stale(&self, staleness_minutes: u64) -> Result<Vec<JobRecord>, StoreError> {
        let cutoff = format!("-{} minutes", staleness_minutes);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id FROM jobs WHERE status IN ('queued', 'running')
                 AND created_at < datetime('now', ?1)",
            )
            .context("Failed to prepare stale job query")?;
        let ids: Vec<String> = stmt
            .query_map(params![cutoff], |row| row.get(0))
            .context("Failed to query stale jobs")?
            .collect::<Result<_, _>>()
            .context("Failed to read stale job ids")?;

        let mut reaped = Vec::new();
        for id in &ids {
            self.conn
                .execute(
                    "UPDATE jobs SET status = 'failed', error = ?1, completed_at = datetime('now') WHERE id = ?2",
                    params![STALE_JOB_ERROR, id],
                )
                .context("Failed to reap stale job")?;
            reaped.push(self.require_job(id)?);
        }
        Ok(reaped)
    }

    // ── Review CRUD ───────────────────────────────────────────────────

    pub fn create_review(
        &self,
        job_id: &str,
        checkpoint: &str,
        title: &str,
        summary: &str,
        files: &[String],
    ) -> Result<ReviewRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let files_json = serde_json::to_string(files).context("Failed to serialize review files")?;
        self.conn
            .execute(
                "INSERT INTO reviews (id, job_id, stage, title, summary, files)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, job_id, checkpoint, title, summary, files_json],
            )
            .context("Failed to insert review")?;
        self.require_review(&id)
    }

    pub fn get_review(&self, id: &str) -> Result<Option<ReviewRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, job_id, stage, title, summary, files, status, feedback, created_at, resolved_at
                 FROM reviews WHERE id = ?1",
            )
            .context("Failed to prepare get_review")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(ReviewRow {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    stage: row.get(2)?,
                    title: row.get(3)?,
                    summary: row.get(4)?,
                    files: row.get(5)?,
                    status: row.get(6)?,
                    feedback: row.get(7)?,
                    created_at: row.get(8)?,
                    resolved_at: row.get(9)?,
                })
            })
            .context("Failed to query review")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read review row")?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    pub fn require_review(&self, id: &str) -> Result<ReviewRecord, StoreError> {
        self.get_review(id)?
            .ok_or_else(|| StoreError::ReviewNotFound { id: id.to_string() })
    }

    /// Unresolved reviews, oldest first.
    pub fn pending_reviews(&self) -> Result<Vec<ReviewRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, job_id, stage, title, summary, files, status, feedback, created_at, resolved_at
                 FROM reviews WHERE status = 'pending' ORDER BY created_at, rowid",
            )
            .context("Failed to prepare pending_reviews")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ReviewRow {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    stage: row.get(2)?,
                    title: row.get(3)?,
                    summary: row.get(4)?,
                    files: row.get(5)?,
                    status: row.get(6)?,
                    feedback: row.get(7)?,
                    created_at: row.get(8)?,
                    resolved_at: row.get(9)?,
                })
            })
            .context("Failed to query pending reviews")?;
        let mut reviews = Vec::new();
        for row in rows {
            let r = row.context("Failed to read review row")?;
            reviews.push(r.into_record()?);
        }
        Ok(reviews)
    }

    /// Resolve a pending review. Resolving twice is an error: the first
    /// decision is the one workers act on.
    pub fn submit_decision(
        &self,
        id: &str,
        approved: bool,
        feedback: Option<&str>,
    ) -> Result<ReviewRecord, StoreError> {
        let review = self.require_review(id)?;
        if !review.is_pending() {
            return Err(StoreError::Other(anyhow::anyhow!(
                "Review {} already resolved as {}",
                id,
                review.status
            )));
        }
        let status = if approved {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Rejected
        };
        let affected = self
            .conn
            .execute(
                "UPDATE reviews SET status = ?1, feedback = ?2, resolved_at = datetime('now')
                 WHERE id = ?3 AND status = 'pending'",
                params![status.as_str(), feedback, id],
            )
            .context("Failed to update review")?;
        if affected == 0 {
            // Lost a race with another reviewer session
            return Err(StoreError::Other(anyhow::anyhow!(
                "Review {} already resolved",
                id
            )));
        }
        self.require_review(id)
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Intermediate row struct for jobs, read raw before status parsing.
struct JobRow {
    id: String,
    title: String,
    params: String,
    status: String,
    current_stage: String,
    game_slug: Option<String>,
    output_dir: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord, StoreError> {
        let status = JobStatus::from_str(&self.status)?;
        Ok(JobRecord {
            id: self.id,
            title: self.title,
            params: self.params,
            status,
            current_stage: self.current_stage,
            game_slug: self.game_slug,
            output_dir: self.output_dir,
            error: self.error,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

/// Intermediate row struct for reviews.
struct ReviewRow {
    id: String,
    job_id: String,
    stage: String,
    title: String,
    summary: String,
    files: String,
    status: String,
    feedback: Option<String>,
    created_at: String,
    resolved_at: Option<String>,
}

impl ReviewRow {
    fn into_record(self) -> Result<ReviewRecord, StoreError> {
        let status = ReviewStatus::from_str(&self.status)?;
        let files: Vec<String> =
            serde_json::from_str(&self.files).context("Failed to parse review files JSON")?;
        Ok(ReviewRecord {
            id: self.id,
            job_id: self.job_id,
            checkpoint: self.stage,
            title: self.title,
            summary: self.summary,
            files,
            status,
            feedback: self.feedback,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
