//! Checkpoint approval gate.
//!
//! Three decision channels, tried in order:
//! 1. auto — the run was started with `--auto` or approvals are globally
//!    disabled; approve immediately.
//! 2. remote — the job has a store-backed review channel; create a pending
//!    review row and poll until another session resolves it or the wait
//!    expires.
//! 3. operator — prompt at the local terminal.
//!
//! A remote channel failure degrades to the operator prompt rather than
//! failing the job. Whatever channel decides, the outcome is recorded in
//! the approvals map exactly once, and a rejection's feedback is appended
//! to the state error log in the `HITL rejection at {name}: {feedback}`
//! wire format existing dashboards parse.

use anyhow::{Context, Result};
use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::StudioConfig;
use crate::errors::GateError;
use crate::layout::ArtifactLayout;
use crate::state::{ApprovalRecord, DecisionRoute, SharedState};
use crate::store::DbHandle;

/// How many recent artifact paths a pending review carries.
const MAX_REVIEW_FILES: usize = 20;

pub struct ApprovalGate {
    db: Option<DbHandle>,
    job_id: Option<String>,
    auto: bool,
    hitl_enabled: bool,
    max_wait: Duration,
    poll_interval: Duration,
}

impl ApprovalGate {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            db: None,
            job_id: None,
            auto: config.auto_approve,
            hitl_enabled: config.hitl_enabled,
            max_wait: config.gate_max_wait,
            poll_interval: config.gate_poll_interval,
        }
    }

    /// Attach the store-backed review channel for a job.
    pub fn with_remote(mut self, db: DbHandle, job_id: &str) -> Self {
        self.db = Some(db);
        self.job_id = Some(job_id.to_string());
        self
    }

    /// Decide one checkpoint. Returns the approval outcome; the decision and
    /// any rejection feedback are recorded into `state` before returning.
    pub async fn await_approval(
        &self,
        name: &str,
        summary: &str,
        state: &SharedState,
        layout: &ArtifactLayout,
    ) -> Result<bool> {
        if self.auto || !self.hitl_enabled {
            info!(checkpoint = name, "checkpoint auto-approved");
            state
                .lock()
                .record_decision(name, ApprovalRecord::new(true, None, DecisionRoute::Auto));
            return Ok(true);
        }

        if let (Some(db), Some(job_id)) = (&self.db, &self.job_id) {
            match self.remote_decision(db, job_id, name, summary, layout).await {
                Ok((approved, feedback)) => {
                    let mut guard = state.lock();
                    if !approved {
                        if let Some(text) = feedback.as_deref().filter(|t| !t.is_empty()) {
                            guard.push_error(format!("HITL rejection at {name}: {text}"));
                        }
                    }
                    guard.record_decision(
                        name,
                        ApprovalRecord::new(approved, feedback, DecisionRoute::Remote),
                    );
                    return Ok(approved);
                }
                Err(GateError::WaitExpired { waited_secs, .. }) => {
                    warn!(
                        checkpoint = name,
                        waited_secs, "remote approval wait expired, recording non-approval"
                    );
                    state.lock().record_decision(
                        name,
                        ApprovalRecord::new(false, None, DecisionRoute::Remote),
                    );
                    return Ok(false);
                }
                Err(err) => {
                    warn!(
                        checkpoint = name,
                        error = ?err,
                        "remote approval channel failed, falling back to terminal prompt"
                    );
                }
            }
        }

        self.prompt_decision(name, summary, state)
    }

    /// Create a pending review and poll until it resolves.
    async fn remote_decision(
        &self,
        db: &DbHandle,
        job_id: &str,
        name: &str,
        summary: &str,
        layout: &ArtifactLayout,
    ) -> Result<(bool, Option<String>), GateError> {
        let title = checkpoint_title(name);
        let files: Vec<String> = layout
            .latest_files(MAX_REVIEW_FILES)
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        let job = job_id.to_string();
        let checkpoint = name.to_string();
        let summary_owned = summary.to_string();
        let review = db
            .call(move |db| db.create_review(&job, &checkpoint, &title, &summary_owned, &files))
            .await
            .map_err(|e| GateError::Remote {
                name: name.to_string(),
                source: e.into(),
            })?;

        info!(
            checkpoint = name,
            review_id = %review.id,
            "waiting for remote approval"
        );

        let started = Instant::now();
        loop {
            if started.elapsed() >= self.max_wait {
                return Err(GateError::WaitExpired {
                    name: name.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            let id = review.id.clone();
            let current =
                db.call(move |db| db.require_review(&id))
                    .await
                    .map_err(|e| GateError::Remote {
                        name: name.to_string(),
                        source: e.into(),
                    })?;
            if let Some(approved) = current.decision() {
                return Ok((approved, current.feedback));
            }
        }
    }

    /// Terminal prompt. Blocks the calling thread; the gate is the
    /// pipeline's only intentional stop, so that is acceptable here.
    fn prompt_decision(&self, name: &str, summary: &str, state: &SharedState) -> Result<bool> {
        let title = checkpoint_title(name);
        println!();
        println!("{}", style(format!("── Review: {title} ──")).yellow().bold());
        println!("{}", textwrap::indent(&textwrap::fill(summary, 76), "  "));

        let approved = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Approve?")
            .default(true)
            .interact()
            .context("Failed to read approval decision")?;

        let mut feedback = None;
        if !approved {
            let text: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Feedback (or 'skip')")
                .allow_empty(true)
                .interact_text()
                .context("Failed to read rejection feedback")?;
            let text = text.trim().to_string();
            if !text.is_empty() && !text.eq_ignore_ascii_case("skip") {
                state
                    .lock()
                    .push_error(format!("HITL rejection at {name}: {text}"));
                feedback = Some(text);
            }
        }

        state.lock().record_decision(
            name,
            ApprovalRecord::new(approved, feedback, DecisionRoute::Operator),
        );
        Ok(approved)
    }
}

/// `post_design_math` -> `Post Design Math`.
fn checkpoint_title(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
