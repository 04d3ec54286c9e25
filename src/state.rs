//! In-memory working state for one pipeline run.
//!
//! Every stage writes into a typed [`StageSlot`] instead of a bare optional
//! field. A slot distinguishes work that never started from work that was
//! interrupted mid-flight, and it is sealed once the downstream checkpoint
//! has reviewed its contents — an abandoned stage thread that finishes late
//! cannot overwrite what a human already looked at.
//!
//! The whole state lives behind one mutex ([`SharedState`]) shared between
//! the orchestrating task and stage worker threads.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use crate::cost::CostTracker;

/// Progress of a single stage's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    NotStarted,
    Partial,
    Complete,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SlotStatus::NotStarted => "not_started",
            SlotStatus::Partial => "partial",
            SlotStatus::Complete => "complete",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
enum SlotValue<T> {
    NotStarted,
    Partial(T),
    Complete(T),
}

/// Holder for one stage's output.
///
/// Writes transition `NotStarted -> Partial -> Complete`; a sealed slot
/// rejects further writes and logs the attempt.
#[derive(Debug, Clone)]
pub struct StageSlot<T> {
    name: &'static str,
    value: SlotValue<T>,
    sealed: bool,
}

impl<T> StageSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            value: SlotValue::NotStarted,
            sealed: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record an intermediate result. Returns `false` if the slot is sealed
    /// and the write was discarded.
    pub fn record_partial(&mut self, value: T) -> bool {
        if self.sealed {
            warn!(slot = self.name, "discarding late partial write to sealed slot");
            return false;
        }
        self.value = SlotValue::Partial(value);
        true
    }

    /// Record the stage's final result. Returns `false` if the slot is
    /// sealed and the write was discarded.
    pub fn record_complete(&mut self, value: T) -> bool {
        if self.sealed {
            warn!(slot = self.name, "discarding late complete write to sealed slot");
            return false;
        }
        self.value = SlotValue::Complete(value);
        true
    }

    /// Seal the slot after a checkpoint has reviewed it. Idempotent.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Whatever content exists, partial or complete.
    pub fn value(&self) -> Option<&T> {
        match &self.value {
            SlotValue::NotStarted => None,
            SlotValue::Partial(v) | SlotValue::Complete(v) => Some(v),
        }
    }

    /// Content only if the stage ran to completion.
    pub fn completed(&self) -> Option<&T> {
        match &self.value {
            SlotValue::Complete(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.value, SlotValue::Complete(_))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.value, SlotValue::Partial(_))
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.value, SlotValue::NotStarted)
    }

    pub fn status(&self) -> SlotStatus {
        match self.value {
            SlotValue::NotStarted => SlotStatus::NotStarted,
            SlotValue::Partial(_) => SlotStatus::Partial,
            SlotValue::Complete(_) => SlotStatus::Complete,
        }
    }
}

/// How a checkpoint decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRoute {
    /// Auto-approved without review.
    Auto,
    /// Decided through a stored review record from another session.
    Remote,
    /// Decided at the local terminal prompt.
    Operator,
}

impl std::fmt::Display for DecisionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionRoute::Auto => "auto",
            DecisionRoute::Remote => "remote",
            DecisionRoute::Operator => "operator",
        };
        write!(f, "{}", s)
    }
}

/// One checkpoint's recorded outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRecord {
    pub approved: bool,
    pub feedback: Option<String>,
    pub route: DecisionRoute,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn new(approved: bool, feedback: Option<String>, route: DecisionRoute) -> Self {
        Self {
            approved,
            feedback,
            route,
            decided_at: Utc::now(),
        }
    }
}

/// Mutable state threaded through every stage of one run.
#[derive(Debug)]
pub struct PipelineState {
    // Identity, set during initialization
    pub game_slug: String,
    pub output_dir: PathBuf,

    // Preflight intelligence
    pub trend_radar: StageSlot<String>,
    pub jurisdiction_constraints: StageSlot<String>,
    pub patent_scan: StageSlot<String>,

    // Core stage documents
    pub market_research: StageSlot<String>,
    pub gdd: StageSlot<String>,
    pub math_model: StageSlot<String>,
    pub mood_board: StageSlot<String>,
    pub art_assets: StageSlot<String>,
    pub sound_design: StageSlot<String>,
    pub compliance: StageSlot<String>,
    pub certification_plan: StageSlot<String>,

    /// RTP reported by the math simulation, when one was produced.
    pub optimized_rtp: Option<f64>,
    /// Playable prototype location, when assembly found one.
    pub prototype_path: Option<PathBuf>,

    /// Checkpoint name -> decision. Each checkpoint records at most once.
    approvals: BTreeMap<String, ApprovalRecord>,
    /// Append-only log of non-fatal problems, surfaced in the manifest.
    pub errors: Vec<String>,
    /// Report documents rendered at assembly, root-relative.
    pub report_files: Vec<String>,

    pub cost: CostTracker,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            game_slug: String::new(),
            output_dir: PathBuf::new(),
            trend_radar: StageSlot::new("trend_radar"),
            jurisdiction_constraints: StageSlot::new("jurisdiction_constraints"),
            patent_scan: StageSlot::new("patent_scan"),
            market_research: StageSlot::new("market_research"),
            gdd: StageSlot::new("gdd"),
            math_model: StageSlot::new("math_model"),
            mood_board: StageSlot::new("mood_board"),
            art_assets: StageSlot::new("art_assets"),
            sound_design: StageSlot::new("sound_design"),
            compliance: StageSlot::new("compliance"),
            certification_plan: StageSlot::new("certification_plan"),
            optimized_rtp: None,
            prototype_path: None,
            approvals: BTreeMap::new(),
            errors: Vec::new(),
            report_files: Vec::new(),
            cost: CostTracker::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record a checkpoint decision. The first record wins; a duplicate is
    /// logged and ignored.
    pub fn record_decision(&mut self, checkpoint: &str, record: ApprovalRecord) -> bool {
        if self.approvals.contains_key(checkpoint) {
            warn!(checkpoint, "duplicate checkpoint decision ignored");
            return false;
        }
        self.approvals.insert(checkpoint.to_string(), record);
        true
    }

    /// Whether a checkpoint was decided as approved. Undetermined
    /// checkpoints count as not approved.
    pub fn approved(&self, checkpoint: &str) -> bool {
        self.approvals
            .get(checkpoint)
            .map(|r| r.approved)
            .unwrap_or(false)
    }

    pub fn decision(&self, checkpoint: &str) -> Option<&ApprovalRecord> {
        self.approvals.get(checkpoint)
    }

    pub fn approvals(&self) -> &BTreeMap<String, ApprovalRecord> {
        &self.approvals
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to the state shared between the pipeline driver and
/// stage worker threads.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<PipelineState>>,
}

impl SharedState {
    pub fn new(state: PipelineState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Lock the state. An abandoned stage thread that panicked may have
    /// poisoned the mutex; partial slot contents are representable state,
    /// so the guard is recovered rather than propagating the poison.
    pub fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(PipelineState::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // StageSlot tests
    // =========================================

    #[test]
    fn test_slot_starts_empty() {
        let slot: StageSlot<String> = StageSlot::new("market_research");
        assert_eq!(slot.status(), SlotStatus::NotStarted);
        assert!(!slot.is_started());
        assert!(slot.value().is_none());
        assert!(slot.completed().is_none());
        assert!(!slot.is_sealed());
    }

    #[test]
    fn test_slot_partial_then_complete() {
        let mut slot = StageSlot::new("gdd");
        assert!(slot.record_partial("draft".to_string()));
        assert_eq!(slot.status(), SlotStatus::Partial);
        assert_eq!(slot.value().map(String::as_str), Some("draft"));
        assert!(slot.completed().is_none());

        assert!(slot.record_complete("final".to_string()));
        assert_eq!(slot.status(), SlotStatus::Complete);
        assert_eq!(slot.completed().map(String::as_str), Some("final"));
    }

    #[test]
    fn test_sealed_slot_discards_writes() {
        let mut slot = StageSlot::new("mood_board");
        slot.record_complete("reviewed".to_string());
        slot.seal();

        assert!(!slot.record_partial("late partial".to_string()));
        assert!(!slot.record_complete("late complete".to_string()));
        assert_eq!(slot.completed().map(String::as_str), Some("reviewed"));
    }

    #[test]
    fn test_seal_is_idempotent() {
        let mut slot: StageSlot<String> = StageSlot::new("compliance");
        slot.seal();
        slot.seal();
        assert!(slot.is_sealed());
        // Sealing an empty slot freezes it empty
        assert!(!slot.record_partial("x".to_string()));
        assert_eq!(slot.status(), SlotStatus::NotStarted);
    }

    #[test]
    fn test_slot_status_display() {
        assert_eq!(SlotStatus::NotStarted.to_string(), "not_started");
        assert_eq!(SlotStatus::Partial.to_string(), "partial");
        assert_eq!(SlotStatus::Complete.to_string(), "complete");
    }

    // =========================================
    // Approval bookkeeping tests
    // =========================================

    #[test]
    fn test_record_decision_first_wins() {
        let mut state = PipelineState::new();
        let first = ApprovalRecord::new(true, None, DecisionRoute::Auto);
        let second = ApprovalRecord::new(false, Some("late".into()), DecisionRoute::Operator);

        assert!(state.record_decision("post_research", first));
        assert!(!state.record_decision("post_research", second));

        assert!(state.approved("post_research"));
        let kept = state.decision("post_research").unwrap();
        assert_eq!(kept.route, DecisionRoute::Auto);
        assert!(kept.feedback.is_none());
    }

    #[test]
    fn test_undecided_checkpoint_is_not_approved() {
        let state = PipelineState::new();
        assert!(!state.approved("post_design_math"));
        assert!(state.decision("post_design_math").is_none());
    }

    #[test]
    fn test_rejection_keeps_feedback() {
        let mut state = PipelineState::new();
        state.record_decision(
            "post_art_review",
            ApprovalRecord::new(false, Some("palette too muddy".into()), DecisionRoute::Remote),
        );
        assert!(!state.approved("post_art_review"));
        let rec = state.decision("post_art_review").unwrap();
        assert_eq!(rec.feedback.as_deref(), Some("palette too muddy"));
        assert_eq!(rec.route, DecisionRoute::Remote);
    }

    #[test]
    fn test_push_error_appends() {
        let mut state = PipelineState::new();
        state.push_error("HITL rejection at post_art_review: palette too muddy");
        state.push_error("audio generation failed");
        assert_eq!(state.errors.len(), 2);
        assert!(state.errors[0].starts_with("HITL rejection"));
    }

    // =========================================
    // SharedState tests
    // =========================================

    #[test]
    fn test_shared_state_clones_share_data() {
        let shared = SharedState::default();
        let other = shared.clone();

        shared.lock().market_research.record_complete("report".to_string());

        let guard = other.lock();
        assert!(guard.market_research.is_complete());
    }

    #[test]
    fn test_shared_state_survives_panicked_writer() {
        let shared = SharedState::default();
        let writer = shared.clone();

        let handle = std::thread::spawn(move || {
            let mut guard = writer.lock();
            guard.gdd.record_partial("half a draft".to_string());
            panic!("stage blew up mid-write");
        });
        assert!(handle.join().is_err());

        // Lock is recovered and the partial write is visible
        let guard = shared.lock();
        assert!(guard.gdd.is_partial());
    }
}
