//! Completion manifest: the one machine-readable summary written at the end
//! of every run.
//!
//! Dashboards and downstream tooling read `PACKAGE_MANIFEST.json` instead of
//! crawling the artifact tree, so the schema here is load-bearing: field
//! names stay stable across versions. Presence flags mirror the state slots,
//! which means a timed-out stage shows up as `not_started` or `partial`
//! rather than silently vanishing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cost::CostSummary;
use crate::idea::GameIdea;
use crate::layout::ArtifactLayout;
use crate::state::{PipelineState, SlotStatus};

/// Pre-flight intelligence outcomes, including any jurisdiction blockers
/// that surfaced.
#[derive(Debug, Serialize)]
pub struct PreflightSummary {
    pub trend_radar: bool,
    pub jurisdiction_constraints: bool,
    pub patent_scan: bool,
    pub blockers: Vec<String>,
}

/// Per-stage slot status at completion time.
#[derive(Debug, Serialize)]
pub struct StageSummary {
    pub market_research: SlotStatus,
    pub gdd: SlotStatus,
    pub math_model: SlotStatus,
    pub mood_board: SlotStatus,
    pub art_assets: SlotStatus,
    pub sound_design: SlotStatus,
    pub compliance: SlotStatus,
    pub certification_plan: SlotStatus,
    pub prototype: SlotStatus,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub game_title: String,
    pub game_slug: String,
    pub generated_at: DateTime<Utc>,
    pub pipeline_version: &'static str,
    pub preflight: PreflightSummary,
    pub stages: StageSummary,
    pub optimized_rtp: Option<f64>,
    pub cost: CostSummary,
    pub input_parameters: GameIdea,
    pub files_generated: Vec<String>,
    pub report_files: Vec<String>,
    pub total_files: usize,
    pub total_images: usize,
    /// Checkpoint name -> approved.
    pub approvals: BTreeMap<String, bool>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Manifest {
    /// Snapshot the run. The file list is taken before the manifest itself
    /// is written, so the manifest never lists itself.
    pub fn build(state: &PipelineState, idea: &GameIdea, layout: &ArtifactLayout) -> Self {
        let files: Vec<String> = layout
            .list_files()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let blockers = state
            .jurisdiction_constraints
            .value()
            .map(|raw| parse_blockers(raw))
            .unwrap_or_default();
        let approvals: BTreeMap<String, bool> = state
            .approvals()
            .iter()
            .map(|(name, record)| (name.clone(), record.approved))
            .collect();

        Self {
            game_title: idea.theme.clone(),
            game_slug: state.game_slug.clone(),
            generated_at: Utc::now(),
            pipeline_version: env!("CARGO_PKG_VERSION"),
            preflight: PreflightSummary {
                trend_radar: state.trend_radar.is_started(),
                jurisdiction_constraints: state.jurisdiction_constraints.is_started(),
                patent_scan: state.patent_scan.is_started(),
                blockers,
            },
            stages: StageSummary {
                market_research: state.market_research.status(),
                gdd: state.gdd.status(),
                math_model: state.math_model.status(),
                mood_board: state.mood_board.status(),
                art_assets: state.art_assets.status(),
                sound_design: state.sound_design.status(),
                compliance: state.compliance.status(),
                certification_plan: state.certification_plan.status(),
                prototype: if state.prototype_path.is_some() {
                    SlotStatus::Complete
                } else {
                    SlotStatus::NotStarted
                },
            },
            optimized_rtp: state.optimized_rtp,
            cost: state.cost.summary(),
            input_parameters: idea.clone(),
            total_files: files.len(),
            total_images: layout.count_images(),
            files_generated: files,
            report_files: state.report_files.clone(),
            approvals,
            errors: state.errors.clone(),
            started_at: state.started_at,
            completed_at: state.completed_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn write(&self, layout: &ArtifactLayout) -> Result<PathBuf> {
        let path = layout.manifest();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        layout.write_text(&path, &json)?;
        Ok(path)
    }
}

/// Pull `intersection.blockers` out of the jurisdiction constraints document.
/// Anything unparseable reads as no blockers.
pub(crate) fn parse_blockers(raw: &str) -> Vec<String> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    value
        .pointer("/intersection/blockers")
        .and_then(|b| b.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ApprovalRecord, DecisionRoute};
    use tempfile::tempdir;

    fn layout() -> (tempfile::TempDir, ArtifactLayout) {
        let dir = tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path(), "gold_rush_20260801_120000");
        layout.ensure_skeleton().unwrap();
        (dir, layout)
    }

    #[test]
    fn test_build_mirrors_slot_states() {
        let (_dir, layout) = layout();
        let mut state = PipelineState::new();
        state.game_slug = "gold_rush_20260801_120000".to_string();
        state.market_research.record_complete("report".to_string());
        state.gdd.record_partial("half a gdd".to_string());
        state.optimized_rtp = Some(96.02);
        state.prototype_path = Some(layout.prototype_dir().join("index.html"));

        let manifest = Manifest::build(&state, &GameIdea::new("Gold Rush"), &layout);

        assert_eq!(manifest.game_title, "Gold Rush");
        assert_eq!(manifest.stages.market_research, SlotStatus::Complete);
        assert_eq!(manifest.stages.gdd, SlotStatus::Partial);
        assert_eq!(manifest.stages.math_model, SlotStatus::NotStarted);
        assert_eq!(manifest.stages.prototype, SlotStatus::Complete);
        assert_eq!(manifest.optimized_rtp, Some(96.02));
        assert_eq!(manifest.pipeline_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_build_extracts_jurisdiction_blockers() {
        let (_dir, layout) = layout();
        let mut state = PipelineState::new();
        state.jurisdiction_constraints.record_complete(
            r#"{"intersection": {"blockers": ["no buy feature in UK"], "max_win_cap": 5000}}"#
                .to_string(),
        );

        let manifest = Manifest::build(&state, &GameIdea::new("t"), &layout);
        assert!(manifest.preflight.jurisdiction_constraints);
        assert_eq!(manifest.preflight.blockers, vec!["no buy feature in UK"]);
    }

    #[test]
    fn test_malformed_constraints_read_as_no_blockers() {
        assert!(parse_blockers("not json").is_empty());
        assert!(parse_blockers("{}").is_empty());
        assert!(parse_blockers(r#"{"intersection": {"blockers": "oops"}}"#).is_empty());
    }

    #[test]
    fn test_build_flattens_approvals() {
        let (_dir, layout) = layout();
        let mut state = PipelineState::new();
        state.record_decision(
            "post_research",
            ApprovalRecord::new(true, None, DecisionRoute::Auto),
        );
        state.record_decision(
            "post_art_review",
            ApprovalRecord::new(false, Some("muddy".into()), DecisionRoute::Remote),
        );

        let manifest = Manifest::build(&state, &GameIdea::new("t"), &layout);
        assert_eq!(manifest.approvals.get("post_research"), Some(&true));
        assert_eq!(manifest.approvals.get("post_art_review"), Some(&false));
    }

    #[test]
    fn test_write_produces_parseable_json() {
        let (_dir, layout) = layout();
        layout
            .write_text(&layout.market_report(), "the report")
            .unwrap();
        let mut state = PipelineState::new();
        state.errors.push("audio generation failed".to_string());

        let manifest = Manifest::build(&state, &GameIdea::new("Gold Rush"), &layout);
        let path = manifest.write(&layout).unwrap();
        assert_eq!(path, layout.manifest());

        let parsed: serde_json::Value =
            serde_json::from_str(&layout.read_text(&path).unwrap()).unwrap();
        assert_eq!(parsed["game_title"], "Gold Rush");
        assert_eq!(parsed["total_files"], 1);
        assert_eq!(parsed["errors"][0], "audio generation failed");
        assert_eq!(parsed["stages"]["market_research"], "not_started");
        // Snapshot was taken before the manifest file existed
        assert_eq!(parsed["files_generated"][0], "01_research/market_report.md");
    }
}
