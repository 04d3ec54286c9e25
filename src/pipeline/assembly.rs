//! Final packaging: gather whatever the run produced, render the report
//! package, and leave a compact snapshot behind for future runs.
//!
//! Collection is disk-first, memory-second. A stage that timed out after
//! writing its files still contributes them; a stage that never ran simply
//! leaves its family empty. Nothing in here fails the job.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::idea::GameIdea;
use crate::layout::ArtifactLayout;
use crate::review::excerpt;
use crate::state::SharedState;

/// Everything assembly could find, grouped by document family.
///
/// Each family is filled through a fallback chain (file, then in-memory
/// draft); a family nothing produced is an empty entry, never an error.
#[derive(Debug, Default)]
pub(crate) struct DocumentPackage {
    pub research: Value,
    pub research_report: String,
    pub gdd: String,
    pub math: Value,
    pub math_prose: String,
    pub compliance: Value,
    pub compliance_prose: String,
    pub reviews: Vec<(String, String)>,
}

/// Parse if possible, otherwise carry the text under a marker key so the
/// report still shows what the generator actually said.
fn json_or_raw(content: String) -> Value {
    serde_json::from_str(&content).unwrap_or_else(|_| json!({ "_raw_text": content }))
}

pub(crate) fn collect_documents(state: &SharedState, layout: &ArtifactLayout) -> DocumentPackage {
    let (research_slot, gdd_slot, math_slot, compliance_slot) = {
        let guard = state.lock();
        (
            guard.market_research.value().cloned(),
            guard.gdd.value().cloned(),
            guard.math_model.value().cloned(),
            guard.compliance.value().cloned(),
        )
    };

    let research_report = match layout.read_text(&layout.market_report()) {
        Ok(text) if text.len() > 100 => text,
        _ => research_slot.clone().unwrap_or_default(),
    };

    let research = layout
        .read_text(&layout.market_research_json())
        .map(json_or_raw)
        .ok()
        .or_else(|| research_slot.map(|text| json!({ "_raw_text": text })))
        .unwrap_or(Value::Null);

    let gdd = layout
        .first_existing_text(&[layout.gdd(), layout.gdd_txt()])
        .or(gdd_slot)
        .unwrap_or_default();

    let csv_files: Vec<String> = layout
        .math_csv_files()
        .iter()
        .filter_map(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .collect();
    let behavior = layout.read_text(&layout.player_behavior()).ok();

    let mut math = layout
        .read_text(&layout.simulation_results())
        .map(json_or_raw)
        .ok()
        .or_else(|| math_slot.clone().map(|text| json!({ "_raw_text": text })))
        .unwrap_or(Value::Null);
    // Sidecar artifacts alone still warrant a math entry
    if math.is_null() && (behavior.is_some() || !csv_files.is_empty()) {
        math = json!({});
    }
    if let Some(object) = math.as_object_mut() {
        if let Some(text) = behavior {
            object.insert("player_behavior".to_string(), json_or_raw(text));
        }
        if !csv_files.is_empty() {
            object.insert("_csv_files".to_string(), json!(csv_files));
        }
    }

    let math_prose = layout
        .first_existing_text(&[layout.math_report(), layout.math_model_md()])
        .or(math_slot)
        .unwrap_or_default();

    let mut compliance = layout
        .read_text(&layout.compliance_report_json())
        .map(json_or_raw)
        .ok()
        .or_else(|| compliance_slot.clone().map(|text| json!({ "_raw_text": text })))
        .unwrap_or(Value::Null);
    if let Ok(cert) = layout.read_text(&layout.certification_plan_json()) {
        if compliance.is_null() {
            compliance = json!({});
        }
        if let Some(object) = compliance.as_object_mut() {
            object.insert("certification_plan".to_string(), json_or_raw(cert));
        }
    }

    let compliance_prose = layout
        .first_existing_text(&[layout.compliance_report_md(), layout.compliance_review_md()])
        .or(compliance_slot)
        .unwrap_or_default();

    let reviews = layout
        .adversarial_reviews()
        .into_iter()
        .filter_map(|path| {
            let name = path.file_stem()?.to_string_lossy().into_owned();
            let text = layout.read_text(&path).ok()?;
            Some((name, text))
        })
        .collect();

    DocumentPackage {
        research,
        research_report,
        gdd,
        math,
        math_prose,
        compliance,
        compliance_prose,
        reviews,
    }
}

/// Render the report package into the package directory. Returns the written
/// files as root-relative paths for the manifest.
pub(crate) fn render_reports(
    layout: &ArtifactLayout,
    idea: &GameIdea,
    package: &DocumentPackage,
) -> Result<Vec<String>> {
    let mut written = Vec::new();
    let mut render = |name: &str, title: &str, body: &str| -> Result<()> {
        let path = layout.report_document(name);
        let document = format!(
            "# {title}\n\n*Theme: {theme} | Generated by the slotsmith pipeline*\n\n{body}",
            theme = idea.theme,
        );
        layout.write_text(&path, &document)?;
        let relative = path
            .strip_prefix(layout.root())
            .unwrap_or(&path)
            .display()
            .to_string();
        written.push(relative);
        Ok(())
    };

    if !package.gdd.is_empty() {
        render("game_design_document", "Game Design Document", &package.gdd)?;
    }
    if !package.research_report.is_empty() {
        render(
            "market_research_report",
            "Market Research Report",
            &package.research_report,
        )?;
    }
    if !package.math_prose.is_empty() || !package.math.is_null() {
        let mut body = package.math_prose.clone();
        if !package.math.is_null() {
            let data = serde_json::to_string_pretty(&package.math)
                .context("Failed to serialize math data")?;
            body.push_str(&format!("\n\n## Simulation Data\n\n```json\n{data}\n```\n"));
        }
        render("math_report", "Math Model Report", &body)?;
    }
    if !package.compliance_prose.is_empty() || !package.compliance.is_null() {
        let mut body = package.compliance_prose.clone();
        if !package.compliance.is_null() {
            let data = serde_json::to_string_pretty(&package.compliance)
                .context("Failed to serialize compliance data")?;
            body.push_str(&format!("\n\n## Compliance Data\n\n```json\n{data}\n```\n"));
        }
        render("compliance_report", "Compliance Report", &body)?;
    }
    if !package.reviews.is_empty() {
        let mut digest = String::new();
        for (name, text) in &package.reviews {
            digest.push_str(&format!("## {name}\n\n{text}\n\n"));
        }
        render("review_digest", "Adversarial Review Digest", &digest)?;
    }

    Ok(written)
}

/// Persist the compact design record future runs retrieve during pre-flight.
pub(crate) fn save_knowledge_snapshot(
    layout: &ArtifactLayout,
    idea: &GameIdea,
    package: &DocumentPackage,
    state: &SharedState,
) -> Result<()> {
    let (optimized_rtp, approvals) = {
        let guard = state.lock();
        let approvals: BTreeMap<String, bool> = guard
            .approvals()
            .iter()
            .map(|(name, record)| (name.clone(), record.approved))
            .collect();
        (guard.optimized_rtp, approvals)
    };

    let snapshot = json!({
        "theme": idea.theme,
        "art_style": idea.art_style,
        "volatility": idea.volatility.to_string(),
        "target_rtp": idea.target_rtp,
        "optimized_rtp": optimized_rtp,
        "grid": idea.grid(),
        "ways_or_lines": idea.ways_or_lines,
        "max_win": idea.max_win_multiplier,
        "features": idea.requested_features,
        "target_markets": idea.target_markets,
        "gdd_summary": excerpt(&package.gdd, 2000),
        "math_summary": excerpt(&package.math_prose, 1000),
        "compliance_summary": excerpt(&package.compliance_prose, 1000),
        "approvals": approvals,
    });

    layout.write_text(
        &layout.knowledge_snapshot(),
        &serde_json::to_string_pretty(&snapshot)
            .context("Failed to serialize knowledge snapshot")?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fixture(dir: &std::path::Path) -> (ArtifactLayout, SharedState) {
        let layout = ArtifactLayout::at(dir.join("pkg"));
        layout.ensure_skeleton().unwrap();
        (layout, SharedState::default())
    }

    // =========================================
    // Document collection fallback chains
    // =========================================

    #[test]
    fn test_collect_prefers_markdown_gdd_over_txt() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        layout.write_text(&layout.gdd(), "# Final GDD").unwrap();
        layout.write_text(&layout.gdd_txt(), "plain draft").unwrap();

        let package = collect_documents(&state, &layout);
        assert_eq!(package.gdd, "# Final GDD");
    }

    #[test]
    fn test_collect_reads_txt_when_markdown_missing() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        layout.write_text(&layout.gdd_txt(), "plain draft").unwrap();

        let package = collect_documents(&state, &layout);
        assert_eq!(package.gdd, "plain draft");
    }

    #[test]
    fn test_collect_falls_back_to_in_memory_draft() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        state
            .lock()
            .gdd
            .record_partial("draft from an interrupted stage".to_string());

        let package = collect_documents(&state, &layout);
        assert_eq!(package.gdd, "draft from an interrupted stage");
        assert!(package.research_report.is_empty());
        assert!(package.math.is_null());
    }

    #[test]
    fn test_collect_merges_math_sidecar_artifacts() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        layout
            .write_text(&layout.simulation_results(), r#"{"optimized_rtp": 96.02}"#)
            .unwrap();
        layout
            .write_text(&layout.player_behavior(), r#"{"sessions": 3}"#)
            .unwrap();
        layout
            .write_text(&layout.math_dir().join("reel_strips.csv"), "a,b\n1,2\n")
            .unwrap();

        let package = collect_documents(&state, &layout);
        assert_eq!(package.math["optimized_rtp"], 96.02);
        assert_eq!(package.math["player_behavior"]["sessions"], 3);
        assert_eq!(package.math["_csv_files"][0], "reel_strips.csv");
    }

    #[test]
    fn test_collect_sidecars_alone_create_math_entry() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        layout
            .write_text(&layout.player_behavior(), r#"{"sessions": 3}"#)
            .unwrap();

        let package = collect_documents(&state, &layout);
        assert!(!package.math.is_null());
        assert_eq!(package.math["player_behavior"]["sessions"], 3);
    }

    #[test]
    fn test_collect_malformed_compliance_rides_raw() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        layout
            .write_text(&layout.compliance_report_json(), "not json {{{")
            .unwrap();
        layout
            .write_text(&layout.certification_plan_json(), r#"{"test_labs": ["GLI"]}"#)
            .unwrap();

        let package = collect_documents(&state, &layout);
        assert_eq!(package.compliance["_raw_text"], "not json {{{");
        assert_eq!(package.compliance["certification_plan"]["test_labs"][0], "GLI");
    }

    #[test]
    fn test_collect_picks_up_reviews_sorted() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        layout
            .write_text(&layout.adversarial_review("post_research"), "research critique")
            .unwrap();
        layout
            .write_text(&layout.adversarial_review("post_art_review"), "art critique")
            .unwrap();

        let package = collect_documents(&state, &layout);
        assert_eq!(package.reviews.len(), 2);
        assert_eq!(package.reviews[0].0, "adversarial_review_post_art_review");
        assert_eq!(package.reviews[0].1, "art critique");
        assert_eq!(package.reviews[1].0, "adversarial_review_post_research");
    }

    // =========================================
    // Report rendering
    // =========================================

    #[test]
    fn test_render_reports_writes_package_documents() {
        let dir = tempdir().unwrap();
        let (layout, _) = fixture(dir.path());
        let package = DocumentPackage {
            gdd: "# GDD body".to_string(),
            research_report: "# Research body".to_string(),
            reviews: vec![("adversarial_review_post_research".to_string(), "harsh words".to_string())],
            ..Default::default()
        };

        let idea = GameIdea::new("Neon Nights");
        let written = render_reports(&layout, &idea, &package).unwrap();

        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|f| f.starts_with("06_pdf/")));
        assert!(layout.report_document("game_design_document").is_file());

        let digest = layout
            .read_text(&layout.report_document("review_digest"))
            .unwrap();
        assert!(digest.contains("harsh words"));
        assert!(digest.contains("Neon Nights"));
    }

    #[test]
    fn test_render_reports_skips_empty_families() {
        let dir = tempdir().unwrap();
        let (layout, _) = fixture(dir.path());
        let idea = GameIdea::new("Empty Run");

        let written = render_reports(&layout, &idea, &DocumentPackage::default()).unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn test_render_math_report_embeds_simulation_data() {
        let dir = tempdir().unwrap();
        let (layout, _) = fixture(dir.path());
        let package = DocumentPackage {
            math_prose: "Reel strips are documented below.".to_string(),
            math: json!({"optimized_rtp": 96.02}),
            ..Default::default()
        };

        let idea = GameIdea::new("Math Heavy");
        render_reports(&layout, &idea, &package).unwrap();

        let report = layout.read_text(&layout.report_document("math_report")).unwrap();
        assert!(report.contains("Reel strips are documented below."));
        assert!(report.contains("## Simulation Data"));
        assert!(report.contains("96.02"));
    }

    // =========================================
    // Knowledge snapshot
    // =========================================

    #[test]
    fn test_knowledge_snapshot_truncates_long_documents() {
        let dir = tempdir().unwrap();
        let (layout, state) = fixture(dir.path());
        let package = DocumentPackage {
            gdd: "g".repeat(3000),
            math_prose: "m".repeat(3000),
            ..Default::default()
        };

        let mut idea = GameIdea::new("Snapshot Game");
        idea.target_markets = vec!["UK".to_string()];
        save_knowledge_snapshot(&layout, &idea, &package, &state).unwrap();

        let raw = layout.read_text(&layout.knowledge_snapshot()).unwrap();
        let snapshot: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot["theme"], "Snapshot Game");
        assert_eq!(snapshot["target_markets"][0], "UK");
        assert_eq!(snapshot["gdd_summary"].as_str().unwrap().len(), 2000);
        assert_eq!(snapshot["math_summary"].as_str().unwrap().len(), 1000);
        assert!(snapshot["optimized_rtp"].is_null());
    }
}
