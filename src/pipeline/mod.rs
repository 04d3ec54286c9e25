//! The stage driver: one job from game idea to assembled package.
//!
//! Stages run in a fixed linear order, each invoked through the timeout
//! envelope. Human checkpoints sit between them; a stage whose upstream
//! checkpoint was not approved is a no-op, so a rejection truncates the rest
//! of the run without failing the job. Stage work units run on the blocking
//! pool and talk to the shared state and the artifact tree; the driver never
//! touches generated content itself, it only sequences, times, and records.

mod assembly;

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::StudioConfig;
use crate::cost::Usage;
use crate::envelope::{self, StageOutcome};
use crate::gate::ApprovalGate;
use crate::idea::GameIdea;
use crate::layout::ArtifactLayout;
use crate::manifest::{self, Manifest};
use crate::review::{ReviewHook, excerpt};
use crate::state::{PipelineState, SharedState};
use crate::store::DbHandle;
use crate::studio::{Studio, StudioRequest};
use crate::ui::PipelineUI;

/// Stages that tick the progress bar. Checkpoints wait, they do not tick.
const TOTAL_STAGES: u64 = 7;

pub struct StudioPipeline {
    config: StudioConfig,
    idea: GameIdea,
    state: SharedState,
    layout: ArtifactLayout,
    studio: Arc<dyn Studio>,
    gate: ApprovalGate,
    hook: ReviewHook,
    ui: PipelineUI,
    db: Option<DbHandle>,
    job_id: Option<String>,
}

impl StudioPipeline {
    pub fn new(config: StudioConfig, idea: GameIdea, studio: Arc<dyn Studio>) -> Self {
        let slug = idea.slug();
        let layout = ArtifactLayout::new(&config.output_root, &slug);

        let mut state = PipelineState::new();
        state.game_slug = slug;
        state.output_dir = layout.root().to_path_buf();

        let hook = ReviewHook::new(studio.clone(), config.timeouts.for_stage("recon"));
        let gate = ApprovalGate::new(&config);
        let ui = PipelineUI::new(TOTAL_STAGES, config.verbose);

        Self {
            state: SharedState::new(state),
            layout,
            studio,
            gate,
            hook,
            ui,
            idea,
            config,
            db: None,
            job_id: None,
        }
    }

    /// Attach the shared store: status updates, stage labels, and the remote
    /// approval channel all flow through it.
    pub fn with_store(mut self, db: DbHandle, job_id: &str) -> Self {
        self.gate = ApprovalGate::new(&self.config).with_remote(db.clone(), job_id);
        self.db = Some(db);
        self.job_id = Some(job_id.to_string());
        self
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Run the whole pipeline and return the completion manifest.
    ///
    /// Only a stage exception (or panic) escaping the envelope fails the
    /// job. Timeouts degrade, rejections truncate, and every other problem
    /// is recorded in the manifest error list of a `complete` job.
    pub async fn run(self) -> Result<Manifest> {
        let run_started = Instant::now();
        self.ui.banner(
            &format!("Slot studio pipeline: {}", self.idea.theme),
            &self.parameters_line(),
        );

        if let (Some(db), Some(job_id)) = (&self.db, &self.job_id) {
            let id = job_id.clone();
            db.call(move |db| db.mark_running(&id))
                .await
                .context("Failed to mark job running")?;
        }

        match self.execute().await {
            Ok(manifest) => {
                if let (Some(db), Some(job_id)) = (&self.db, &self.job_id) {
                    let id = job_id.clone();
                    envelope::best_effort(
                        "mark job complete",
                        db.call(move |db| db.mark_complete(&id))
                            .await
                            .map_err(anyhow::Error::from),
                    );
                }
                self.ui
                    .completion(self.layout.root(), &manifest, run_started.elapsed());
                Ok(manifest)
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.ui.run_failed(&message);
                if let (Some(db), Some(job_id)) = (&self.db, &self.job_id) {
                    let id = job_id.clone();
                    let error = message.clone();
                    envelope::best_effort(
                        "mark job failed",
                        db.call(move |db| db.mark_failed(&id, &error))
                            .await
                            .map_err(anyhow::Error::from),
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute(&self) -> Result<Manifest> {
        self.initialize().await?;
        self.preflight().await?;
        self.research().await?;
        self.checkpoint_research().await?;
        self.design_and_math().await?;
        self.checkpoint_design().await?;
        self.mood_boards().await?;
        self.checkpoint_art().await?;
        self.production().await?;
        self.assemble().await
    }

    // ── Stage 0: initialization ─────────────────────────────────────────────

    async fn initialize(&self) -> Result<()> {
        self.set_stage_label("Initializing pipeline").await;
        self.ui.start_stage("Initializing pipeline");

        self.layout.ensure_skeleton()?;
        info!(
            slug = %self.state.lock().game_slug,
            root = %self.layout.root().display(),
            "job output tree ready"
        );

        if let (Some(db), Some(job_id)) = (&self.db, &self.job_id) {
            let id = job_id.clone();
            let slug = self.state.lock().game_slug.clone();
            let dir = self.layout.root().display().to_string();
            envelope::best_effort(
                "record output location",
                db.call(move |db| db.set_output(&id, &slug, &dir))
                    .await
                    .map_err(anyhow::Error::from),
            );
        }

        self.ui.stage_complete("initialization");
        Ok(())
    }

    // ── Stage 1: pre-flight intelligence ────────────────────────────────────

    async fn preflight(&self) -> Result<()> {
        self.set_stage_label("Pre-flight intelligence").await;
        self.ui.start_stage("Pre-flight intelligence");

        let studio = self.studio.clone();
        let idea = self.idea.clone();
        let layout = self.layout.clone();
        let state = self.state.clone();
        let budget = self.config.timeouts.for_stage("recon");

        let outcome = envelope::run_stage("recon", budget, move || {
            preflight_probes(&studio, &idea, &layout, &state);
            Ok(())
        })
        .await?;

        match outcome {
            StageOutcome::Completed(()) => self.ui.stage_complete("pre-flight"),
            StageOutcome::TimedOut => self.ui.stage_timed_out("pre-flight"),
        }
        Ok(())
    }

    // ── Stage 2: market research ────────────────────────────────────────────

    async fn research(&self) -> Result<()> {
        self.set_stage_label("Market research (15 min)").await;
        self.ui.start_stage("Market research (15 min)");

        let studio = self.studio.clone();
        let idea = self.idea.clone();
        let layout = self.layout.clone();
        let state = self.state.clone();
        let budget = self.config.timeouts.for_stage("research");

        let outcome = envelope::run_stage("research", budget, move || {
            let preflight_ctx = preflight_context(&state);

            let sweep = generate_document(
                &studio,
                &state,
                &layout,
                "research",
                "market_sweep",
                &idea.theme,
                market_sweep_instruction(&idea, &preflight_ctx),
            )?;
            state.lock().market_research.record_partial(sweep.clone());

            let dive = generate_document(
                &studio,
                &state,
                &layout,
                "research",
                "competitor_deep_dive",
                &idea.theme,
                competitor_instruction(&idea, &excerpt(&sweep, 2000)),
            )?;
            state
                .lock()
                .market_research
                .record_partial(format!("{sweep}\n\n{dive}"));

            let report = generate_document(
                &studio,
                &state,
                &layout,
                "research",
                "market_report",
                &idea.theme,
                market_report_instruction(&idea, &excerpt(&sweep, 2500), &excerpt(&dive, 2500)),
            )?;
            layout.write_text(&layout.market_report(), &report)?;

            let payload = serde_json::json!({
                "theme": idea.theme,
                "volatility_target": idea.volatility.to_string(),
                "target_markets": idea.target_markets,
                "market_sweep": sweep,
                "competitor_analysis": dive,
            });
            layout.write_text(
                &layout.market_research_json(),
                &serde_json::to_string_pretty(&payload)
                    .context("Failed to serialize research payload")?,
            )?;

            // A generator that rewrote the report file directly wins over
            // the in-memory draft.
            let final_report = match layout.read_text(&layout.market_report()) {
                Ok(text) if text.len() > 100 => text,
                _ => report,
            };
            state.lock().market_research.record_complete(final_report);
            Ok(())
        })
        .await?;

        match outcome {
            StageOutcome::Completed(()) => self.ui.stage_complete("market research"),
            StageOutcome::TimedOut => self.ui.stage_timed_out("market research"),
        }
        Ok(())
    }

    async fn checkpoint_research(&self) -> Result<()> {
        self.set_stage_label("Research review").await;

        let research = self
            .layout
            .read_text(&self.layout.market_research_json())
            .ok()
            .or_else(|| self.state.lock().market_research.value().cloned())
            .unwrap_or_default();
        let context = format!(
            "Theme: {}\n\nMarket research:\n{}",
            self.idea.theme,
            excerpt(&research, 3000)
        );
        let summary = format!(
            "Market research for '{}' is ready in 01_research/ (market_report.md, \
             market_research.json). A hostile critique is at \
             adversarial_review_post_research.md. Approve to proceed to design.",
            self.idea.theme
        );
        self.checkpoint("post_research", summary, context).await
    }

    // ── Stage 3: design + math ──────────────────────────────────────────────

    async fn design_and_math(&self) -> Result<()> {
        if !self.approved("post_research") {
            self.ui
                .stage_skipped("design + math", "research direction was not approved");
            return Ok(());
        }
        self.set_stage_label("GDD + Math model (15 min)").await;
        self.ui.start_stage("GDD + Math model (15 min)");

        let studio = self.studio.clone();
        let idea = self.idea.clone();
        let layout = self.layout.clone();
        let state = self.state.clone();
        let budget = self.config.timeouts.for_stage("design");

        let outcome = envelope::run_stage("design", budget, move || {
            let market_ctx = layout
                .read_text(&layout.market_report())
                .ok()
                .or_else(|| state.lock().market_research.value().cloned())
                .unwrap_or_default();

            let gdd = generate_document(
                &studio,
                &state,
                &layout,
                "design",
                "gdd",
                &idea.theme,
                gdd_instruction(&idea, &excerpt(&market_ctx, 5000)),
            )?;
            layout.write_text(&layout.gdd(), &gdd)?;
            state.lock().gdd.record_complete(gdd.clone());

            let math = generate_document(
                &studio,
                &state,
                &layout,
                "design",
                "math_model",
                &idea.theme,
                math_instruction(&idea, &excerpt(&gdd, 2000)),
            )?;
            layout.write_text(&layout.math_model_md(), &math)?;
            state.lock().math_model.record_partial(math.clone());

            let sim = generate_document(
                &studio,
                &state,
                &layout,
                "design",
                "simulation",
                &idea.theme,
                simulation_instruction(&idea),
            )?;
            layout.write_text(&layout.simulation_results(), &sim)?;
            if let Some(rtp) = parse_optimized_rtp(&sim) {
                state.lock().optimized_rtp = Some(rtp);
            }

            let behavior = generate_document(
                &studio,
                &state,
                &layout,
                "design",
                "player_behavior",
                &idea.theme,
                behavior_instruction(&idea),
            )?;
            layout.write_text(&layout.player_behavior(), &behavior)?;

            state.lock().math_model.record_complete(math);
            Ok(())
        })
        .await?;

        match outcome {
            StageOutcome::Completed(()) => self.ui.stage_complete("design + math"),
            StageOutcome::TimedOut => self.ui.stage_timed_out("design + math"),
        }
        Ok(())
    }

    async fn checkpoint_design(&self) -> Result<()> {
        if !self.approved("post_research") {
            return Ok(());
        }
        self.set_stage_label("Design review").await;

        let (gdd, math) = {
            let guard = self.state.lock();
            (
                guard.gdd.value().cloned().unwrap_or_default(),
                guard.math_model.value().cloned().unwrap_or_default(),
            )
        };
        let context = format!(
            "Theme: {}\nMarkets: {}\n\nGDD:\n{}\n\nMath model:\n{}",
            self.idea.theme,
            markets_display(&self.idea),
            excerpt(&gdd, 2000),
            excerpt(&math, 2000)
        );
        let summary = format!(
            "Design documents for '{}' are ready: 02_design/gdd.md plus the math \
             model and simulation results under 03_math/. A hostile critique is at \
             adversarial_review_post_design_math.md. Approve to start art.",
            self.idea.theme
        );
        self.checkpoint("post_design_math", summary, context).await
    }

    // ── Stage 4: mood boards ────────────────────────────────────────────────

    async fn mood_boards(&self) -> Result<()> {
        if !self.approved("post_design_math") {
            self.ui
                .stage_skipped("mood boards", "design was not approved");
            return Ok(());
        }
        self.set_stage_label("Mood boards (10 min)").await;
        self.ui.start_stage("Mood boards (10 min)");

        let studio = self.studio.clone();
        let idea = self.idea.clone();
        let layout = self.layout.clone();
        let state = self.state.clone();
        let budget = self.config.timeouts.for_stage("mood_board");

        let outcome = envelope::run_stage("mood_board", budget, move || {
            let gdd_ctx = layout
                .read_text(&layout.gdd())
                .ok()
                .or_else(|| state.lock().gdd.value().cloned())
                .unwrap_or_default();

            let boards = generate_document(
                &studio,
                &state,
                &layout,
                "mood_board",
                "mood_boards",
                &idea.theme,
                mood_board_instruction(&idea, &excerpt(&gdd_ctx, 3000)),
            )?;
            layout.write_text(&layout.mood_board_brief(), &boards)?;
            state.lock().mood_board.record_complete(boards);
            Ok(())
        })
        .await?;

        match outcome {
            StageOutcome::Completed(()) => self.ui.stage_complete("mood boards"),
            StageOutcome::TimedOut => self.ui.stage_timed_out("mood boards"),
        }
        Ok(())
    }

    async fn checkpoint_art(&self) -> Result<()> {
        if !self.approved("post_design_math") {
            return Ok(());
        }
        self.set_stage_label("Art direction review").await;

        let boards = self
            .state
            .lock()
            .mood_board
            .value()
            .cloned()
            .unwrap_or_default();
        let context = format!(
            "Theme: {}\nArt style: {}\n\nMood boards:\n{}",
            self.idea.theme,
            art_style_display(&self.idea),
            excerpt(&boards, 2000)
        );
        let summary = format!(
            "Mood boards for '{}' are ready under 04_art/mood_boards/. A hostile \
             critique is at adversarial_review_post_art_review.md. Approve to \
             start full production.",
            self.idea.theme
        );
        self.checkpoint("post_art_review", summary, context).await
    }

    // ── Stage 5: production ─────────────────────────────────────────────────

    async fn production(&self) -> Result<()> {
        if !self.approved("post_art_review") {
            self.ui
                .stage_skipped("production", "art direction was not approved");
            return Ok(());
        }
        self.set_stage_label("Art + Audio + Compliance (30 min)").await;
        self.ui.start_stage("Art + Audio + Compliance (30 min)");

        let studio = self.studio.clone();
        let idea = self.idea.clone();
        let layout = self.layout.clone();
        let state = self.state.clone();
        let budget = self.config.timeouts.for_stage("production");

        let outcome = envelope::run_stage("production", budget, move || {
            let gdd_ctx = layout
                .read_text(&layout.gdd())
                .ok()
                .or_else(|| state.lock().gdd.value().cloned())
                .unwrap_or_default();

            let art = generate_document(
                &studio,
                &state,
                &layout,
                "production",
                "art_direction",
                &idea.theme,
                art_instruction(&idea, &excerpt(&gdd_ctx, 5000)),
            )?;
            layout.write_text(&layout.art_direction(), &art)?;
            state.lock().art_assets.record_complete(art);

            // The collaborator may drop real sound files into 04_audio while
            // handling this request; the brief documents them either way.
            let brief = generate_document(
                &studio,
                &state,
                &layout,
                "production",
                "audio_brief",
                &idea.theme,
                audio_instruction(&idea, &excerpt(&gdd_ctx, 1500)),
            )?;
            layout.write_text(&layout.audio_brief(), &brief)?;
            let audio_files = layout.count_audio_files();
            if audio_files == 0 {
                info!("no audio files produced, package ships with the design brief only");
            } else {
                info!(audio_files, "audio files produced alongside the brief");
            }
            state.lock().sound_design.record_complete(brief);

            let compliance = generate_document(
                &studio,
                &state,
                &layout,
                "production",
                "compliance_report",
                &idea.theme,
                compliance_instruction(&idea, &excerpt(&gdd_ctx, 2000)),
            )?;
            layout.write_text(&layout.compliance_report_json(), &compliance)?;
            state.lock().compliance.record_partial(compliance.clone());

            let cert = generate_document(
                &studio,
                &state,
                &layout,
                "production",
                "certification_plan",
                &idea.theme,
                certification_instruction(&idea),
            )?;
            layout.write_text(&layout.certification_plan_json(), &cert)?;
            state.lock().certification_plan.record_complete(cert);

            // Prefer prose the generator wrote; otherwise the structured
            // report stands in for it.
            let prose = layout.first_existing_text(&[
                layout.compliance_report_md(),
                layout.compliance_review_md(),
            ]);
            state
                .lock()
                .compliance
                .record_complete(prose.unwrap_or(compliance));
            Ok(())
        })
        .await?;

        match outcome {
            StageOutcome::Completed(()) => self.ui.stage_complete("production"),
            StageOutcome::TimedOut => self.ui.stage_timed_out("production"),
        }
        Ok(())
    }

    // ── Stage 6: assembly ───────────────────────────────────────────────────

    /// Always runs, whatever was approved: every finished job gets a manifest
    /// describing exactly how far it got.
    async fn assemble(&self) -> Result<Manifest> {
        self.set_stage_label("Assembling final package").await;
        self.ui.start_stage("Assembling final package");

        if self.approved("post_art_review") {
            self.generate_prototype().await;
        }

        let package = assembly::collect_documents(&self.state, &self.layout);
        match assembly::render_reports(&self.layout, &self.idea, &package) {
            Ok(files) => {
                let mut guard = self.state.lock();
                guard.report_files.extend(files);
            }
            Err(err) => {
                warn!(error = ?err, "report rendering failed");
                self.state
                    .lock()
                    .push_error(format!("PDF generation failed: {err:#}"));
            }
        }

        envelope::best_effort(
            "knowledge snapshot",
            assembly::save_knowledge_snapshot(&self.layout, &self.idea, &package, &self.state),
        );

        let manifest = {
            let mut guard = self.state.lock();
            guard.completed_at = Some(Utc::now());
            Manifest::build(&guard, &self.idea, &self.layout)
        };
        match manifest.write(&self.layout) {
            Ok(path) => info!(path = %path.display(), "package manifest written"),
            Err(err) => warn!(error = ?err, "failed to write package manifest"),
        }

        self.ui.stage_complete("assembly");
        Ok(manifest)
    }

    /// Best-effort playable mock. It leans on the approved art direction, so
    /// failure costs the prototype, never the package.
    async fn generate_prototype(&self) {
        let studio = self.studio.clone();
        let idea = self.idea.clone();
        let layout = self.layout.clone();
        let state = self.state.clone();
        let budget = self.config.timeouts.for_stage("prototype");

        let result = envelope::run_stage("prototype", budget, move || {
            let gdd_ctx = layout
                .read_text(&layout.gdd())
                .ok()
                .or_else(|| state.lock().gdd.value().cloned())
                .unwrap_or_default();
            let math_ctx = layout
                .read_text(&layout.math_model_md())
                .ok()
                .or_else(|| state.lock().math_model.value().cloned())
                .unwrap_or_default();

            let html = generate_document(
                &studio,
                &state,
                &layout,
                "prototype",
                "prototype",
                &idea.theme,
                prototype_instruction(&idea, &excerpt(&gdd_ctx, 3000), &excerpt(&math_ctx, 2000)),
            )?;
            let path = layout.prototype_index();
            layout.write_text(&path, &html)?;
            Ok(path)
        })
        .await;

        match result {
            Ok(StageOutcome::Completed(path)) => {
                info!(path = %path.display(), "prototype generated");
                self.state.lock().prototype_path = Some(path);
            }
            Ok(StageOutcome::TimedOut) => {
                self.ui
                    .note("prototype generation exceeded its budget, packaging without it");
            }
            Err(err) => {
                warn!(error = ?err, "prototype generation failed (non-fatal)");
                self.ui.warn("prototype generation failed, packaging without it");
            }
        }
    }

    // ── Checkpoint plumbing ─────────────────────────────────────────────────

    /// Run the pre-gate critique, then hold at the checkpoint until decided.
    async fn checkpoint(&self, name: &str, summary: String, context: String) -> Result<()> {
        self.hook.critique(&self.layout, name, context).await;
        self.ui.gate_waiting(name);
        let approved = self
            .gate
            .await_approval(name, &summary, &self.state, &self.layout)
            .await?;
        self.ui.gate_decided(name, approved);
        self.seal_reviewed(name);
        Ok(())
    }

    /// Freeze the slots a reviewer just looked at. An abandoned stage thread
    /// finishing late must not overwrite reviewed content.
    fn seal_reviewed(&self, checkpoint: &str) {
        let mut state = self.state.lock();
        match checkpoint {
            "post_research" => {
                state.trend_radar.seal();
                state.jurisdiction_constraints.seal();
                state.patent_scan.seal();
                state.market_research.seal();
            }
            "post_design_math" => {
                state.gdd.seal();
                state.math_model.seal();
            }
            "post_art_review" => {
                state.mood_board.seal();
            }
            _ => {}
        }
    }

    fn approved(&self, checkpoint: &str) -> bool {
        self.state.lock().approved(checkpoint)
    }

    /// Surface the stage label in the shared store for dashboard pollers.
    async fn set_stage_label(&self, label: &str) {
        if let (Some(db), Some(job_id)) = (&self.db, &self.job_id) {
            let id = job_id.clone();
            let stage = label.to_string();
            envelope::best_effort(
                "update stage label",
                db.call(move |db| db.set_stage(&id, &stage))
                    .await
                    .map_err(anyhow::Error::from),
            );
        }
    }

    fn parameters_line(&self) -> String {
        let idea = &self.idea;
        format!(
            "Volatility {volatility}, target RTP {rtp:.1}%, grid {grid} ({ways}), \
             max win {max_win:.0}x. Markets: {markets}. Features: {features}.",
            volatility = idea.volatility,
            rtp = idea.target_rtp,
            grid = idea.grid(),
            ways = idea.ways_or_lines,
            max_win = idea.max_win_multiplier,
            markets = markets_display(idea),
            features = features_display(idea),
        )
    }
}

// ── Worker-thread helpers ───────────────────────────────────────────────────

/// One studio call on the worker thread, with the spend recorded.
fn generate_document(
    studio: &Arc<dyn Studio>,
    state: &SharedState,
    layout: &ArtifactLayout,
    stage: &str,
    label: &str,
    subject: &str,
    instruction: String,
) -> Result<String> {
    let request = StudioRequest::new(stage, label)
        .with_subject(subject)
        .with_instruction(instruction)
        .with_artifact_dir(layout.root());
    let text = studio.generate(&request)?;
    state.lock().cost.record(label, Usage::for_text(&text));
    Ok(text)
}

/// The five pre-flight probes. Each is independently best-effort: a failed
/// probe costs an artifact, never the stage.
fn preflight_probes(
    studio: &Arc<dyn Studio>,
    idea: &GameIdea,
    layout: &ArtifactLayout,
    state: &SharedState,
) {
    if let Some(radar) = run_probe(
        studio,
        state,
        layout,
        "trend_radar",
        &idea.theme,
        trend_radar_instruction(idea),
        &layout.trend_radar(),
    ) {
        state.lock().trend_radar.record_complete(radar);
    }

    if let Some(constraints) = run_probe(
        studio,
        state,
        layout,
        "jurisdiction_constraints",
        &idea.theme,
        jurisdiction_instruction(idea),
        &layout.jurisdiction_constraints(),
    ) {
        let blockers = manifest::parse_blockers(&constraints);
        let mut guard = state.lock();
        if !blockers.is_empty() {
            warn!(?blockers, "jurisdiction blockers found");
            for blocker in blockers {
                guard.push_error(blocker);
            }
        }
        guard.jurisdiction_constraints.record_complete(constraints);
    }

    // Past designs produce an artifact only when something matched.
    if let Some(designs) = envelope::best_effort(
        "past designs lookup",
        generate_document(
            studio,
            state,
            layout,
            "recon",
            "past_designs",
            &idea.theme,
            past_designs_instruction(idea),
        ),
    ) {
        if !designs.trim().is_empty() {
            envelope::best_effort(
                "save past designs",
                layout.write_text(&layout.past_designs(), &designs),
            );
        }
    }

    if let Some(scan) = run_probe(
        studio,
        state,
        layout,
        "patent_scan",
        &idea.theme,
        patent_instruction(idea),
        &layout.patent_scan(),
    ) {
        state.lock().patent_scan.record_complete(scan);
    }

    for market in &idea.target_markets {
        run_probe(
            studio,
            state,
            layout,
            "market_recon",
            market,
            recon_instruction(market),
            &layout.market_recon(market),
        );
    }
}

/// Best-effort probe: generate one preflight artifact and persist it.
fn run_probe(
    studio: &Arc<dyn Studio>,
    state: &SharedState,
    layout: &ArtifactLayout,
    label: &str,
    subject: &str,
    instruction: String,
    path: &Path,
) -> Option<String> {
    envelope::best_effort(
        label,
        generate_document(studio, state, layout, "recon", label, subject, instruction).and_then(
            |text| {
                layout.write_text(path, &text)?;
                Ok(text)
            },
        ),
    )
}

/// Bounded context block summarizing preflight findings for research prompts.
fn preflight_context(state: &SharedState) -> String {
    let guard = state.lock();
    let mut ctx = String::new();
    if let Some(radar) = guard.trend_radar.value() {
        ctx.push_str("TREND RADAR:\n");
        ctx.push_str(&excerpt(radar, 800));
        ctx.push_str("\n\n");
    }
    if let Some(constraints) = guard.jurisdiction_constraints.value() {
        ctx.push_str("JURISDICTION CONSTRAINTS:\n");
        ctx.push_str(&excerpt(constraints, 800));
        ctx.push_str("\n\n");
    }
    if let Some(scan) = guard.patent_scan.value() {
        ctx.push_str("PATENT SCAN:\n");
        ctx.push_str(&excerpt(scan, 600));
        ctx.push('\n');
    }
    ctx
}

/// Pull the measured RTP out of whatever shape the simulation reported.
fn parse_optimized_rtp(raw: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("optimized_rtp")
        .and_then(serde_json::Value::as_f64)
        .or_else(|| {
            value
                .pointer("/simulation/measured_rtp")
                .and_then(serde_json::Value::as_f64)
        })
}

fn markets_display(idea: &GameIdea) -> String {
    if idea.target_markets.is_empty() {
        "unspecified".to_string()
    } else {
        idea.target_markets.join(", ")
    }
}

fn features_display(idea: &GameIdea) -> String {
    let pretty = idea.features_pretty();
    if pretty.is_empty() {
        "none requested".to_string()
    } else {
        pretty.join(", ")
    }
}

fn art_style_display(idea: &GameIdea) -> &str {
    if idea.art_style.is_empty() {
        "open (no fixed style requested)"
    } else {
        &idea.art_style
    }
}

// ── Work unit instructions ──────────────────────────────────────────────────

fn trend_radar_instruction(idea: &GameIdea) -> String {
    format!(
        "Survey the current slot market around the theme '{}'. Identify rising and \
         cooling themes and mechanics and judge how saturated this theme is. Return \
         JSON with rising_themes, rising_mechanics, cooling_themes, and notes.",
        idea.theme
    )
}

fn jurisdiction_instruction(idea: &GameIdea) -> String {
    format!(
        "Compute the regulatory intersection for launching in: {}. Proposed: RTP \
         {:.1}%, max win {:.0}x, features: {}. Return JSON with a per_market object \
         and an intersection object carrying blockers and restricted_features. Any \
         blocker must name the offending market.",
        markets_display(idea),
        idea.target_rtp,
        idea.max_win_multiplier,
        features_display(idea),
    )
}

fn past_designs_instruction(idea: &GameIdea) -> String {
    format!(
        "Search prior internal designs matching '{} {} slot game' and summarize \
         anything reusable as JSON with a results array. Return an empty results \
         array when nothing applies.",
        idea.theme, idea.volatility
    )
}

fn patent_instruction(idea: &GameIdea) -> String {
    format!(
        "Check the proposed mechanics for patent or IP conflicts: {}. Theme: '{}'. \
         Return JSON with risk_level, flagged_mechanics, cleared_mechanics, and \
         recommendations.",
        features_display(idea),
        idea.theme
    )
}

fn recon_instruction(market: &str) -> String {
    format!(
        "Summarize current regulatory requirements and market conditions for {market}: \
         licensing, RTP floors, feature restrictions, and certification expectations. \
         Return JSON."
    )
}

fn market_sweep_instruction(idea: &GameIdea, preflight_ctx: &str) -> String {
    let mut instruction = format!(
        "Survey the closest recent releases for a {}-volatility slot themed '{}': \
         mechanics, grids, RTP, and how each performed. Cover at least ten titles \
         from the last two years.",
        idea.volatility, idea.theme
    );
    if !preflight_ctx.is_empty() {
        instruction.push_str("\n\nPre-flight findings:\n");
        instruction.push_str(preflight_ctx);
    }
    instruction
}

fn competitor_instruction(idea: &GameIdea, sweep_excerpt: &str) -> String {
    let references = if idea.competitor_references.is_empty() {
        "none given".to_string()
    } else {
        idea.competitor_references.join(", ")
    };
    format!(
        "Pick the strongest direct competitors to '{}' and analyze them in depth: \
         feature sets, session pacing, what players praise and what makes them \
         quit. Known references: {}. Market sweep so far:\n{}",
        idea.theme, references, sweep_excerpt
    )
}

fn market_report_instruction(idea: &GameIdea, sweep: &str, dive: &str) -> String {
    format!(
        "Write the final market research report for '{}' in markdown with sections \
         Competitive Landscape, Player Preferences, Differentiation Opportunities, \
         and Recommendation. Ground every claim in the material below.\n\n\
         {sweep}\n\n{dive}",
        idea.theme
    )
}

fn gdd_instruction(idea: &GameIdea, market_ctx: &str) -> String {
    format!(
        "Write the complete game design document for '{}' in markdown: overview, \
         symbol set, {} grid with {}, full rules for each requested feature \
         ({}), bonus flow, art direction notes, and sound direction. Volatility \
         {}, target RTP {:.1}%, max win {:.0}x.\n\nMarket research:\n{}",
        idea.theme,
        idea.grid(),
        idea.ways_or_lines,
        features_display(idea),
        idea.volatility,
        idea.target_rtp,
        idea.max_win_multiplier,
        market_ctx
    )
}

fn math_instruction(idea: &GameIdea, gdd_excerpt: &str) -> String {
    format!(
        "Build the math model for '{}': reel strips, paytable, RTP allocation \
         across base game and features, and hit frequency targets for {} \
         volatility at {:.1}% RTP with a {:.0}x max win. Document the model in \
         markdown.\n\nGDD:\n{}",
        idea.theme, idea.volatility, idea.target_rtp, idea.max_win_multiplier, gdd_excerpt
    )
}

fn simulation_instruction(idea: &GameIdea) -> String {
    format!(
        "Simulate the proposed math model and report the run as JSON with \
         optimized_rtp, hit_frequency, volatility_index, max_win_multiplier_hit, \
         spins_simulated, and rtp_breakdown. Target RTP {:.1}%.",
        idea.target_rtp
    )
}

fn behavior_instruction(idea: &GameIdea) -> String {
    format!(
        "Model expected player behavior for a {}-volatility game at {:.1}% RTP: \
         session length, bet level distribution, bonus reach rate, and retention \
         risk. Return JSON.",
        idea.volatility, idea.target_rtp
    )
}

fn mood_board_instruction(idea: &GameIdea, gdd_excerpt: &str) -> String {
    format!(
        "Describe three distinct mood boards for '{}' in the direction '{}': \
         palette, lighting, texture, UI feel, and a recommendation for which board \
         leads.\n\nGDD visual direction:\n{}",
        idea.theme,
        art_style_display(idea),
        gdd_excerpt
    )
}

fn art_instruction(idea: &GameIdea, gdd_excerpt: &str) -> String {
    format!(
        "Write the production art direction for '{}': final palette, symbol \
         treatment for each premium and royal, background set per game state, and \
         UI rules. Style: {}.\n\nGDD:\n{}",
        idea.theme,
        art_style_display(idea),
        gdd_excerpt
    )
}

fn audio_instruction(idea: &GameIdea, gdd_excerpt: &str) -> String {
    format!(
        "Write the audio design brief for '{}': base loop, win and feature \
         stingers, and the full effects list with file names.\n\nGDD:\n{}",
        idea.theme, gdd_excerpt
    )
}

fn compliance_instruction(idea: &GameIdea, gdd_excerpt: &str) -> String {
    format!(
        "Review '{}' for regulatory compliance in: {}. Evaluate RTP {:.1}%, max \
         win {:.0}x, and each feature against jurisdiction rules. Return JSON with \
         status, jurisdictions_evaluated, findings (severity and item), \
         rng_requirements, and responsible_gaming.\n\nGDD:\n{}",
        idea.theme,
        markets_display(idea),
        idea.target_rtp,
        idea.max_win_multiplier,
        gdd_excerpt
    )
}

fn certification_instruction(idea: &GameIdea) -> String {
    format!(
        "Plan the certification path for launching '{}' in: {}. Return JSON with \
         test_labs, standards, submission_artifacts, and estimated_weeks.",
        idea.theme,
        markets_display(idea)
    )
}

fn prototype_instruction(idea: &GameIdea, gdd_excerpt: &str, math_excerpt: &str) -> String {
    format!(
        "Produce a self-contained HTML5 page mocking the '{}' base game: a static \
         {} reel grid, theme styling, no spin logic.\n\nGDD:\n{}\n\nMath:\n{}",
        idea.theme,
        idea.grid(),
        gdd_excerpt,
        math_excerpt
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SlotStatus;
    use crate::studio::TemplateStudio;
    use tempfile::tempdir;

    fn offline_config(root: &Path) -> StudioConfig {
        StudioConfig::default()
            .with_output_root(root.join("output"))
            .with_db_path(root.join("studio.db"))
            .with_log_dir(root.join("logs"))
            .with_auto_approve(true)
    }

    // =========================================
    // Full offline run
    // =========================================

    #[tokio::test]
    async fn test_offline_run_produces_complete_package() {
        let dir = tempdir().unwrap();
        let config = offline_config(dir.path());
        let idea = GameIdea::new("Test Gold Rush");
        let pipeline = StudioPipeline::new(config, idea, Arc::new(TemplateStudio::new()));
        let layout = pipeline.layout().clone();
        let state = pipeline.state().clone();

        let manifest = pipeline.run().await.unwrap();

        let guard = state.lock();
        assert!(guard.market_research.is_complete());
        assert!(guard.gdd.is_complete());
        assert!(guard.math_model.is_complete());
        assert!(guard.mood_board.is_complete());
        assert!(guard.art_assets.is_complete());
        assert!(guard.sound_design.is_complete());
        assert!(guard.compliance.is_complete());
        assert!(guard.certification_plan.is_complete());
        assert_eq!(guard.optimized_rtp, Some(96.02));
        assert!(guard.prototype_path.is_some());
        assert_eq!(guard.approvals().len(), 3);
        assert!(guard.approvals().values().all(|r| r.approved));
        assert!(guard.errors.is_empty());
        drop(guard);

        assert!(layout.gdd().is_file());
        assert!(layout.simulation_results().is_file());
        assert!(layout.market_research_json().is_file());
        assert!(layout.prototype_index().is_file());
        assert!(layout.knowledge_snapshot().is_file());
        assert!(layout.manifest().is_file());
        assert_eq!(layout.adversarial_reviews().len(), 3);

        assert_eq!(manifest.stages.market_research, SlotStatus::Complete);
        assert_eq!(manifest.stages.prototype, SlotStatus::Complete);
        assert_eq!(manifest.optimized_rtp, Some(96.02));
        assert!(manifest.errors.is_empty());
        assert!(!manifest.report_files.is_empty());
        assert!(manifest.cost.total_tokens > 0);
    }

    #[tokio::test]
    async fn test_reviewed_slots_are_sealed_after_checkpoints() {
        let dir = tempdir().unwrap();
        let config = offline_config(dir.path());
        let idea = GameIdea::new("Seal Check");
        let pipeline = StudioPipeline::new(config, idea, Arc::new(TemplateStudio::new()));
        let state = pipeline.state().clone();

        pipeline.run().await.unwrap();

        let mut guard = state.lock();
        assert!(guard.market_research.is_sealed());
        assert!(guard.gdd.is_sealed());
        assert!(guard.mood_board.is_sealed());
        // A straggler write from an abandoned thread is discarded
        assert!(!guard.gdd.record_complete("late write".to_string()));
    }

    // =========================================
    // Simulation result parsing
    // =========================================

    #[test]
    fn test_parse_optimized_rtp_top_level() {
        let raw = r#"{"optimized_rtp": 96.4, "spins_simulated": 1000}"#;
        assert_eq!(parse_optimized_rtp(raw), Some(96.4));
    }

    #[test]
    fn test_parse_optimized_rtp_nested_fallback() {
        let raw = r#"{"simulation": {"measured_rtp": 95.8}}"#;
        assert_eq!(parse_optimized_rtp(raw), Some(95.8));
    }

    #[test]
    fn test_parse_optimized_rtp_rejects_garbage() {
        assert_eq!(parse_optimized_rtp("not json"), None);
        assert_eq!(parse_optimized_rtp(r#"{"optimized_rtp": "high"}"#), None);
        assert_eq!(parse_optimized_rtp("{}"), None);
    }

    // =========================================
    // Display helpers
    // =========================================

    #[test]
    fn test_display_helpers_cover_empty_inputs() {
        let idea = GameIdea::new("Bare");
        assert_eq!(markets_display(&idea), "unspecified");
        assert_eq!(features_display(&idea), "none requested");
        assert_eq!(art_style_display(&idea), "open (no fixed style requested)");

        let mut rich = GameIdea::new("Rich");
        rich.target_markets = vec!["UK".into(), "Malta".into()];
        rich.requested_features = vec!["free_spins".into()];
        rich.art_style = "painterly".into();
        assert_eq!(markets_display(&rich), "UK, Malta");
        assert_eq!(features_display(&rich), "Free Spins");
        assert_eq!(art_style_display(&rich), "painterly");
    }
}
