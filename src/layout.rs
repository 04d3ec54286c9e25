//! Per-job artifact tree: a fixed stage-numbered skeleton with stable,
//! predictable paths for every well-known file.
//!
//! Stages write their primary output both into pipeline state and to disk
//! here; downstream consumers prefer the on-disk copy, which survives
//! process restarts and the timeout race. No path is invented ad hoc: every
//! file a stage produces is derived from the job root and a name defined in
//! this module. Reads are last-writer-wins, which is acceptable because the
//! only concurrent writer is an abandoned timed-out stage.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Stage-numbered subdirectories created for every job.
const SKELETON: &[&str] = &[
    "00_preflight",
    "01_research",
    "02_design",
    "03_math",
    "04_art/mood_boards",
    "04_art/symbols",
    "04_art/backgrounds",
    "04_art/ui",
    "04_audio",
    "05_legal",
    "06_pdf",
    "07_prototype",
];

/// Extensions counted as generated imagery in the manifest.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Handle to one job's output tree at `<output-root>/<game-slug>/`.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(output_root: &Path, game_slug: &str) -> Self {
        Self {
            root: output_root.join(game_slug),
        }
    }

    /// Wrap an existing job root directly.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the full directory skeleton. Idempotent: re-running against an
    /// existing tree changes nothing and loses nothing.
    pub fn ensure_skeleton(&self) -> Result<()> {
        for sub in SKELETON {
            let dir = self.root.join(sub);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    // Stage directories

    pub fn preflight_dir(&self) -> PathBuf {
        self.root.join("00_preflight")
    }

    pub fn research_dir(&self) -> PathBuf {
        self.root.join("01_research")
    }

    pub fn design_dir(&self) -> PathBuf {
        self.root.join("02_design")
    }

    pub fn math_dir(&self) -> PathBuf {
        self.root.join("03_math")
    }

    pub fn art_dir(&self) -> PathBuf {
        self.root.join("04_art")
    }

    pub fn mood_boards_dir(&self) -> PathBuf {
        self.art_dir().join("mood_boards")
    }

    pub fn symbols_dir(&self) -> PathBuf {
        self.art_dir().join("symbols")
    }

    pub fn backgrounds_dir(&self) -> PathBuf {
        self.art_dir().join("backgrounds")
    }

    pub fn ui_dir(&self) -> PathBuf {
        self.art_dir().join("ui")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("04_audio")
    }

    pub fn legal_dir(&self) -> PathBuf {
        self.root.join("05_legal")
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join("06_pdf")
    }

    pub fn prototype_dir(&self) -> PathBuf {
        self.root.join("07_prototype")
    }

    // Preflight artifacts

    pub fn trend_radar(&self) -> PathBuf {
        self.preflight_dir().join("trend_radar.json")
    }

    pub fn jurisdiction_constraints(&self) -> PathBuf {
        self.preflight_dir().join("jurisdiction_constraints.json")
    }

    pub fn past_designs(&self) -> PathBuf {
        self.preflight_dir().join("past_designs.json")
    }

    pub fn patent_scan(&self) -> PathBuf {
        self.preflight_dir().join("patent_scan.json")
    }

    pub fn market_recon(&self, market: &str) -> PathBuf {
        self.preflight_dir()
            .join(format!("recon_{}.json", file_token(market)))
    }

    // Research artifacts

    pub fn market_report(&self) -> PathBuf {
        self.research_dir().join("market_report.md")
    }

    pub fn market_research_json(&self) -> PathBuf {
        self.research_dir().join("market_research.json")
    }

    // Design artifacts

    pub fn gdd(&self) -> PathBuf {
        self.design_dir().join("gdd.md")
    }

    pub fn mood_board_brief(&self) -> PathBuf {
        self.mood_boards_dir().join("mood_boards.md")
    }

    pub fn art_direction(&self) -> PathBuf {
        self.art_dir().join("art_direction.md")
    }

    pub fn gdd_txt(&self) -> PathBuf {
        self.design_dir().join("gdd.txt")
    }

    pub fn gdd_json(&self) -> PathBuf {
        self.design_dir().join("gdd.json")
    }

    // Math artifacts

    pub fn simulation_results(&self) -> PathBuf {
        self.math_dir().join("simulation_results.json")
    }

    pub fn player_behavior(&self) -> PathBuf {
        self.math_dir().join("player_behavior.json")
    }

    pub fn math_report(&self) -> PathBuf {
        self.math_dir().join("math_report.md")
    }

    pub fn math_model_md(&self) -> PathBuf {
        self.math_dir().join("math_model.md")
    }

    /// All CSVs in the math directory (reel strips, paytable), sorted by
    /// file name.
    pub fn math_csv_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.math_dir())
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
            .collect();
        files.sort();
        files
    }

    // Legal artifacts

    pub fn compliance_report_json(&self) -> PathBuf {
        self.legal_dir().join("compliance_report.json")
    }

    pub fn certification_plan_json(&self) -> PathBuf {
        self.legal_dir().join("certification_plan.json")
    }

    pub fn compliance_report_md(&self) -> PathBuf {
        self.legal_dir().join("compliance_report.md")
    }

    pub fn compliance_review_md(&self) -> PathBuf {
        self.legal_dir().join("compliance_review.md")
    }

    // Audio artifacts

    pub fn audio_brief(&self) -> PathBuf {
        self.audio_dir().join("audio_design_brief.md")
    }

    // Package artifacts

    /// A rendered report document in the package directory.
    pub fn report_document(&self, name: &str) -> PathBuf {
        self.pdf_dir().join(format!("{}.md", file_token(name)))
    }

    pub fn prototype_index(&self) -> PathBuf {
        self.prototype_dir().join("index.html")
    }

    // Root-level artifacts

    pub fn adversarial_review(&self, checkpoint: &str) -> PathBuf {
        self.root
            .join(format!("adversarial_review_{}.md", file_token(checkpoint)))
    }

    /// All adversarial review files present at the root, sorted.
    pub fn adversarial_reviews(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("adversarial_review_") && n.ends_with(".md"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("PACKAGE_MANIFEST.json")
    }

    /// Compact design record meant for retrieval by future runs.
    pub fn knowledge_snapshot(&self) -> PathBuf {
        self.root.join("knowledge_snapshot.json")
    }

    // File helpers

    /// Write text, creating parent directories as needed.
    pub fn write_text(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn read_text(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// First candidate that exists and reads cleanly, for fallback chains.
    pub fn first_existing_text(&self, candidates: &[PathBuf]) -> Option<String> {
        candidates
            .iter()
            .filter(|p| p.is_file())
            .find_map(|p| std::fs::read_to_string(p).ok())
    }

    /// Every file under the root, root-relative, sorted by path.
    pub fn list_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .map(Path::to_path_buf)
                    .ok()
            })
            .collect();
        files.sort();
        files
    }

    /// The most recently modified files, root-relative, oldest first. Used
    /// to give checkpoint reviewers the tail of the artifact trail.
    pub fn latest_files(&self, limit: usize) -> Vec<PathBuf> {
        let mut stamped: Vec<(SystemTime, PathBuf)> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let modified = entry.metadata().ok()?.modified().ok()?;
                let rel = entry.path().strip_prefix(&self.root).ok()?.to_path_buf();
                Some((modified, rel))
            })
            .collect();
        stamped.sort();
        let skip = stamped.len().saturating_sub(limit);
        stamped.into_iter().skip(skip).map(|(_, p)| p).collect()
    }

    /// Count of produced sound files in the audio directory.
    pub fn count_audio_files(&self) -> usize {
        std::fs::read_dir(self.audio_dir())
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_lowercase().as_str(), "mp3" | "wav"))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Count of generated image files across the whole tree.
    pub fn count_images(&self) -> usize {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .count()
    }
}

/// Lowercase a name into a safe file-name token.
fn file_token(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
