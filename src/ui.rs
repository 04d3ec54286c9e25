//! Terminal UI for a pipeline run, rendered via `indicatif` progress bars.
//!
//! Two bars are stacked vertically:
//! - Stage bar — tracks how many pipeline stages have completed
//! - Status spinner — the activity currently holding the run (a generating
//!   stage, or a checkpoint waiting on a reviewer)
//!
//! All other output goes through `MultiProgress` so printed lines never tear
//! the bars.

use console::{Emoji, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crate::manifest::Manifest;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "*");

pub struct PipelineUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    status_bar: ProgressBar,
    verbose: bool,
}

impl PipelineUI {
    /// Create the UI. `total_stages` sizes the stage bar; call once before
    /// the first stage starts.
    pub fn new(total_stages: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let stage_bar = multi.add(ProgressBar::new(total_stages));
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stages");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("   Now");

        Self {
            multi,
            stage_bar,
            status_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI is unavailable. Keeps rejection and error lines from being
    /// silently lost.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Full-width header block printed once at job start.
    pub fn banner(&self, title: &str, body: &str) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} {}",
            style("▶").green().bold(),
            style(title).bold()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        for line in textwrap::wrap(body, 68) {
            self.print_line(format!("  {line}"));
        }
        self.print_line("");
    }

    pub fn start_stage(&self, label: &str) {
        self.status_bar
            .set_message(format!("{}", style(label).yellow()));
        self.status_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn stage_complete(&self, name: &str) {
        self.stage_bar.inc(1);
        self.print_line(format!("{}{} complete", CHECK, style(name).green()));
    }

    pub fn stage_timed_out(&self, name: &str) {
        self.stage_bar.inc(1);
        self.print_line(format!(
            "{}{} exceeded its budget, abandoned and moving on",
            CLOCK,
            style(name).yellow().bold()
        ));
    }

    pub fn stage_skipped(&self, name: &str, reason: &str) {
        self.stage_bar.inc(1);
        self.print_line(format!(
            "  {} {} skipped: {}",
            style("→").dim(),
            style(name).dim(),
            style(reason).dim()
        ));
    }

    pub fn gate_waiting(&self, checkpoint: &str) {
        self.status_bar.set_message(format!(
            "{}waiting for approval at {}",
            REVIEW,
            style(checkpoint).yellow()
        ));
    }

    pub fn gate_decided(&self, checkpoint: &str, approved: bool) {
        if approved {
            self.print_line(format!("{}{} approved", CHECK, style(checkpoint).green()));
        } else {
            self.print_line(format!(
                "{}{} rejected",
                CROSS,
                style(checkpoint).red().bold()
            ));
        }
    }

    /// Dim progress detail, verbose runs only.
    pub fn note(&self, msg: &str) {
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    pub fn warn(&self, msg: &str) {
        self.print_line(format!(
            "  {} {}",
            style("!").yellow().bold(),
            style(msg).yellow()
        ));
    }

    /// Final summary block once the manifest is written.
    pub fn completion(&self, root: &Path, manifest: &Manifest, elapsed: Duration) {
        self.status_bar.finish_and_clear();
        self.stage_bar.finish();

        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).green()));
        self.print_line(format!(
            "{}{}",
            PACKAGE,
            style(format!("Package complete: {}", manifest.game_slug))
                .green()
                .bold()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).green()));
        self.print_line(format!("  {}{}", FOLDER, root.display()));
        self.print_line(format!(
            "  {} files, {} images",
            style(manifest.total_files).cyan(),
            style(manifest.total_images).cyan()
        ));
        self.print_line(format!(
            "  {} tokens, est. ${:.2}",
            manifest.cost.total_tokens, manifest.cost.estimated_cost_usd
        ));
        if manifest.errors.is_empty() {
            self.print_line(format!("  {}", style("no errors recorded").dim()));
        } else {
            self.print_line(format!(
                "  {}",
                style(format!("{} error(s) recorded, see manifest", manifest.errors.len()))
                    .yellow()
            ));
        }
        self.print_line(format!(
            "  finished in {}",
            style(format_duration(elapsed)).dim()
        ));
        self.print_line("");
    }

    pub fn run_failed(&self, error: &str) {
        self.status_bar.finish_and_clear();
        self.stage_bar.abandon();
        self.print_line(format!(
            "{}{}",
            CROSS,
            style(format!("Pipeline failed: {error}")).red().bold()
        ));
    }
}

/// `5400s` reads worse than `1h 30m 0s` on a long run.
fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0ms");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }
}
