//! Runtime configuration for the slotsmith executor.
//!
//! One `StudioConfig` is built in `main` and passed by reference into the
//! executor — there are no ambient globals. Values layer:
//! built-in defaults → `slotsmith.toml` (if present) → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! db_path = "slotsmith.db"
//!
//! [paths]
//! output_root = "output"
//! log_dir = "logs"
//!
//! [timeouts]
//! research = 900
//! design = 900
//! mood_board = 600
//! production = 1800
//! recon = 600
//!
//! [gate]
//! enabled = true
//! max_wait_secs = 7200
//! poll_interval_secs = 5
//!
//! [recovery]
//! staleness_minutes = 75
//!
//! [studio]
//! command = "claude"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name searched for in the working directory.
pub const CONFIG_FILE: &str = "slotsmith.toml";

/// Per-stage wall-clock budgets, seconds.
///
/// A stage that exceeds its budget is abandoned, not killed — see
/// [`crate::envelope`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub research: u64,
    pub design: u64,
    pub mood_board: u64,
    pub production: u64,
    /// Budget for the adversarial review hook.
    pub recon: u64,
    /// Budget for any stage without a specific entry.
    pub fallback: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            research: 900,
            design: 900,
            mood_board: 600,
            production: 1800,
            recon: 600,
            fallback: 1200,
        }
    }
}

impl StageTimeouts {
    /// Budget for a named stage, falling back for unknown names.
    pub fn for_stage(&self, stage: &str) -> Duration {
        let secs = match stage {
            "research" => self.research,
            "design" => self.design,
            "mood_board" => self.mood_board,
            "production" => self.production,
            "recon" => self.recon,
            _ => self.fallback,
        };
        Duration::from_secs(secs)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_u64("TIMEOUT_RESEARCH") {
            self.research = v;
        }
        if let Some(v) = env_u64("TIMEOUT_DESIGN") {
            self.design = v;
        }
        if let Some(v) = env_u64("TIMEOUT_MOOD") {
            self.mood_board = v;
        }
        if let Some(v) = env_u64("TIMEOUT_PRODUCTION") {
            self.production = v;
        }
        if let Some(v) = env_u64("TIMEOUT_RECON") {
            self.recon = v;
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Runtime configuration for one slotsmith process.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// Shared job + review database.
    pub db_path: PathBuf,
    /// Parent directory for per-job output trees.
    pub output_root: PathBuf,
    /// Directory for per-job worker log files.
    pub log_dir: PathBuf,
    pub timeouts: StageTimeouts,
    /// When `false`, every checkpoint auto-approves.
    pub hitl_enabled: bool,
    /// Explicit auto-approve flag for this run (`--auto`).
    pub auto_approve: bool,
    /// Maximum time the gate blocks on a remote decision.
    pub gate_max_wait: Duration,
    /// Remote decision poll interval.
    pub gate_poll_interval: Duration,
    /// Jobs still queued/running past this age are reaped as failed.
    pub staleness: Duration,
    /// External content command; `None` selects the offline template studio.
    pub studio_cmd: Option<String>,
    pub verbose: bool,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("slotsmith.db"),
            output_root: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            timeouts: StageTimeouts::default(),
            hitl_enabled: true,
            auto_approve: false,
            gate_max_wait: Duration::from_secs(7200),
            gate_poll_interval: Duration::from_secs(5),
            staleness: Duration::from_secs(75 * 60),
            studio_cmd: None,
            verbose: false,
        }
    }
}

// ── Config file schema ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    store: StoreSection,
    paths: PathsSection,
    timeouts: StageTimeouts,
    gate: GateSection,
    recovery: RecoverySection,
    studio: StudioSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoreSection {
    db_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PathsSection {
    output_root: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct GateSection {
    enabled: bool,
    max_wait_secs: u64,
    poll_interval_secs: u64,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_wait_secs: 7200,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RecoverySection {
    staleness_minutes: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            staleness_minutes: 75,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StudioSection {
    command: Option<String>,
}

impl StudioConfig {
    /// Build the layered configuration: defaults, then `slotsmith.toml` in
    /// `dir` if present, then environment overrides.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut config = Self::default();

        let file_path = dir.join(CONFIG_FILE);
        if file_path.exists() {
            let content = std::fs::read_to_string(&file_path)
                .with_context(|| format!("Failed to read {}", file_path.display()))?;
            let file: ConfigFile = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", file_path.display()))?;
            config.merge_file(file);
        }

        config.apply_env();
        Ok(config)
    }

    fn merge_file(&mut self, file: ConfigFile) {
        if let Some(db) = file.store.db_path {
            self.db_path = db;
        }
        if let Some(out) = file.paths.output_root {
            self.output_root = out;
        }
        if let Some(logs) = file.paths.log_dir {
            self.log_dir = logs;
        }
        self.timeouts = file.timeouts;
        self.hitl_enabled = file.gate.enabled;
        self.gate_max_wait = Duration::from_secs(file.gate.max_wait_secs);
        self.gate_poll_interval = Duration::from_secs(file.gate.poll_interval_secs);
        self.staleness = Duration::from_secs(file.recovery.staleness_minutes * 60);
        if file.studio.command.is_some() {
            self.studio_cmd = file.studio.command;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("DB_PATH") {
            self.db_path = PathBuf::from(db);
        }
        if let Ok(out) = std::env::var("OUTPUT_DIR") {
            self.output_root = PathBuf::from(out);
        }
        if let Ok(logs) = std::env::var("LOG_DIR") {
            self.log_dir = PathBuf::from(logs);
        }
        if let Ok(v) = std::env::var("HITL_ENABLED") {
            self.hitl_enabled = v != "false";
        }
        if let Ok(cmd) = std::env::var("STUDIO_CMD") {
            self.studio_cmd = Some(cmd);
        }
        self.timeouts.apply_env();
    }

    /// Create the output and log directories if missing.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_root)
            .context("Failed to create output root directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = path.into();
        self
    }

    pub fn with_log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_dir = path.into();
        self
    }

    pub fn with_auto_approve(mut self, auto: bool) -> Self {
        self.auto_approve = auto;
        self
    }

    pub fn with_hitl_enabled(mut self, enabled: bool) -> Self {
        self.hitl_enabled = enabled;
        self
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_gate_waits(mut self, max_wait: Duration, poll_interval: Duration) -> Self {
        self.gate_max_wait = max_wait;
        self.gate_poll_interval = poll_interval;
        self
    }

    pub fn with_staleness(mut self, staleness: Duration) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn with_studio_cmd(mut self, cmd: Option<String>) -> Self {
        self.studio_cmd = cmd;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
