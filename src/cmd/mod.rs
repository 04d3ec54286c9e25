//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled              |
//! |----------|-------------------------------|
//! | `run`    | `Run`                         |
//! | `jobs`   | `Jobs`, `Status`, `Recover`   |
//! | `review` | `Reviews`, `Review`           |

pub mod jobs;
pub mod review;
pub mod run;

pub use jobs::{cmd_jobs, cmd_recover, cmd_status};
pub use review::{cmd_review, cmd_reviews};
pub use run::{RunOptions, cmd_run};

use anyhow::{Context, Result};
use slotsmith::config::StudioConfig;
use slotsmith::store::{DbHandle, StudioDb};

use super::Cli;

/// Resolve configuration for one command: file and environment layers first,
/// then the global CLI flags on top.
fn resolve_config(cli: &Cli) -> Result<StudioConfig> {
    let dir = std::env::current_dir().context("Failed to get current directory")?;
    let mut config = StudioConfig::load(&dir)?.with_verbose(cli.verbose);
    if let Some(db) = &cli.db {
        config = config.with_db_path(db);
    }
    Ok(config)
}

/// Open the shared job store named by the resolved configuration.
fn open_store(config: &StudioConfig) -> Result<DbHandle> {
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create job store directory")?;
    }
    let db = StudioDb::open(&config.db_path).with_context(|| {
        format!("Failed to open job store at {}", config.db_path.display())
    })?;
    Ok(DbHandle::new(db))
}
