//! The worker command: `slotsmith run` executes one pipeline job end to end.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use slotsmith::config::StudioConfig;
use slotsmith::idea::{GameIdea, Volatility};
use slotsmith::studio::{CommandStudio, Studio, TemplateStudio};

use super::super::{Cli, init_tracing};

/// Everything the `run` subcommand accepts besides the global flags.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub idea_file: Option<PathBuf>,
    pub theme: Option<String>,
    pub art_style: Option<String>,
    pub volatility: Option<Volatility>,
    pub markets: Option<String>,
    pub features: Option<String>,
    pub auto: bool,
    pub job_id: Option<String>,
    pub output_root: Option<PathBuf>,
    pub studio_cmd: Option<String>,
    pub offline: bool,
}

pub async fn cmd_run(cli: &Cli, opts: RunOptions) -> Result<()> {
    use slotsmith::envelope;
    use slotsmith::pipeline::StudioPipeline;

    let mut config = super::resolve_config(cli)?;
    if let Some(root) = &opts.output_root {
        config = config.with_output_root(root);
    }
    if let Some(cmd) = &opts.studio_cmd {
        config = config.with_studio_cmd(Some(cmd.clone()));
    }
    if opts.auto {
        config = config.with_auto_approve(true);
    }
    config.ensure_directories()?;

    // Joined jobs keep their external id; fresh jobs mint one, so the log
    // file can be named before the row exists.
    let job_id = opts
        .job_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let log_file = config.log_dir.join(format!("{job_id}.log"));
    let _log_guard = init_tracing(config.verbose, Some(&log_file));

    let db = super::open_store(&config)?;

    // Clear out anything a crashed worker left behind before taking on work
    let staleness_minutes = config.staleness.as_secs() / 60;
    if let Some(reaped) = envelope::best_effort(
        "startup stale-job sweep",
        db.call(move |db| db.reap_stale(staleness_minutes))
            .await
            .map_err(anyhow::Error::from),
    ) {
        if !reaped.is_empty() {
            info!(count = reaped.len(), "reaped stale jobs on startup");
        }
    }

    let idea = match &opts.job_id {
        Some(id) => {
            let lookup = id.clone();
            let row = db
                .call(move |db| db.require_job(&lookup))
                .await
                .with_context(|| format!("Cannot join job {id}"))?;
            if row.status.is_terminal() {
                anyhow::bail!("Job {} already finished as {}", id, row.status);
            }
            resolve_idea(&opts, Some(&row.params))?
        }
        None => {
            let idea = resolve_idea(&opts, None)?;
            let row_id = job_id.clone();
            let title = idea.theme.clone();
            let params =
                serde_json::to_string(&idea).context("Failed to serialize game parameters")?;
            db.call(move |db| db.create_job(&row_id, &title, &params))
                .await
                .context("Failed to create job row")?;
            idea
        }
    };

    let studio = select_studio(&config, opts.offline)?;
    let pipeline = StudioPipeline::new(config, idea, studio).with_store(db.clone(), &job_id);

    let code = match pipeline.run().await {
        Ok(_) => 0,
        Err(err) => {
            tracing::error!(error = ?err, "pipeline run failed");
            1
        }
    };

    // Timed-out stages may have left detached worker threads behind; a plain
    // return would hang runtime shutdown waiting for them.
    drop(_log_guard);
    std::process::exit(code);
}

/// Build the game idea from, in precedence order: an idea file, an inline
/// theme, or the params carried by a joined job row. Inline field flags
/// override whichever base was used.
fn resolve_idea(opts: &RunOptions, row_params: Option<&str>) -> Result<GameIdea> {
    let mut idea = if let Some(path) = &opts.idea_file {
        GameIdea::load(path)?
    } else if let Some(theme) = &opts.theme {
        GameIdea::new(theme)
    } else if let Some(params) = row_params {
        serde_json::from_str(params).context("Job row carries unparseable game parameters")?
    } else {
        anyhow::bail!("Describe the game with --idea <file> or --theme <line>.");
    };

    if let Some(style) = &opts.art_style {
        idea.art_style = style.clone();
    }
    if let Some(volatility) = opts.volatility {
        idea.volatility = volatility;
    }
    if let Some(markets) = &opts.markets {
        idea.target_markets = split_list(markets);
    }
    if let Some(features) = &opts.features {
        idea.requested_features = split_list(features);
    }
    Ok(idea)
}

/// Pick the content generator. `--offline` forces templates; otherwise the
/// configured studio command runs, with templates as the unconfigured
/// fallback so the pipeline stays usable out of the box.
fn select_studio(config: &StudioConfig, offline: bool) -> Result<Arc<dyn Studio>> {
    if offline {
        return Ok(Arc::new(TemplateStudio::new()));
    }
    match &config.studio_cmd {
        Some(cmd) => Ok(Arc::new(CommandStudio::from_command_line(cmd)?)),
        None => {
            tracing::warn!("no studio command configured, using the offline template generator");
            Ok(Arc::new(TemplateStudio::new()))
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_opts() -> RunOptions {
        RunOptions {
            idea_file: None,
            theme: None,
            art_style: None,
            volatility: None,
            markets: None,
            features: None,
            auto: false,
            job_id: None,
            output_root: None,
            studio_cmd: None,
            offline: false,
        }
    }

    #[test]
    fn test_resolve_idea_requires_some_source() {
        let err = resolve_idea(&bare_opts(), None).unwrap_err();
        assert!(err.to_string().contains("--idea"));
    }

    #[test]
    fn test_resolve_idea_from_row_params() {
        let params = r#"{"theme": "Joined Job", "volatility": "high"}"#;
        let idea = resolve_idea(&bare_opts(), Some(params)).unwrap();
        assert_eq!(idea.theme, "Joined Job");
        assert_eq!(idea.volatility, Volatility::High);
    }

    #[test]
    fn test_inline_flags_override_base_idea() {
        let mut opts = bare_opts();
        opts.theme = Some("Inline Theme".to_string());
        opts.volatility = Some(Volatility::Low);
        opts.markets = Some("UK, Malta, ".to_string());
        opts.features = Some("free_spins".to_string());

        let idea = resolve_idea(&opts, None).unwrap();
        assert_eq!(idea.theme, "Inline Theme");
        assert_eq!(idea.volatility, Volatility::Low);
        assert_eq!(idea.target_markets, vec!["UK", "Malta"]);
        assert_eq!(idea.requested_features, vec!["free_spins"]);
    }

    #[test]
    fn test_split_list_trims_and_drops_empties() {
        assert_eq!(split_list("a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
