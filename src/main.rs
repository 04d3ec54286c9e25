use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use slotsmith::idea::Volatility;

mod cmd;

#[derive(Parser)]
#[command(name = "slotsmith")]
#[command(version, about = "Slot-game studio pipeline with human approval gates")]
pub struct Cli {
    /// Path to the shared job database
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one pipeline job from a game idea
    Run {
        /// Game idea as a JSON file
        #[arg(long)]
        idea: Option<PathBuf>,

        /// Theme line, e.g. "Norse mythology under a blood moon"
        #[arg(long)]
        theme: Option<String>,

        /// Art direction brief
        #[arg(long)]
        art_style: Option<String>,

        /// Volatility class: low, medium, high
        #[arg(long)]
        volatility: Option<Volatility>,

        /// Target markets, comma-separated (e.g. "UK,Malta,Ontario")
        #[arg(long)]
        markets: Option<String>,

        /// Requested features, comma-separated (e.g. "free_spins,cascading_wins")
        #[arg(long)]
        features: Option<String>,

        /// Approve every checkpoint without waiting
        #[arg(long)]
        auto: bool,

        /// Join an externally created job row instead of minting one
        #[arg(long)]
        job_id: Option<String>,

        /// Root directory for generated packages
        #[arg(long)]
        output_root: Option<PathBuf>,

        /// External generator command (reads the request on stdin)
        #[arg(long)]
        studio_cmd: Option<String>,

        /// Use the built-in deterministic generator, no external calls
        #[arg(long)]
        offline: bool,
    },
    /// List recent jobs in the shared store
    Jobs {
        /// Maximum rows to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Show one job in detail
    Status { job_id: String },
    /// Sweep jobs abandoned by a crashed worker
    Recover,
    /// List checkpoints waiting for a decision
    Reviews,
    /// Decide a pending checkpoint review
    Review {
        review_id: String,

        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        #[arg(long)]
        reject: bool,

        /// Note for the pipeline, required when rejecting
        #[arg(long)]
        feedback: Option<String>,
    },
}

/// Install the tracing stack: compact stderr output plus, for a worker, a
/// mirror of the same stream into the per-job log file. The returned guard
/// must live until the process is done logging.
pub fn init_tracing(
    verbose: bool,
    log_file: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("slotsmith={default_level},warn").into());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path.file_name().map(PathBuf::from).unwrap_or_default();
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_ansi(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // The worker sets up its own tracing once it knows the job id, so the
    // per-job log file can be part of the stack from the start.
    if !matches!(cli.command, Commands::Run { .. }) {
        init_tracing(cli.verbose, None);
    }

    match &cli.command {
        Commands::Run {
            idea,
            theme,
            art_style,
            volatility,
            markets,
            features,
            auto,
            job_id,
            output_root,
            studio_cmd,
            offline,
        } => {
            cmd::cmd_run(
                &cli,
                cmd::RunOptions {
                    idea_file: idea.clone(),
                    theme: theme.clone(),
                    art_style: art_style.clone(),
                    volatility: *volatility,
                    markets: markets.clone(),
                    features: features.clone(),
                    auto: *auto,
                    job_id: job_id.clone(),
                    output_root: output_root.clone(),
                    studio_cmd: studio_cmd.clone(),
                    offline: *offline,
                },
            )
            .await?;
        }
        Commands::Jobs { limit } => cmd::cmd_jobs(&cli, *limit).await?,
        Commands::Status { job_id } => cmd::cmd_status(&cli, job_id).await?,
        Commands::Recover => cmd::cmd_recover(&cli).await?,
        Commands::Reviews => cmd::cmd_reviews(&cli).await?,
        Commands::Review {
            review_id,
            approve,
            reject,
            feedback,
        } => {
            cmd::cmd_review(&cli, review_id, *approve, *reject, feedback.as_deref()).await?;
        }
    }

    Ok(())
}
