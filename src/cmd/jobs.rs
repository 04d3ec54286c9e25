//! Job administration over the shared store: list, inspect, recover.

use anyhow::Result;
use console::style;

use slotsmith::store::JobStatus;

use super::super::Cli;

pub async fn cmd_jobs(cli: &Cli, limit: i64) -> Result<()> {
    let config = super::resolve_config(cli)?;
    let db = super::open_store(&config)?;
    let jobs = db.call(move |db| db.list_jobs(limit)).await?;

    if jobs.is_empty() {
        println!();
        println!("No jobs in the store yet. Start one with 'slotsmith run --theme <line>'.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{:<36} {:<26} {:<10} {:<30} Created",
        "Job", "Title", "Status", "Stage"
    );
    for job in &jobs {
        println!(
            "{:<36} {:<26} {} {:<30} {}",
            job.id,
            job.title,
            styled_status(job.status),
            job.current_stage,
            job.created_at
        );
    }
    println!();
    Ok(())
}

pub async fn cmd_status(cli: &Cli, job_id: &str) -> Result<()> {
    use slotsmith::layout::ArtifactLayout;

    let config = super::resolve_config(cli)?;
    let db = super::open_store(&config)?;

    let lookup = job_id.to_string();
    let job = db.call(move |db| db.require_job(&lookup)).await?;
    let pending = db.call(|db| db.pending_reviews()).await?;

    println!();
    println!("Job {}", job.id);
    println!("{}", "=".repeat(40));
    println!();
    println!("Title:    {}", job.title);
    println!("Status:   {}", styled_status(job.status));
    println!("Stage:    {}", job.current_stage);
    if let Some(slug) = &job.game_slug {
        println!("Slug:     {slug}");
    }
    if let Some(dir) = &job.output_dir {
        println!("Output:   {dir}");
        let manifest = ArtifactLayout::at(dir.clone()).manifest();
        if manifest.is_file() {
            println!("Manifest: {}", manifest.display());
        }
    }
    if let Some(error) = &job.error {
        println!("Error:    {}", style(error).red());
    }
    println!("Created:  {}", job.created_at);
    if let Some(finished) = &job.completed_at {
        println!("Finished: {finished}");
    }

    let waiting: Vec<_> = pending.iter().filter(|r| r.job_id == job.id).collect();
    if !waiting.is_empty() {
        println!();
        println!("Waiting on {} review(s):", waiting.len());
        for review in &waiting {
            println!("  {}  {}  ({})", review.id, review.checkpoint, review.created_at);
        }
        println!();
        println!("Decide with 'slotsmith review <id> --approve' or '--reject --feedback <note>'.");
    }
    println!();
    Ok(())
}

pub async fn cmd_recover(cli: &Cli) -> Result<()> {
    let config = super::resolve_config(cli)?;
    let db = super::open_store(&config)?;

    let minutes = config.staleness.as_secs() / 60;
    let reaped = db.call(move |db| db.reap_stale(minutes)).await?;

    if reaped.is_empty() {
        println!("No stale jobs. Everything active has moved within {minutes} minutes.");
        return Ok(());
    }

    println!("Marked {} stale job(s) as failed:", reaped.len());
    for job in &reaped {
        println!("  {}  {}  (last stage: {})", job.id, job.title, job.current_stage);
    }
    Ok(())
}

/// Status text padded before styling so ANSI codes don't break the columns.
fn styled_status(status: JobStatus) -> console::StyledObject<String> {
    let padded = format!("{:<10}", status.as_str());
    match status {
        JobStatus::Queued => style(padded).dim(),
        JobStatus::Running => style(padded).yellow(),
        JobStatus::Complete => style(padded).green(),
        JobStatus::Failed => style(padded).red(),
    }
}
