//! The reviewer side of the checkpoint gate: list pending reviews and
//! submit decisions from any session sharing the store.

use anyhow::Result;
use console::style;

use super::super::Cli;

pub async fn cmd_reviews(cli: &Cli) -> Result<()> {
    let config = super::resolve_config(cli)?;
    let db = super::open_store(&config)?;
    let pending = db.call(|db| db.pending_reviews()).await?;

    if pending.is_empty() {
        println!();
        println!("No checkpoints waiting for a decision.");
        println!();
        return Ok(());
    }

    println!();
    println!("{} pending review(s):", pending.len());
    for review in &pending {
        println!();
        println!(
            "{}  {}",
            style(&review.id).bold(),
            style(&review.checkpoint).yellow()
        );
        println!("  Job:     {}", review.job_id);
        println!("  Title:   {}", review.title);
        println!("  Summary: {}", review.summary);
        if !review.files.is_empty() {
            println!("  Files:   {}", review.files.join(", "));
        }
        println!("  Since:   {}", review.created_at);
    }
    println!();
    println!("Decide with 'slotsmith review <id> --approve' or '--reject --feedback <note>'.");
    println!();
    Ok(())
}

pub async fn cmd_review(
    cli: &Cli,
    review_id: &str,
    approve: bool,
    reject: bool,
    feedback: Option<&str>,
) -> Result<()> {
    if approve == reject {
        anyhow::bail!("Pass --approve or --reject.");
    }
    if reject && feedback.is_none() {
        anyhow::bail!("Rejection needs --feedback so the pipeline can record why.");
    }

    let config = super::resolve_config(cli)?;
    let db = super::open_store(&config)?;

    let id = review_id.to_string();
    let note = feedback.map(str::to_string);
    let review = db
        .call(move |db| db.submit_decision(&id, approve, note.as_deref()))
        .await?;

    let verdict = if approve {
        style("approved").green()
    } else {
        style("rejected").red()
    };
    println!(
        "Review {} {} ({} at {}).",
        review.id, verdict, review.checkpoint, review.job_id
    );
    if let Some(note) = &review.feedback {
        println!("Feedback recorded: {note}");
    }
    println!("The worker holding this checkpoint picks the decision up on its next poll.");
    Ok(())
}
