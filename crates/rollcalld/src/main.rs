use anyhow::{Context, Result};
use clap::Parser;
use rollcall_core::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod console;
mod engine;
mod overlay;

#[derive(Parser)]
#[command(name = "rollcalld", about = "Rollcall live attendance engine", version)]
struct Args {
    /// Course code, e.g. SE-223
    #[arg(long)]
    course: String,
    /// Course section, e.g. A
    #[arg(long)]
    section: String,
    /// Semester, e.g. "Spring 2025"
    #[arg(long)]
    semester: String,
    /// Session date (YYYY-MM-DD); defaults to today
    #[arg(long)]
    date: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let session = match &args.date {
        Some(date) => Session::parse(&args.course, &args.section, &args.semester, date),
        None => Session::today(&args.course, &args.section, &args.semester),
    }
    .context("invalid session parameters")?;

    let config = config::Config::from_env();
    tracing::info!(
        session = %session.key(),
        db = %config.db_path.display(),
        "rollcalld starting"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let engine = engine::spawn_engine(&config, &session, Arc::clone(&stop))
        .context("failed to start attendance engine")?;

    let interrupt = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping after the current frame");
            interrupt.store(true, Ordering::Relaxed);
        }
    });

    let outcome = tokio::task::spawn_blocking(move || engine.join())
        .await
        .context("engine join task failed")?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    let summary = outcome.context("attendance run failed")?;

    tracing::info!(
        frames = summary.frames,
        recorded = summary.recorded,
        enrollments = summary.enrollments,
        "rollcalld shutting down"
    );
    Ok(())
}
