use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::extract::TermExtract;
use crate::pipeline::ProgressAnalysis;

mod aggregate;
mod calendar;
mod completion;
mod config;
mod db;
mod error;
mod extract;
mod milestone;
mod models;
mod ordering;
mod pipeline;
mod progress;
mod registration;
mod report;

#[derive(Parser)]
#[command(name = "pace-analytics")]
#[command(
    about = "Review progress and completion analytics for paced precalculus courses",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to ./pace-analytics.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import a CSV extract directory into Postgres
    Import {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Day-by-day review progress for every student in a term
    Progress {
        #[arg(long)]
        term: String,
        /// Read a CSV extract directory instead of Postgres
        #[arg(long)]
        extract: Option<PathBuf>,
        #[arg(long, default_value = "progress")]
        out: PathBuf,
    },
    /// Completion rates by course combination for the census cohort
    Completion {
        #[arg(long)]
        term: String,
        /// Census date (defaults to the term's census date)
        #[arg(long)]
        census: Option<NaiveDate>,
        /// Read a CSV extract directory instead of Postgres
        #[arg(long)]
        extract: Option<PathBuf>,
        #[arg(long, default_value = "completion.md")]
        out: PathBuf,
        /// Write a JSON summary instead of markdown
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let run_id = Uuid::new_v4();
    let span = info_span!("run", run_id = %run_id);
    run(cli, run_id).instrument(span).await
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("PACE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_term(
    extract: Option<&Path>,
    term: &str,
    config: &AnalysisConfig,
) -> anyhow::Result<TermExtract> {
    match extract {
        Some(dir) => TermExtract::load_dir(dir, term, config),
        None => {
            let pool = connect().await?;
            db::load_extract(&pool, term, config).await
        }
    }
}

/// Sets the returned flag on ctrl-c so running batches stop between students.
fn cancel_on_interrupt() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current students");
            flag.store(true, Ordering::Release);
        }
    });
    cancel
}

async fn run(cli: Cli, run_id: Uuid) -> anyhow::Result<()> {
    let config =
        AnalysisConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { dir } => {
            let pool = connect().await?;
            let summary = db::import_extract(&pool, &dir)
                .await
                .with_context(|| format!("failed to import {}", dir.display()))?;
            info!(?summary, "import finished");
            println!(
                "Imported {} registrations, {} attempts, {} milestones, {} overrides from {}.",
                summary.registrations,
                summary.attempts,
                summary.milestones,
                summary.overrides,
                dir.display()
            );
        }
        Commands::Progress { term, extract, out } => {
            let data = load_term(extract.as_deref(), &term, &config).await?;
            info!(term_id = %term, students = data.student_count(), "term loaded");

            let cancel = cancel_on_interrupt();
            let span = Span::current();
            let (days, batch) = tokio::task::spawn_blocking(move || {
                span.in_scope(|| {
                    let analysis = ProgressAnalysis::new(&data, &config);
                    let batch = analysis.run(&data, &cancel);
                    (analysis.days().to_vec(), batch)
                })
            })
            .await
            .context("progress batch panicked")?;

            batch.log_missing();
            if batch.canceled {
                warn!(
                    processed = batch.students.len(),
                    "progress batch canceled; writing partial results"
                );
            }

            let written = report::write_progress_csvs(&out, &term, &days, &batch.students)?;
            let summary_path = out.join(format!("{term}_summary.md"));
            std::fs::write(&summary_path, report::build_progress_report(&term, &days, &batch))
                .with_context(|| format!("failed to write {}", summary_path.display()))?;

            info!(files = written.len() + 1, "progress history written");
            println!(
                "Progress history for {} students written to {}.",
                batch.students.len(),
                out.display()
            );
        }
        Commands::Completion {
            term,
            census,
            extract,
            out,
            json,
        } => {
            let data = load_term(extract.as_deref(), &term, &config).await?;
            let census = census
                .or(data.term.census_date)
                .with_context(|| format!("term {term} has no census date; pass --census"))?;
            info!(term_id = %term, %census, students = data.student_count(), "term loaded");

            let cancel = cancel_on_interrupt();
            let span = Span::current();
            let batch = tokio::task::spawn_blocking(move || {
                span.in_scope(|| completion::completion_rates(&data, census, &config, &cancel))
            })
            .await
            .context("completion batch panicked")?;

            if batch.canceled {
                warn!("completion batch canceled; writing partial results");
            }

            let body = if json {
                report::completion_json(run_id, &term, census, &batch)?
            } else {
                report::build_completion_report(&term, census, &batch)
            };
            std::fs::write(&out, body)
                .with_context(|| format!("failed to write {}", out.display()))?;

            let csv_path = out.with_extension("csv");
            report::write_completion_csv(&csv_path, &batch)?;

            info!(
                groups = batch.groups.len(),
                students = batch.cohort_size(),
                "completion rates written"
            );
            println!("Completion rates written to {} and {}.", out.display(), csv_path.display());
        }
    }

    Ok(())
}
