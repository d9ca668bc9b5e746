// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use reunite_lib::{
    db::{Datastore, MemoryDatastore, PgDatastore},
    matching::{MatchingOrchestrator, MatchingWorker, RunOutcome, RunStatus},
    models::{ProcessingState, Record, RecordId},
    oracle::{GeminiService, OracleClient, OracleConfig},
    utils::{
        db_connect::{self, get_pool_status, DbConfig},
        env::load_env,
        matching_config::MatchingConfig,
    },
};

#[derive(Parser, Debug)]
#[command(name = "reunite", about = "Rank likely family matches between displaced-person descriptions")]
struct Cli {
    /// Use an in-process datastore instead of PostgreSQL
    #[arg(long, global = true)]
    in_memory: bool,

    /// JSON array of {"id", "description"} records to load into the in-memory store
    #[arg(long, global = true, requires = "in_memory")]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run matching for one record and print its new match set
    Match {
        #[arg(long)]
        record_id: i64,
    },
    /// Run matching for every record that has not been processed yet
    Sweep {
        /// Also re-run records stuck in `processing` for longer than this many minutes
        #[arg(long)]
        include_stuck_minutes: Option<u32>,
    },
    /// Print the stored match set for a record
    Matches {
        #[arg(long)]
        record_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    env_logger::init();
    let cli = Cli::parse();

    let matching_config = MatchingConfig::from_env();
    matching_config.log_config();

    let store = open_datastore(&cli, &matching_config).await?;

    match cli.command {
        Command::Matches { record_id } => {
            print_matches(store.as_ref(), RecordId(record_id)).await?;
        }
        Command::Match { record_id } => {
            let worker = build_worker(store.clone(), &matching_config)?;
            let subject_id = RecordId(record_id);
            let record = store
                .get_record(subject_id)
                .await?
                .with_context(|| format!("Record {} not found", subject_id))?;

            let ack = worker.submit_record(&record);
            info!("Matching run for record {} accepted at {}", ack.subject_id, ack.submitted_at);

            let outcomes = worker.drain().await;
            report_outcomes(&outcomes);
            print_matches(store.as_ref(), subject_id).await?;
        }
        Command::Sweep {
            include_stuck_minutes,
        } => {
            let records = sweep_targets(store.as_ref(), include_stuck_minutes).await?;
            if records.is_empty() {
                println!("✅ Nothing to match: no unprocessed records.");
                return Ok(());
            }

            let worker = build_worker(store.clone(), &matching_config)?;
            println!("🚀 Queuing {} matching runs...", records.len());
            worker.submit_all(&records);

            let pb = ProgressBar::new(records.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .context("Invalid progress bar template")?
                    .progress_chars("█▉▊▋▌▍▎▏  "),
            );
            let outcomes = worker
                .drain_with(|outcome| {
                    pb.inc(1);
                    pb.set_message(format!("last: record {}", outcome.subject_id));
                })
                .await;
            pb.finish_with_message("sweep complete");
            report_outcomes(&outcomes);
        }
    }

    Ok(())
}

fn build_worker(store: Arc<dyn Datastore>, matching_config: &MatchingConfig) -> Result<MatchingWorker> {
    let oracle_config = OracleConfig::from_env()?;
    oracle_config.log_config();
    let service = GeminiService::new(oracle_config).context("Failed to build oracle HTTP client")?;

    let orchestrator = Arc::new(MatchingOrchestrator::new(
        store,
        OracleClient::new(Arc::new(service)),
        matching_config,
    ));
    Ok(MatchingWorker::new(
        orchestrator,
        matching_config.max_concurrent_runs,
    ))
}

async fn open_datastore(cli: &Cli, matching_config: &MatchingConfig) -> Result<Arc<dyn Datastore>> {
    if cli.in_memory {
        let store = match &cli.seed {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read seed file {}", path.display()))?;
                MemoryDatastore::from_seed_json(&json).await?
            }
            None => {
                warn!("In-memory datastore started without --seed; it is empty");
                MemoryDatastore::new()
            }
        };
        return Ok(Arc::new(store));
    }

    let db_config = DbConfig::from_env(matching_config.db_pool_size());
    db_config.log_config();
    let pool = db_connect::connect(&db_config)
        .await
        .context("Failed to connect to database")?;
    let (connections, idle) = get_pool_status(&pool);
    info!("📊 Database pool: {} connections, {} idle", connections, idle);
    Ok(Arc::new(PgDatastore::new(pool)))
}

/// Records stuck in `processing` since before this instant are considered abandoned.
fn stuck_cutoff(now: DateTime<Utc>, minutes: u32) -> DateTime<Utc> {
    now - ChronoDuration::minutes(i64::from(minutes))
}

async fn sweep_targets(store: &dyn Datastore, include_stuck_minutes: Option<u32>) -> Result<Vec<Record>> {
    let mut records = store
        .list_records_by_state(ProcessingState::Idle)
        .await
        .context("Failed to list unprocessed records")?;

    if let Some(minutes) = include_stuck_minutes {
        let cutoff = stuck_cutoff(Utc::now(), minutes);
        let stuck = store
            .list_stuck_processing(cutoff)
            .await
            .context("Failed to list stuck records")?;
        if !stuck.is_empty() {
            warn!(
                "⚠️ {} records stuck in processing since before {}; re-running them",
                stuck.len(),
                cutoff
            );
        }
        records.extend(stuck);
    }
    Ok(records)
}

fn report_outcomes(outcomes: &[RunOutcome]) {
    let mut completed = 0;
    let mut failed = 0;
    let mut skipped = 0;
    let mut unfinalized = Vec::new();

    for outcome in outcomes {
        match &outcome.status {
            RunStatus::Completed { .. } => completed += 1,
            RunStatus::Failed { reason } => {
                failed += 1;
                warn!("Run for record {} failed: {}", outcome.subject_id, reason);
            }
            RunStatus::Skipped => skipped += 1,
        }
        if !outcome.finalized && outcome.status != RunStatus::Skipped {
            unfinalized.push(outcome.subject_id);
        }
    }

    println!(
        "📊 Runs: {} completed, {} failed, {} skipped",
        completed, failed, skipped
    );
    if !unfinalized.is_empty() {
        println!(
            "❌ Records left in processing (could not be marked done): {:?}",
            unfinalized
        );
    }
}

async fn print_matches(store: &dyn Datastore, subject_id: RecordId) -> Result<()> {
    let matches = store.list_matches(subject_id).await?;
    if matches.is_empty() {
        println!("No matches stored for record {}.", subject_id);
        return Ok(());
    }

    println!("Matches for record {}:", subject_id);
    for (rank, m) in matches.iter().enumerate() {
        println!("  {:>2}. record {:<8} score {:.2}", rank + 1, m.candidate_id, m.score);
    }
    Ok(())
}
