//! Folio CLI - run report jobs and print the composite rows

mod job;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use folio_connectors::{default_registry, SpecResolver};
use folio_core::{EngineConfig, ReportContext};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::job::{parse_param, Job};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Execute correlated report queries and print the combined rows")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a job and print one JSON object per composite row
    Run {
        /// Path to the job manifest (JSON)
        #[arg(short, long)]
        job: PathBuf,

        /// Override a parameter, as name=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Print engine metrics to stderr when done
        #[arg(long)]
        metrics: bool,
    },

    /// Check a job manifest without contacting any datasource
    Validate {
        /// Path to the job manifest (JSON)
        job: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            job,
            params,
            metrics,
        } => run_job(&job, &params, metrics).await,
        Commands::Validate { job } => validate_job_file(&job),
    }
}

fn load_job(path: &Path) -> Result<Job> {
    info!("Loading job from {:?}", path);
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read job manifest {:?}", path))?;
    let job = Job::from_json(&content)?;

    if let Err(errors) = job.validate() {
        for error in &errors {
            eprintln!("Validation error: {}", error);
        }
        anyhow::bail!("Job validation failed with {} errors", errors.len());
    }
    Ok(job)
}

async fn run_job(path: &Path, params: &[String], print_metrics: bool) -> Result<()> {
    let job = load_job(path)?;
    let config = EngineConfig::from_env()?;
    let mut ctx = job.build_context(
        Arc::new(default_registry()),
        config,
        &SpecResolver::default(),
    )?;
    for raw in params {
        let (name, value) = parse_param(raw)?;
        ctx.set_parameter(&name, value)?;
    }

    let outcome = execute_and_print(&mut ctx).await;
    ctx.close().await;

    if print_metrics {
        eprint!("{}", ctx.metrics().encode()?);
    }
    outcome
}

async fn execute_and_print(ctx: &mut ReportContext) -> Result<()> {
    // Ctrl-C cancels whatever query is in flight.
    let handles = ctx
        .datasources()
        .names()
        .iter()
        .map(|name| ctx.cancel_handle(name))
        .collect::<folio_core::Result<Vec<_>>>()?;
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running queries");
            for handle in &handles {
                handle.cancel();
            }
        }
    });

    let result = ctx.execute().await;
    interrupt.abort();
    let mut execution = result?;

    for failure in &execution.failures {
        eprintln!(
            "Result '{}' unavailable: {}",
            failure.result,
            failure.reason()
        );
    }

    let mut rows = 0usize;
    while execution.cursor.advance() {
        if let Some(row) = execution.cursor.current_row() {
            println!("{}", serde_json::to_string(&row)?);
            rows += 1;
        }
    }
    info!(
        "Printed {} rows from '{}' ({} results unavailable)",
        rows,
        execution.cursor.primary(),
        execution.failures.len()
    );
    Ok(())
}

fn validate_job_file(path: &Path) -> Result<()> {
    let job = load_job(path)?;

    println!("Job is valid!");
    println!("  Datasources: {}", job.datasources.len());
    for ds in &job.datasources {
        match &ds.encoding {
            Some(label) => println!("    - {} ({})", ds.name, label),
            None => println!("    - {}", ds.name),
        }
    }
    println!("  Queries: {}", job.queries.len());
    for q in &job.queries {
        println!("    - {} on {}", q.name, q.datasource);
    }
    println!("  Links: {}", job.links.len());
    for link in &job.links {
        match (&link.leader_field, &link.follower_field) {
            (Some(lf), Some(ff)) => println!(
                "    - {}.{} -> {}.{}",
                link.leader, lf, link.follower, ff
            ),
            _ => println!("    - {} -> {} (positional)", link.leader, link.follower),
        }
    }
    Ok(())
}
