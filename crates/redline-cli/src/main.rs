//! CLI binary for redline: submit documents for LLM editing, advance the jobs
//! one step at a time, and poll their progress and usage.

mod display;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use redline_core::config::{ProviderKind, RedlineConfig};
use redline_core::job::{JobId, JobStatus};
use redline_core::storage::FileStore;
use redline_core::usage::UsageLedger;
use redline_llm::ProviderConfig;
use redline_workflow::{
    ClientFactory, ConfiguredClients, ProgressReport, TaskQueue, Workflow, WorkflowOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "redline", about = "Section-by-section LLM document editor")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Echo prompts back instead of calling a provider
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an editing job and print its process id
    Submit {
        /// Document title
        #[arg(short, long)]
        title: String,

        /// Document the usage is billed to
        #[arg(short, long)]
        document_id: u64,

        /// Path to the document text
        file: PathBuf,
    },

    /// Submit a document and run every step to completion
    Run {
        /// Document title
        #[arg(short, long)]
        title: String,

        /// Document the usage is billed to
        #[arg(short, long)]
        document_id: u64,

        /// Path to the document text
        file: PathBuf,

        /// Write the edited document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run the next step of one job
    Step {
        /// Process id
        process_id: String,
    },

    /// Advance every processing job by one step and purge expired ones
    Tick,

    /// Print a job's progress as JSON
    Poll {
        /// Process id
        process_id: String,
    },

    /// Show the usage totals and call log of a document
    Usage {
        /// Document id
        document_id: u64,
    },

    /// Recompute the global usage totals from every document
    Recompute,

    /// Delete one job, or every expired job when no id is given
    Purge {
        /// Process id
        process_id: Option<String>,
    },

    /// Look up token counts and cost of an OpenRouter generation
    GenerationStats {
        /// Generation id returned by OpenRouter
        generation_id: String,
    },
}

fn get_project_root(cli: &Cli) -> Result<PathBuf> {
    match &cli.project {
        Some(p) => Ok(p.clone()),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project_root = get_project_root(&cli)?;
    let config = RedlineConfig::load(&project_root)
        .with_context(|| format!("failed to load config from {}", project_root.display()))?;
    let offline = cli.offline;

    match cli.command {
        Commands::Submit {
            title,
            document_id,
            file,
        } => cmd_submit(&project_root, config, offline, &title, document_id, &file),
        Commands::Run {
            title,
            document_id,
            file,
            output,
        } => cmd_run(
            &project_root,
            config,
            offline,
            &title,
            document_id,
            &file,
            output.as_deref(),
        ),
        Commands::Step { process_id } => cmd_step(&project_root, config, offline, &process_id),
        Commands::Tick => cmd_tick(&project_root, config, offline),
        Commands::Poll { process_id } => cmd_poll(&project_root, config, &process_id),
        Commands::Usage { document_id } => cmd_usage(&project_root, config, document_id),
        Commands::Recompute => cmd_recompute(&project_root, config),
        Commands::Purge { process_id } => cmd_purge(&project_root, config, process_id.as_deref()),
        Commands::GenerationStats { generation_id } => {
            cmd_generation_stats(&config, &generation_id)
        }
    }
}

/// Wire the workflow to the project's job store and a fresh in-process queue.
fn open_workflow(
    project_root: &Path,
    config: RedlineConfig,
    offline: bool,
) -> (Workflow, Arc<TaskQueue>) {
    let store = Arc::new(FileStore::open(project_root));
    let queue = Arc::new(TaskQueue::new());
    let options = WorkflowOptions::from_config(&config);
    let clients: Arc<dyn ClientFactory> = if offline {
        Arc::new(ConfiguredClients::offline(config))
    } else {
        Arc::new(ConfiguredClients::new(config))
    };
    let workflow = Workflow::new(
        store.clone(),
        Arc::new(UsageLedger::new(store)),
        clients,
        queue.clone(),
        options,
    );
    (workflow, queue)
}

fn parse_process_id(raw: &str) -> Result<JobId> {
    raw.parse::<JobId>().map_err(Into::into)
}

fn read_document(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))
}

fn print_report(report: &ProgressReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn cmd_submit(
    project_root: &Path,
    config: RedlineConfig,
    offline: bool,
    title: &str,
    document_id: u64,
    file: &Path,
) -> Result<()> {
    let source = read_document(file)?;
    let (workflow, _queue) = open_workflow(project_root, config, offline);
    let id = workflow.submit(title, &source, document_id)?;

    println!("{}", id);
    eprintln!("Job submitted. Run `redline tick` or `redline step {}` to advance it.", id);
    Ok(())
}

fn cmd_run(
    project_root: &Path,
    config: RedlineConfig,
    offline: bool,
    title: &str,
    document_id: u64,
    file: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let source = read_document(file)?;
    let (workflow, queue) = open_workflow(project_root, config, offline);
    let id = workflow.submit(title, &source, document_id)?;
    tracing::info!(job_id = %id, document_id, "running job to completion");

    let progress = display::EditProgress::new();
    let drained = workflow.drain(&queue, |job| {
        progress.update(job);
        if let Some(error) = &job.error {
            progress.suspend(|| eprintln!("Step {} failed: {}", job.step.as_str(), error));
        }
    });
    progress.finish();
    drained?;

    let report = workflow.poll(&id)?;
    match report.status {
        JobStatus::Complete => {}
        JobStatus::Error => {
            anyhow::bail!(
                "job {} failed: {}",
                id,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        JobStatus::Processing => {
            anyhow::bail!("job {} stopped at {} ({}%)", id, report.step.as_str(), report.progress);
        }
    }

    let content = report.content.unwrap_or_default();
    match output {
        Some(path) => {
            std::fs::write(path, &content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Edited document written to {}", path.display());
        }
        None => print!("{}", content),
    }

    if let Some(totals) = &report.document_totals {
        eprintln!(
            "Document {}: {} prompt / {} completion tokens, ${:.4}",
            document_id, totals.prompt_tokens, totals.completion_tokens, totals.cost
        );
    }
    Ok(())
}

fn cmd_step(project_root: &Path, config: RedlineConfig, offline: bool, raw_id: &str) -> Result<()> {
    let id = parse_process_id(raw_id)?;
    let (workflow, _queue) = open_workflow(project_root, config, offline);
    let job = workflow.advance(&id)?;
    print_report(&ProgressReport::from_job(&job))
}

fn cmd_tick(project_root: &Path, config: RedlineConfig, offline: bool) -> Result<()> {
    let (workflow, _queue) = open_workflow(project_root, config, offline);
    let report = workflow.tick(Utc::now())?;

    for (id, step, progress) in &report.advanced {
        println!("{}  {} {}%", id, step.as_str(), progress);
    }
    for id in &report.purged {
        println!("{}  purged", id);
    }
    for (id, reason) in &report.failed {
        println!("WARN: {}  {}", id, reason);
    }
    eprintln!(
        "Advanced {}, purged {}, failed {}.",
        report.advanced.len(),
        report.purged.len(),
        report.failed.len()
    );
    Ok(())
}

fn cmd_poll(project_root: &Path, config: RedlineConfig, raw_id: &str) -> Result<()> {
    let id = parse_process_id(raw_id)?;
    let (workflow, _queue) = open_workflow(project_root, config, true);
    print_report(&workflow.poll(&id)?)
}

fn cmd_usage(project_root: &Path, config: RedlineConfig, document_id: u64) -> Result<()> {
    let (workflow, _queue) = open_workflow(project_root, config, true);
    let totals = workflow.ledger().totals(document_id)?;

    println!("Document: {}", document_id);
    println!("Prompt tokens: {}", totals.prompt_tokens);
    println!("Completion tokens: {}", totals.completion_tokens);
    println!("Cost: ${:.4}", totals.cost);
    if !totals.log.is_empty() {
        println!("\n--- Log ---\n{}", totals.log_text());
    }
    Ok(())
}

fn cmd_recompute(project_root: &Path, config: RedlineConfig) -> Result<()> {
    let (workflow, _queue) = open_workflow(project_root, config, true);
    let global = workflow.recompute_totals()?;

    println!("Documents: {}", global.documents);
    println!("Prompt tokens: {}", global.prompt_tokens);
    println!("Completion tokens: {}", global.completion_tokens);
    println!("Cost: ${:.4}", global.cost);
    println!("Computed: {}", global.computed_at);
    Ok(())
}

fn cmd_purge(project_root: &Path, config: RedlineConfig, raw_id: Option<&str>) -> Result<()> {
    let (workflow, _queue) = open_workflow(project_root, config, true);
    match raw_id {
        Some(raw) => {
            let id = parse_process_id(raw)?;
            if workflow.purge(&id)? {
                eprintln!("Purged {}.", id);
            } else {
                eprintln!("No job found: {}", id);
            }
        }
        None => {
            let purged = workflow.purge_expired(Utc::now())?;
            for id in &purged {
                println!("{}", id);
            }
            eprintln!("Purged {} expired job(s).", purged.len());
        }
    }
    Ok(())
}

fn cmd_generation_stats(config: &RedlineConfig, generation_id: &str) -> Result<()> {
    let provider = ProviderConfig::resolve_as(config, ProviderKind::OpenRouter).openrouter();
    let stats = provider
        .generation_stats(generation_id)
        .with_context(|| format!("failed to fetch generation {}", generation_id))?;

    println!("Generation: {}", stats.id);
    println!("Prompt tokens: {}", stats.prompt_tokens);
    println!("Completion tokens: {}", stats.completion_tokens);
    println!("Cost: ${:.6}", stats.total_cost);
    Ok(())
}
