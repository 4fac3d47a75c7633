use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::PipelineRunner;
use serde::{Deserialize, Serialize};
use serplens_core::{standard, ExecutionStatus, PhaseStatus};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const SERPLENS_DIR: &str = ".serplens";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_DB_NAME: &str = "serplens.db";

#[derive(Parser)]
#[command(name = "serplens")]
#[command(about = "SERP market intelligence pipeline manager", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a serplens project in the current directory
    Init,
    /// Queue a new pipeline execution
    Create {
        /// Comma-separated phase names; defaults to the configured set
        #[arg(long)]
        phases: Option<String>,

        /// Use a fixed execution id instead of a random one
        #[arg(long)]
        execution: Option<Uuid>,
    },
    /// Show all executions, or the phase table of one
    Status { execution: Option<Uuid> },
    /// List all executions
    Executions,
    /// Reset a failed or blocked phase so the next run re-attempts it
    Retry { execution: Uuid, phase: String },
    /// Skip the remaining pending phases of an execution
    Cancel { execution: Uuid },
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineConfig {
    project: ProjectConfig,
    pipeline: PipelineSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProjectConfig {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineSection {
    enabled_phases: Vec<String>,
    /// Arbitrary settings handed to every phase handler as its config.
    #[serde(default)]
    settings: toml::Table,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                name: "my-market".to_string(),
            },
            pipeline: PipelineSection {
                enabled_phases: standard::ALL_PHASES.iter().map(|p| p.to_string()).collect(),
                settings: toml::Table::new(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_project().await,
        Commands::Create { phases, execution } => create_execution(phases, execution).await,
        Commands::Status { execution } => status(execution).await,
        Commands::Executions => status(None).await,
        Commands::Retry { execution, phase } => retry(execution, &phase).await,
        Commands::Cancel { execution } => cancel(execution).await,
    }
}

async fn init_project() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let serplens_dir = cwd.join(SERPLENS_DIR);

    if serplens_dir.exists() {
        println!("Project already initialized at {}", serplens_dir.display());
        return Ok(());
    }

    println!("Initializing serplens in {}", cwd.display());

    tokio::fs::create_dir_all(&serplens_dir).await?;

    let project_name = cwd
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("my-market")
        .to_string();

    let config = PipelineConfig {
        project: ProjectConfig {
            name: project_name.clone(),
        },
        ..Default::default()
    };

    let config_path = serplens_dir.join(CONFIG_FILE);
    let config_content = toml::to_string_pretty(&config)?;
    tokio::fs::write(&config_path, config_content).await?;

    let db_path = serplens_dir.join(DEFAULT_DB_NAME);
    let database_url = format!("sqlite:{}", db_path.display());
    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    println!();
    println!("Initialized serplens for '{}'", project_name);
    println!();
    println!("Created:");
    println!("  {}/", SERPLENS_DIR);
    println!("  ├── {}", CONFIG_FILE);
    println!("  └── {}", DEFAULT_DB_NAME);
    println!();
    println!("Next steps:");
    println!("  1. Adjust enabled_phases in {}/{}", SERPLENS_DIR, CONFIG_FILE);
    println!("  2. Run 'serplens create' to queue a pipeline execution");

    Ok(())
}

async fn create_execution(phases: Option<String>, execution: Option<Uuid>) -> Result<()> {
    init_tracing();
    let dir = project_dir()?;
    let config = load_config(&dir).await?;
    let pool = open_pool(&dir).await?;
    let runner = build_runner(pool)?;

    let enabled: Vec<String> = match phases {
        Some(list) => parse_phase_list(&list),
        None => config.pipeline.enabled_phases.clone(),
    };
    if enabled.is_empty() {
        bail!("no phases enabled");
    }
    let settings = serde_json::to_value(&config.pipeline.settings)?;

    let id = execution.unwrap_or_else(Uuid::new_v4);
    let stored = runner.initialize_pipeline(id, &enabled, settings).await?;

    println!("Created execution {}", stored.id);
    println!("Enabled phases ({}):", stored.enabled_phases.len());
    for phase in &stored.enabled_phases {
        println!("  - {}", phase);
    }
    Ok(())
}

async fn status(execution: Option<Uuid>) -> Result<()> {
    let dir = project_dir()?;
    let config = load_config(&dir).await?;
    let pool = open_pool(&dir).await?;

    match execution {
        Some(id) => show_execution(pool, id).await,
        None => list_executions(pool, &config).await,
    }
}

async fn list_executions(pool: db::SqlitePool, config: &PipelineConfig) -> Result<()> {
    let executions = db::ExecutionRepository::new(pool).find_all().await?;

    println!();
    println!("Project: {}", config.project.name);
    println!();

    if executions.is_empty() {
        println!("No executions yet. Run 'serplens create' to queue one.");
    } else {
        println!("Executions ({}):", executions.len());
        for execution in &executions {
            let finished = execution
                .completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {} [{}] {} phases, started {}, finished {}",
                execution.id,
                execution.status,
                execution.enabled_phases.len(),
                execution.started_at.format("%Y-%m-%d %H:%M"),
                finished,
            );
        }
    }
    println!();
    Ok(())
}

async fn show_execution(pool: db::SqlitePool, id: Uuid) -> Result<()> {
    let runner = build_runner(pool)?;
    let summary = runner.summary(id).await?;

    let registry = standard::standard_registry()?;
    let order = registry.topological_order();
    let mut details = summary.phase_details.clone();
    details.sort_by_key(|record| {
        order
            .iter()
            .position(|name| *name == record.phase_name)
            .unwrap_or(usize::MAX)
    });

    println!();
    println!("Execution {}", id);
    println!("Status:   {}", summary.status);
    println!(
        "Phases:   {} completed, {} failed, {} blocked, {} skipped",
        summary.completed, summary.failed, summary.blocked, summary.skipped
    );
    println!();
    for record in &details {
        let note = if let Some(blocked_by) = &record.blocked_by {
            format!(" (blocked by {})", blocked_by)
        } else if let Some(error) = &record.error_message {
            format!(" ({})", error)
        } else {
            String::new()
        };
        println!(
            "  {} [{}] {}{}",
            status_icon(record.status),
            record.status,
            record.phase_name,
            note
        );
    }
    println!();
    Ok(())
}

async fn retry(execution: Uuid, phase: &str) -> Result<()> {
    init_tracing();
    let dir = project_dir()?;
    let pool = open_pool(&dir).await?;
    let runner = build_runner(pool)?;

    runner.retry_phase(execution, phase).await?;

    println!("Phase '{}' reset to pending on execution {}", phase, execution);
    println!("The next run will re-attempt it.");
    Ok(())
}

async fn cancel(execution: Uuid) -> Result<()> {
    init_tracing();
    let dir = project_dir()?;
    let pool = open_pool(&dir).await?;
    let runner = build_runner(pool)?;

    runner.cancel(execution).await?;

    let summary = runner.summary(execution).await?;
    println!(
        "Cancelled execution {}: {} phases skipped",
        execution, summary.skipped
    );
    if summary.status == ExecutionStatus::Running {
        println!("A phase is still running; it will finish and record its outcome.");
    }
    Ok(())
}

fn project_dir() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let dir = cwd.join(SERPLENS_DIR);
    if !dir.exists() {
        bail!("no {} directory found; run 'serplens init' first", SERPLENS_DIR);
    }
    Ok(dir)
}

async fn load_config(dir: &Path) -> Result<PipelineConfig> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path).await?;
        Ok(toml::from_str(&content)?)
    } else {
        Ok(PipelineConfig::default())
    }
}

async fn open_pool(dir: &Path) -> Result<db::SqlitePool> {
    let db_path = dir.join(DEFAULT_DB_NAME);
    let database_url = format!("sqlite:{}", db_path.display());
    tracing::info!("Database: {}", db_path.display());

    let pool = db::create_pool(&database_url)
        .await
        .context("Failed to open state database")?;
    db::run_migrations(&pool).await?;
    Ok(pool)
}

fn build_runner(pool: db::SqlitePool) -> Result<PipelineRunner> {
    Ok(PipelineRunner::new(standard::standard_registry()?, pool))
}

/// Split a comma-separated phase list, dropping blanks and repeats.
fn parse_phase_list(list: &str) -> Vec<String> {
    let mut phases: Vec<String> = Vec::new();
    for name in list.split(',') {
        let name = name.trim();
        if name.is_empty() || phases.iter().any(|p| p == name) {
            continue;
        }
        phases.push(name.to_string());
    }
    phases
}

fn status_icon(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Pending => "○",
        PhaseStatus::Running => "◐",
        PhaseStatus::Completed => "●",
        PhaseStatus::Failed => "✗",
        PhaseStatus::Blocked => "⊘",
        PhaseStatus::Skipped => "◌",
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "serplens=info,orchestrator=info,db=info".into()),
        )
        .init();
}
