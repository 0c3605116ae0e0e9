mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{collect_abstractions, parse_abstraction, CliConfig, CONFIG_FILE};
use orchestrator::steps::BuiltinStepRegistrar;
use orchestrator::PipelineEngine;
use pipeline_core::{Plan, Status};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Parser)]
#[command(name = "pipeline-engine")]
#[command(about = "Run pipeline plans against the execution engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file to read the [engine] section from
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and create the database
    Init,
    /// Check a plan file without running it
    Validate { plan: PathBuf },
    /// Run a plan with the built-in steps and wait for it to finish
    Run {
        plan: PathBuf,

        #[arg(long)]
        database_url: Option<String>,

        /// Setup abstraction as key=value, e.g. accountId=acc-1
        #[arg(short, long = "abstraction", value_parser = parse_abstraction)]
        abstractions: Vec<(String, String)>,

        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init_project(&cli.config).await.map(|_| ExitCode::SUCCESS),
        Commands::Validate { plan } => validate(&plan).await,
        Commands::Run {
            plan,
            database_url,
            abstractions,
            timeout_secs,
        } => {
            init_tracing();
            let config = CliConfig::load(&cli.config)
                .await?
                .with_database_url(database_url);
            run(
                config,
                &plan,
                abstractions,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    }
}

async fn init_project(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Already initialized: {}", config_path.display());
        return Ok(());
    }

    let config = CliConfig::for_project();
    tokio::fs::write(config_path, config.to_toml()?)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let pool = db::create_pool(&config.engine.database_url)
        .await
        .context("Failed to create database")?;
    db::run_migrations(&pool).await?;

    println!("Created {}", config_path.display());
    println!("Database: {}", config.engine.database_url);
    println!();
    println!("Next: pipeline-engine run <plan.json>");
    Ok(())
}

async fn read_plan(path: &Path) -> Result<Plan> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid plan JSON in {}", path.display()))
}

async fn validate(path: &Path) -> Result<ExitCode> {
    let plan = read_plan(path).await?;
    match plan.validate() {
        Ok(()) => {
            println!(
                "Plan is valid: {} node(s), starts at {}",
                plan.nodes.len(),
                plan.start_node_id
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("Plan is invalid: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(
    config: CliConfig,
    path: &Path,
    abstractions: Vec<(String, String)>,
    timeout: Duration,
) -> Result<ExitCode> {
    let plan = read_plan(path).await?;
    tracing::info!(database_url = %config.engine.database_url, "Starting engine");

    let engine = PipelineEngine::builder(config.engine)
        .with_step_registrar(Arc::new(BuiltinStepRegistrar))
        .build()
        .await
        .context("Failed to start engine")?;

    let id = engine
        .start_plan(plan, collect_abstractions(abstractions))
        .await?;
    println!("Plan execution {id} started");

    let status = engine.wait_for_completion(&id, timeout).await;
    let nodes = engine.node_executions(&id).await?;
    engine.shutdown().await;
    let status = status?;

    println!();
    for node in &nodes {
        let indent = "  ".repeat(node.ambiance.depth());
        match &node.failure_info {
            Some(info) if node.status.is_broke() => {
                println!("{indent}{} [{}] {}", node.identifier, node.status, info.error_message)
            }
            _ => println!("{indent}{} [{}]", node.identifier, node.status),
        }
    }
    println!();
    println!("Plan execution {id} finished: {status}");

    Ok(if matches!(status, Status::Succeeded | Status::IgnoreFailed) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_engine=info,orchestrator=info".into()),
        )
        .init();
}
