use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use cadence::budget::BudgetLedger;
use cadence::engine::{analyze, WorkflowExecutor};
use cadence::runner::SimulatedRunner;
use cadence::{Config, Plan};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Orchestrated plan execution behind a token budget", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report parallelism, conflicts, the critical path and structural issues
    Analyze {
        #[arg(help = "Plan document (.yaml, .yml or .json)")]
        plan: PathBuf,
    },
    /// Execute a plan with the simulated runner
    Run {
        #[arg(help = "Plan document (.yaml, .yml or .json)")]
        plan: PathBuf,
        #[arg(long, help = "TOML configuration file")]
        config: Option<PathBuf>,
        #[arg(long = "fail", help = "Action index the runner reports as failed")]
        fail: Vec<usize>,
        #[arg(long = "error", help = "Action index the runner raises an error for")]
        error: Vec<usize>,
        #[arg(long, default_value_t = 0, help = "Simulated latency per action")]
        latency_ms: u64,
    },
    /// Print the budget configuration and a fresh ledger's analytics
    Budget {
        #[arg(long, help = "TOML configuration file")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { plan } => analyze_plan(&plan)?,
        Commands::Run {
            plan,
            config,
            fail,
            error,
            latency_ms,
        } => run_plan(&plan, config.as_deref(), &fail, &error, latency_ms).await?,
        Commands::Budget { config } => show_budget(config.as_deref())?,
    }

    Ok(())
}

fn load_plan(path: &Path) -> Result<Plan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;

    let plan = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Plan::from_json_str(&content)?,
        _ => Plan::from_yaml_str(&content)?,
    };
    Ok(plan)
}

fn analyze_plan(path: &Path) -> Result<()> {
    let plan = load_plan(path)?;
    let analysis = analyze(&plan);

    println!("Plan: {} ({} actions, {} strategy)", plan.name, plan.len(), plan.strategy().as_str());
    println!("Parallelizable actions: {}", analysis.parallelizable_actions);

    let path: Vec<String> = analysis.critical_path.iter().map(|i| i.to_string()).collect();
    println!("Critical path: {}", path.join(" -> "));

    for conflict in &analysis.resource_conflicts {
        let actions: Vec<String> = conflict.actions.iter().map(|i| i.to_string()).collect();
        println!("Conflict on '{}': actions {}", conflict.resource, actions.join(", "));
    }
    for issue in &analysis.issues {
        println!("Issue: {}", issue);
    }
    if analysis.has_cycle {
        println!("Issue: dependency cycle detected");
    }
    for suggestion in &analysis.suggestions {
        println!("Suggestion: {}", suggestion);
    }

    println!("Ready: {}", analysis.is_ready());
    Ok(())
}

async fn run_plan(
    path: &Path,
    config: Option<&Path>,
    fail: &[usize],
    error: &[usize],
    latency_ms: u64,
) -> Result<()> {
    let config = Config::load(config)?;
    let plan = load_plan(path)?;

    let analysis = analyze(&plan);
    if !analysis.is_ready() {
        for issue in &analysis.issues {
            eprintln!("Issue: {}", issue);
        }
        if analysis.has_cycle {
            eprintln!("Issue: dependency cycle detected");
        }
        bail!("plan '{}' is not ready to run", plan.name);
    }

    let runner = fail.iter().fold(
        SimulatedRunner::new(Duration::from_millis(latency_ms)),
        |runner, &index| runner.fail(index),
    );
    let runner = error.iter().fold(runner, |runner, &index| runner.error(index));

    let ledger = Arc::new(BudgetLedger::new(config.budget));
    let executor = WorkflowExecutor::new(Arc::new(runner), ledger, config.executor);

    println!("Running plan '{}' ({} actions)", plan.name, plan.len());
    let report = executor.execute(plan).await?;

    println!("{}", report.summary());
    println!(
        "\nWorkflow {} {}: {} succeeded, {} failed in {:?}",
        report.workflow_id,
        report.status.as_str(),
        report.successful(),
        report.failed(),
        report.elapsed
    );

    let metrics = executor.metrics();
    println!(
        "Executed: {} total, {} successful, {} failed",
        metrics.total_executed, metrics.successful, metrics.failed
    );

    Ok(())
}

fn show_budget(config: Option<&Path>) -> Result<()> {
    let config = Config::load(config)?;
    println!("{}", toml::to_string_pretty(&config.budget)?);

    let ledger = BudgetLedger::new(config.budget);
    let analytics = ledger.analytics();
    let snapshot = ledger.snapshot();

    println!("Status: {}", analytics.status.as_str());
    println!("Usage: {:.1}%", analytics.usage_fraction * 100.0);
    println!("Degradation: {}", snapshot.degradation.as_str());
    println!("Next reset: {}", snapshot.next_reset);
    Ok(())
}
