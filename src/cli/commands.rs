//! CLI command definitions for drupal-bench.
//!
//! `evaluate` runs a model over one or more task catalogs, `verify-catalog`
//! filters a catalog down to tasks whose reference solution applies, `score`
//! rescores a results file and `publish` merges it into a leaderboard.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::{info, warn};

use crate::catalog::TaskCatalog;
use crate::execution::{DockerClient, SandboxController};
use crate::llm::{LiteLlmClient, LlmProvider, LlmSampler, OpenRouterProvider};
use crate::metrics::{init_metrics, write_textfile};
use crate::pipeline::{
    verify_catalog, EvalConfig, EvaluationOrchestrator, ProgressCounters, ProgressMonitor,
    RunOptions,
};
use crate::runner::SampleRunner;
use crate::storage::{self, ModelResult, ResultsStore};
use crate::validators::ValidatorSuite;

/// How often the progress monitor logs during `evaluate`.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// Evaluation harness for LLM-generated Drupal patches.
#[derive(Parser)]
#[command(name = "drupal-bench")]
#[command(about = "Evaluate LLM-generated patches against a Drupal sandbox")]
#[command(version)]
#[command(
    long_about = "drupal-bench asks a model for candidate patches, applies each one to a reset Drupal sandbox, runs functional tests and domain checks, and records pass@1/pass@5.\n\nExample usage:\n  drupal-bench evaluate --catalog tasks.json --model openai/gpt-4o --samples 5"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate a model over task catalogs, resuming from its results file.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Keep only the tasks whose reference solution applies to the sandbox.
    VerifyCatalog(VerifyCatalogArgs),

    /// Recompute aggregates for a results file.
    Score(ScoreArgs),

    /// Merge a results file into a leaderboard file.
    Publish(PublishArgs),
}

/// Arguments for `drupal-bench evaluate`.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Real-issue task catalog (repeatable).
    #[arg(short = 'c', long = "catalog", required = true)]
    pub catalogs: Vec<PathBuf>,

    /// Synthetic task catalog (repeatable).
    #[arg(long = "synthetic")]
    pub synthetic: Vec<PathBuf>,

    /// Evaluate only this task.
    #[arg(short = 't', long)]
    pub task: Option<String>,

    /// Samples per task.
    #[arg(short = 'n', long)]
    pub samples: Option<usize>,

    /// Re-evaluate tasks already in the results file.
    #[arg(long)]
    pub force: bool,

    /// Results file (default: results/<model>.json).
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Model identifier.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// OpenRouter API key. Without one, the LiteLLM proxy from LITELLM_API_BASE is used.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Sandbox container name or id.
    #[arg(long)]
    pub container: Option<String>,

    /// Working tree root inside the container.
    #[arg(long)]
    pub workdir: Option<String>,

    /// Test and recipe command timeout in seconds.
    #[arg(long)]
    pub test_timeout: Option<u64>,

    /// Sandbox operation timeout in seconds.
    #[arg(long)]
    pub exec_timeout: Option<u64>,

    /// Record domain checks without letting them decide `passed`.
    #[arg(long)]
    pub advisory_domain_checks: bool,

    /// Write Prometheus metrics to this file when the run ends.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl EvaluateArgs {
    /// Applies command-line overrides on top of `config`.
    fn apply(&self, mut config: EvalConfig) -> EvalConfig {
        if let Some(samples) = self.samples {
            config.samples = samples;
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(container) = &self.container {
            config.container = container.clone();
        }
        if let Some(workdir) = &self.workdir {
            config.workdir = workdir.clone();
        }
        if let Some(secs) = self.test_timeout {
            config.test_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.exec_timeout {
            config.exec_timeout = Duration::from_secs(secs);
        }
        if self.advisory_domain_checks {
            config.advisory_domain_checks = true;
        }
        config
    }
}

/// Arguments for `drupal-bench verify-catalog`.
#[derive(Parser, Debug)]
pub struct VerifyCatalogArgs {
    /// Real-issue task catalog (repeatable).
    #[arg(short = 'c', long = "catalog", required = true)]
    pub catalogs: Vec<PathBuf>,

    /// Synthetic task catalog (repeatable).
    #[arg(long = "synthetic")]
    pub synthetic: Vec<PathBuf>,

    /// Where to write the verified catalog.
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Sandbox container name or id.
    #[arg(long)]
    pub container: Option<String>,

    /// Working tree root inside the container.
    #[arg(long)]
    pub workdir: Option<String>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `drupal-bench score`.
#[derive(Parser, Debug)]
pub struct ScoreArgs {
    /// Results file to rescore.
    #[arg(short = 'r', long)]
    pub results: PathBuf,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `drupal-bench publish`.
#[derive(Parser, Debug)]
pub struct PublishArgs {
    /// Results file to publish.
    #[arg(short = 'r', long)]
    pub results: PathBuf,

    /// Leaderboard file (JSON array of model results).
    #[arg(long)]
    pub leaderboard: PathBuf,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Evaluate(args) => run_evaluate_command(args).await,
        Commands::VerifyCatalog(args) => run_verify_catalog_command(args).await,
        Commands::Score(args) => run_score_command(args),
        Commands::Publish(args) => run_publish_command(args),
    }
}

// ============================================================================
// Evaluate
// ============================================================================

async fn run_evaluate_command(args: EvaluateArgs) -> anyhow::Result<()> {
    let config = args.apply(EvalConfig::from_env()?);
    config.validate()?;

    if args.metrics_file.is_some() {
        init_metrics()?;
    }

    let catalog = TaskCatalog::load_all(&args.catalogs, &args.synthetic)?;
    let provider = build_llm_client(args.api_key.clone(), &config.model)?;
    let sampler = LlmSampler::new(provider, config.model.clone()).with_temperature(config.temperature);

    let docker = DockerClient::new()?;
    let sandbox = SandboxController::new(docker, config.sandbox_settings());
    let runner = SampleRunner::new(ValidatorSuite::standard(&config.validator_config()));

    let output = config.output_path();
    let mut store = ResultsStore::open(&output, &config.model)?;

    info!(
        model = %config.model,
        container = %config.container,
        tasks = catalog.len(),
        validators = ?runner.suite().names(),
        results = %output.display(),
        "Evaluation configured"
    );

    let counters = ProgressCounters::new();
    let orchestrator = EvaluationOrchestrator::new(Arc::new(sandbox), runner, Arc::new(sampler))
        .with_counters(counters.clone());
    let options = RunOptions {
        task: args.task.clone(),
        samples: config.samples,
        force: args.force,
    };

    let monitor = ProgressMonitor::start(counters, catalog.len(), PROGRESS_INTERVAL);
    let outcome = orchestrator.run(&catalog, &mut store, &options).await;
    monitor.stop().await;

    if let Some(path) = &args.metrics_file {
        if let Err(e) = write_textfile(path) {
            warn!(path = %path.display(), error = %e, "Failed to write metrics file");
        }
    }

    let summary = outcome?;
    if args.json {
        let value = json!({
            "model_name": config.model,
            "results": output,
            "evaluated": summary.evaluated,
            "skipped": summary.skipped,
            "scores": summary.scores,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("\n=== Evaluation Results ===");
        println!("Model:        {}", config.model);
        println!("Results file: {}", output.display());
        println!("Evaluated:    {}", summary.evaluated);
        println!("Skipped:      {}", summary.skipped);
        print_scores(store.result());
    }
    Ok(())
}

fn build_llm_client(api_key: Option<String>, model: &str) -> anyhow::Result<Arc<dyn LlmProvider>> {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        info!(model = %model, "Using OpenRouter with specified API key");
        Ok(Arc::new(OpenRouterProvider::with_model(key, model)?))
    } else {
        info!("Using LiteLLM client from environment");
        Ok(Arc::new(LiteLlmClient::from_env().map_err(|e| {
            anyhow::anyhow!(
                "Failed to initialize LLM client: {}. Please provide --api-key or set OPENROUTER_API_KEY or LITELLM_API_BASE.",
                e
            )
        })?))
    }
}

// ============================================================================
// Verify catalog
// ============================================================================

async fn run_verify_catalog_command(args: VerifyCatalogArgs) -> anyhow::Result<()> {
    let mut config = EvalConfig::from_env()?;
    if let Some(container) = &args.container {
        config.container = container.clone();
    }
    if let Some(workdir) = &args.workdir {
        config.workdir = workdir.clone();
    }
    config.validate()?;

    let catalog = TaskCatalog::load_all(&args.catalogs, &args.synthetic)?;
    let sandbox = SandboxController::new(DockerClient::new()?, config.sandbox_settings());

    let verification = verify_catalog(&sandbox, &catalog).await;
    let kept = verification.kept.len();
    let verified = TaskCatalog::from_tasks(verification.kept)?;
    write_text(&args.output, &verified.to_json()?)?;

    if args.json {
        let dropped: Vec<_> = verification
            .dropped
            .iter()
            .map(|(id, reason)| json!({ "task_id": id, "reason": reason }))
            .collect();
        let value = json!({
            "output": args.output,
            "total": catalog.len(),
            "kept": kept,
            "dropped": dropped,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Verified {} of {} tasks -> {}", kept, catalog.len(), args.output.display());
        for (id, reason) in &verification.dropped {
            println!("  dropped {id}: {}", first_line(reason));
        }
    }
    Ok(())
}

fn write_text(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}

// ============================================================================
// Score and publish
// ============================================================================

fn load_results(path: &Path) -> anyhow::Result<ModelResult> {
    ResultsStore::load(path)?
        .ok_or_else(|| anyhow::anyhow!("Results file not found: {}", path.display()))
}

fn run_score_command(args: ScoreArgs) -> anyhow::Result<()> {
    let result = load_results(&args.results)?;
    if args.json {
        let value = json!({
            "model_name": result.model_name,
            "scores": result.summary(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Model: {}", result.model_name);
        for task in &result.tasks {
            println!(
                "  {:<12} {:<6} {}/{}  {}",
                task.task_id,
                if task.passed { "PASS" } else { "FAIL" },
                task.correct_samples,
                task.total_samples,
                first_line(&task.quality_summary)
            );
        }
        print_scores(&result);
    }
    Ok(())
}

fn run_publish_command(args: PublishArgs) -> anyhow::Result<()> {
    let result = load_results(&args.results)?;
    let entries = storage::publish(&args.leaderboard, &result)?;
    println!(
        "Published {} to {} ({} models)",
        result.model_name,
        args.leaderboard.display(),
        entries
    );
    Ok(())
}

fn print_scores(result: &ModelResult) {
    let scores = result.summary();
    println!("Tasks:        {}", scores.total_tasks);
    println!("Samples:      {}", scores.total_samples);
    println!("Correct:      {}", scores.total_correct);
    println!("pass@1:       {:.4}", scores.pass_at_1);
    println!("pass@5:       {:.4}", scores.pass_at_5);
}
