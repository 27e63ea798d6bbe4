use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use harness_core::config::{load_harness_config_or_default, DEFAULT_CONFIG_PATH};
use harness_core::persona::all_personas;
use harness_core::scenario::{all_scenarios, scenarios_by_stage, scenarios_by_tag, JourneyStage};
use harness_core::state::{ErrorRemediationStatus, RemediationStatus};
use harness_core::types::{
    ErrorId, FixScope, OutputTarget, Priority, RemediationRequestId, RunConfig, RunId,
};
use harnessd::remediation::NewRemediation;
use harnessd::telemetry::init_tracing;
use harnessd::HarnessService;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "harness",
    author,
    version,
    about = "Behavioral end-to-end harness: simulated visitors, run orchestration and remediation"
)]
struct Cli {
    /// Harness configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter, e.g. `info` or `harnessd=debug`; defaults to RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a run and wait for it; Ctrl-C stops it
    Run(RunArgs),
    /// Show a run with its live statistics
    Status { run_id: String },
    /// List recent runs
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete the synthetic data a finished run created
    Cleanup { run_id: String },
    /// Remove harness records of finished runs older than N days
    Purge {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// List the errors captured by a run
    Errors { run_id: String },
    /// Create a remediation request and wait until it is ready for delivery review
    Remediate(RemediateArgs),
    /// Inspect or act on remediation requests
    Remediation {
        #[command(subcommand)]
        command: RemediationCommand,
    },
    /// Mark every error of a request as fixed or wont_fix
    Mark {
        request_id: String,
        status: ErrorRemediationStatus,
    },
    /// Show the scenario catalog
    Scenarios {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        stage: Option<JourneyStage>,
    },
    /// Show the persona catalog
    Personas,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Scenario id; repeatable
    #[arg(long = "scenario")]
    scenarios: Vec<String>,
    /// Scenario preset: all, critical, smoke, chat, ecommerce
    #[arg(long)]
    preset: Option<String>,
    /// Persona id; repeatable
    #[arg(long = "persona")]
    personas: Vec<String>,
    #[arg(long)]
    concurrency: Option<usize>,
    /// Spawn window in milliseconds; 0 spawns a single wave
    #[arg(long)]
    duration_ms: Option<u64>,
    #[arg(long)]
    max_clients: Option<usize>,
    /// Keep the synthetic data the clients create
    #[arg(long)]
    no_cleanup: bool,
}

#[derive(Debug, Args)]
struct RemediateArgs {
    /// Error ids to remediate together
    #[arg(required = true)]
    error_ids: Vec<String>,
    #[arg(long, default_value = "cursor_task")]
    output: OutputTarget,
    #[arg(long, default_value = "medium")]
    priority: Priority,
    /// Open a pull request when the output is github_pr
    #[arg(long)]
    auto_pr: bool,
    #[arg(long, default_value = "main")]
    branch: String,
    #[arg(long)]
    comprehensive: bool,
    #[arg(long)]
    include_tests: bool,
    #[arg(long)]
    notes: Option<String>,
    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 300)]
    wait_secs: u64,
}

#[derive(Debug, Subcommand)]
enum RemediationCommand {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        status: Option<RemediationStatus>,
    },
    Show {
        request_id: String,
    },
    /// Retry a failed request as a new request over the same errors
    Reprocess {
        request_id: String,
    },
    Cancel {
        request_id: String,
    },
    Delete {
        request_id: String,
    },
}

const REMEDIATION_POLL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_level.as_deref(), cli.log_json) {
        eprintln!("harness failed: {err}");
        std::process::exit(1);
    }
    if let Err(err) = run(cli).await {
        eprintln!("harness failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Scenarios { tag, stage } => {
            let scenarios = match (tag.as_deref(), *stage) {
                (Some(tag), _) => scenarios_by_tag(tag),
                (None, Some(stage)) => scenarios_by_stage(stage),
                (None, None) => all_scenarios().iter().collect(),
            };
            for scenario in scenarios {
                println!(
                    "{:<22} {:<9} {:>2} steps  ~{}s  [{}]",
                    scenario.id,
                    scenario.journey_stage.as_str(),
                    scenario.steps.len(),
                    scenario.estimated_duration_ms / 1000,
                    scenario.tags.join(", ")
                );
            }
            return Ok(());
        }
        Command::Personas => {
            for persona in all_personas() {
                println!(
                    "{:<18} {:<16} {:<16} urgency={} budget={}",
                    persona.id,
                    persona.name,
                    persona.role.as_str(),
                    persona.urgency.as_str(),
                    persona.budget.as_str()
                );
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_harness_config_or_default(&cli.config)?;
    let service = HarnessService::open(config)?;

    match cli.command {
        Command::Run(args) => run_and_wait(&service, args).await,
        Command::Status { run_id } => print_json(&service.orchestrator.status(&RunId::new(run_id))?),
        Command::List { limit } => {
            for summary in service.orchestrator.list(limit)? {
                let run = &summary.run;
                println!(
                    "{}  {:<9} spawned={} completed={} failed={}{}",
                    run.id,
                    run.status.as_str(),
                    run.clients_spawned,
                    run.clients_completed,
                    run.clients_failed,
                    if summary.active { "  (active)" } else { "" }
                );
            }
            Ok(())
        }
        Command::Cleanup { run_id } => {
            print_json(&service.orchestrator.cleanup(&RunId::new(run_id)).await?)
        }
        Command::Purge { days } => {
            let report = service.orchestrator.purge_older_than(days)?;
            println!(
                "purged {} runs, {} sessions, {} errors",
                report.runs, report.sessions, report.errors
            );
            Ok(())
        }
        Command::Errors { run_id } => {
            for error in service.errors_for_run(&RunId::new(run_id))? {
                println!(
                    "{}  {:<24} {}#{} {:<12} {}",
                    error.error_id,
                    error.error_type.as_str(),
                    error.scenario_id,
                    error.step_index,
                    error.remediation_status.as_str(),
                    error.message
                );
            }
            Ok(())
        }
        Command::Remediate(args) => remediate_and_wait(&service, args).await,
        Command::Remediation { command } => remediation(&service, command).await,
        Command::Mark { request_id, status } => {
            let outcome = service
                .remediation
                .mark_errors(&RemediationRequestId::new(request_id), status)?;
            println!(
                "{} errors updated; request {} is {}",
                outcome.updated,
                outcome.request.id,
                outcome.request.status.as_str()
            );
            Ok(())
        }
        Command::Scenarios { .. } | Command::Personas => Ok(()),
    }
}

async fn run_and_wait(service: &HarnessService, args: RunArgs) -> anyhow::Result<()> {
    let mut config: RunConfig = service.config.orchestrator.default_run_config();
    if !args.scenarios.is_empty() {
        config.scenario_ids = args.scenarios;
    }
    if args.preset.is_some() {
        config.scenario_preset = args.preset;
    }
    if !args.personas.is_empty() {
        config.persona_ids = args.personas;
    }
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_clients = concurrency;
    }
    if let Some(duration_ms) = args.duration_ms {
        config.run_duration_ms = duration_ms;
    }
    if args.max_clients.is_some() {
        config.max_clients = args.max_clients;
    }
    if args.no_cleanup {
        config.cleanup_after = false;
    }

    let run = service.orchestrator.start(config)?;
    info!(run_id = %run.id, "run started; press Ctrl-C to stop");

    let finished = tokio::select! {
        finished = service.orchestrator.wait(&run.id) => finished?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            warn!(run_id = %run.id, "stop requested");
            service.orchestrator.stop(&run.id)?;
            service.orchestrator.wait(&run.id).await?
        }
    };
    print_json(&service.orchestrator.results(&finished.id)?)
}

async fn remediate_and_wait(service: &HarnessService, args: RemediateArgs) -> anyhow::Result<()> {
    let mut input = NewRemediation::new(
        args.error_ids.into_iter().map(ErrorId::new).collect(),
        args.output,
    );
    input.priority = args.priority;
    input.additional_notes = args.notes;
    input.created_by = Some("cli".to_string());
    input.options.auto_create_pr = args.auto_pr;
    input.options.target_branch = args.branch;
    input.options.include_tests = args.include_tests;
    if args.comprehensive {
        input.options.fix_scope = FixScope::Comprehensive;
    }

    let request = service.remediation.create(input)?;
    info!(request_id = %request.id, "remediation request created");
    settle(service, &request.id, Duration::from_secs(args.wait_secs)).await
}

async fn remediation(service: &HarnessService, command: RemediationCommand) -> anyhow::Result<()> {
    let engine = &service.remediation;
    match command {
        RemediationCommand::List { limit, status } => {
            for request in engine.list(limit, status)? {
                println!(
                    "{}  {:<16} {:<12} {:<8} errors={}",
                    request.id,
                    request.status.as_str(),
                    request.options.output.as_str(),
                    request.priority.as_str(),
                    request.error_ids.len()
                );
            }
            Ok(())
        }
        RemediationCommand::Show { request_id } => {
            let detail = engine.get(&RemediationRequestId::new(request_id))?;
            print_json(&detail.request)?;
            if let Some(prompt) = &detail.task_prompt {
                println!("\n{prompt}");
            }
            Ok(())
        }
        RemediationCommand::Reprocess { request_id } => {
            let request = engine.reprocess(&RemediationRequestId::new(request_id))?;
            settle(service, &request.id, Duration::from_secs(300)).await
        }
        RemediationCommand::Cancel { request_id } => {
            let request = engine.cancel(&RemediationRequestId::new(request_id))?;
            println!("request {} is {}", request.id, request.status.as_str());
            Ok(())
        }
        RemediationCommand::Delete { request_id } => {
            let detached = engine.delete(&RemediationRequestId::new(request_id))?;
            println!("deleted; {detached} errors released");
            Ok(())
        }
    }
}

async fn settle(
    service: &HarnessService,
    request_id: &RemediationRequestId,
    timeout: Duration,
) -> anyhow::Result<()> {
    let request = service
        .remediation
        .wait_until_settled(request_id, REMEDIATION_POLL, timeout)
        .await?;
    if request.status == RemediationStatus::Failed {
        bail!(
            "remediation {} failed: {}",
            request.id,
            request.failure_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    println!("request {} is {}", request.id, request.status.as_str());
    if let Some(reference) = request.artifact_reference() {
        println!("artifact: {reference}");
    }
    if let Some(notes) = &request.outcome_notes {
        println!("notes: {notes}");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
