use harness_core::config::{load_harness_config_or_default, ConfigError, DEFAULT_CONFIG_PATH};
use harness_web::{run_web_server, WebError, WebState};
use harnessd::telemetry::{init_tracing, TelemetryError};
use harnessd::{HarnessService, ServiceError};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    config_path: PathBuf,
    bind_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Run(CliArgs),
    Help(String),
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("{0}")]
    Args(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Web(#[from] WebError),
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("harness-web failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MainError> {
    let mut argv = env::args();
    let program = argv.next().unwrap_or_else(|| "harness-web".to_string());
    let args = match parse_cli_args(argv.collect::<Vec<_>>(), &program)? {
        CliCommand::Run(args) => args,
        CliCommand::Help(text) => {
            println!("{text}");
            return Ok(());
        }
    };

    init_tracing(None, false)?;
    let config = load_harness_config_or_default(&args.config_path)?;
    let bind = resolve_bind(args.bind_override, &config.web.bind)?;
    let service = HarnessService::open(config)?;

    run_web_server(&bind, WebState::new(service)).await?;
    Ok(())
}

fn resolve_bind(bind_override: Option<String>, configured: &str) -> Result<String, MainError> {
    let candidate = bind_override.unwrap_or_else(|| configured.to_string());
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(MainError::Args(
            "bind address must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn parse_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    let mut parsed = CliArgs {
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        bind_override: None,
    };

    let mut idx = 0usize;
    while idx < args.len() {
        let arg = &args[idx];
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(usage(program))),
            "--config" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| MainError::Args("missing value for --config".to_string()))?;
                parsed.config_path = PathBuf::from(value);
            }
            "--bind" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| MainError::Args("missing value for --bind".to_string()))?;
                parsed.bind_override = Some(value.clone());
            }
            other => {
                return Err(MainError::Args(format!(
                    "unknown argument: {other}\n\n{}",
                    usage(program)
                )));
            }
        }
        idx += 1;
    }

    Ok(CliCommand::Run(parsed))
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [--config <path>] [--bind <ip:port>]\n\
Defaults:\n\
  --config {DEFAULT_CONFIG_PATH}\n\
  --bind from [web].bind in the config"
    )
}
