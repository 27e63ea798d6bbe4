//! Harness configuration loaded from `config/harness.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::RunConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/harness.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level harness configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// The application under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// SQLite file backing the target's data; validation and cleanup need it.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_admin_token_env")]
    pub admin_token_env: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            database_path: None,
            admin_token_env: default_admin_token_env(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_admin_token_env() -> String {
    "HARNESS_ADMIN_TOKEN".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    /// Root of the JSONL event log; one global file plus one file per run.
    #[serde(default = "default_event_log_dir")]
    pub event_log_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            event_log_dir: default_event_log_dir(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from(".harness/state.sqlite")
}

fn default_event_log_dir() -> PathBuf {
    PathBuf::from(".harness/events")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    Mock,
    Openai,
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::Mock => "mock",
            LlmProvider::Openai => "openai",
            LlmProvider::Anthropic => "anthropic",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mock" => Ok(LlmProvider::Mock),
            "openai" => Ok(LlmProvider::Openai),
            "anthropic" => Ok(LlmProvider::Anthropic),
            other => Err(format!(
                "invalid llm provider '{other}'. valid values: mock, openai, anthropic"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Conversation length after which the agent politely ends the chat.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    /// Environment variable holding the provider key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Mock,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_turns: default_max_turns(),
            timeout_ms: default_llm_timeout_ms(),
            api_key_env: None,
        }
    }
}

impl LlmConfig {
    pub fn api_key_env_name(&self) -> &str {
        match (&self.api_key_env, self.provider) {
            (Some(name), _) => name,
            (None, LlmProvider::Anthropic) => "ANTHROPIC_API_KEY",
            (None, _) => "OPENAI_API_KEY",
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    200
}

fn default_max_turns() -> usize {
    20
}

fn default_llm_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent_clients")]
    pub max_concurrent_clients: usize,
    #[serde(default = "default_spawn_interval_ms")]
    pub spawn_interval_ms: u64,
    /// Zero spawns a single wave of `max_concurrent_clients`.
    #[serde(default = "default_run_duration_ms")]
    pub run_duration_ms: u64,
    #[serde(default)]
    pub max_clients: Option<usize>,
    #[serde(default = "default_true")]
    pub cleanup_after: bool,
    #[serde(default = "default_test_data_prefix")]
    pub test_data_prefix: String,
    #[serde(default = "default_recent_errors_capacity")]
    pub recent_errors_capacity: usize,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_true")]
    pub inter_step_delay: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_clients: default_max_concurrent_clients(),
            spawn_interval_ms: default_spawn_interval_ms(),
            run_duration_ms: default_run_duration_ms(),
            max_clients: None,
            cleanup_after: true,
            test_data_prefix: default_test_data_prefix(),
            recent_errors_capacity: default_recent_errors_capacity(),
            stop_grace_ms: default_stop_grace_ms(),
            inter_step_delay: true,
        }
    }
}

impl OrchestratorConfig {
    /// Run configuration seeded from these defaults.
    pub fn default_run_config(&self) -> RunConfig {
        RunConfig {
            max_concurrent_clients: self.max_concurrent_clients,
            spawn_interval_ms: self.spawn_interval_ms,
            run_duration_ms: self.run_duration_ms,
            max_clients: self.max_clients,
            cleanup_after: self.cleanup_after,
            ..RunConfig::default()
        }
    }
}

fn default_max_concurrent_clients() -> usize {
    3
}

fn default_spawn_interval_ms() -> u64 {
    5_000
}

fn default_run_duration_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_test_data_prefix() -> String {
    "test_e2e_".to_string()
}

fn default_recent_errors_capacity() -> usize {
    10
}

fn default_stop_grace_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub default_interval_ms: u64,
    #[serde(default = "default_poll_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_poll_interval_ms(),
            default_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_poll_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// `owner/name` of the repository fixes are proposed against.
    #[serde(default)]
    pub github_repo: Option<String>,
    #[serde(default = "default_github_token_env")]
    pub github_token_env: String,
    #[serde(default = "default_github_api_base")]
    pub github_api_base: String,
    #[serde(default)]
    pub n8n_webhook_url: Option<String>,
    /// Base URL the workflow calls back on; defaults to the target base URL.
    #[serde(default)]
    pub callback_base_url: Option<String>,
    #[serde(default = "default_task_dir")]
    pub task_dir: PathBuf,
    #[serde(default = "default_max_fix_files")]
    pub max_fix_files: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            github_repo: None,
            github_token_env: default_github_token_env(),
            github_api_base: default_github_api_base(),
            n8n_webhook_url: None,
            callback_base_url: None,
            task_dir: default_task_dir(),
            max_fix_files: default_max_fix_files(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_task_dir() -> PathBuf {
    PathBuf::from(".harness/tasks")
}

fn default_max_fix_files() -> usize {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> u64 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_bind")]
    pub bind: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_web_bind(),
        }
    }
}

fn default_web_bind() -> String {
    "127.0.0.1:9850".to_string()
}

pub fn parse_harness_config(contents: &str) -> Result<HarnessConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_harness_config(path: impl AsRef<Path>) -> Result<HarnessConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_harness_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Loads the file when it exists, otherwise returns the defaults.
pub fn load_harness_config_or_default(
    path: impl AsRef<Path>,
) -> Result<HarnessConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(HarnessConfig::default());
    }
    load_harness_config(path_ref)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "{file_name}-{}.toml",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_harness_config("").expect("parse empty config");
        assert_eq!(config, HarnessConfig::default());
        assert_eq!(config.target.base_url, "http://localhost:3000");
        assert_eq!(config.llm.provider, LlmProvider::Mock);
        assert_eq!(config.orchestrator.max_concurrent_clients, 3);
        assert_eq!(config.orchestrator.recent_errors_capacity, 10);
        assert_eq!(config.polling.default_interval_ms, 1_000);
        assert_eq!(config.web.bind, "127.0.0.1:9850");
    }

    #[test]
    fn sections_override_individual_fields() {
        let config = parse_harness_config(
            r#"
[target]
base_url = "https://staging.example.com"
database_path = "/var/lib/app.sqlite"

[llm]
provider = "anthropic"
model = "claude-3-haiku"

[orchestrator]
max_concurrent_clients = 8
max_clients = 20
cleanup_after = false

[remediation]
github_repo = "acme/site"
"#,
        )
        .expect("parse config");

        assert_eq!(config.target.base_url, "https://staging.example.com");
        assert_eq!(config.target.request_timeout_ms, 10_000);
        assert_eq!(
            config.target.database_path,
            Some(PathBuf::from("/var/lib/app.sqlite"))
        );
        assert_eq!(config.llm.provider, LlmProvider::Anthropic);
        assert_eq!(config.llm.api_key_env_name(), "ANTHROPIC_API_KEY");
        assert_eq!(config.llm.max_tokens, 200);
        assert_eq!(config.orchestrator.max_clients, Some(20));
        assert!(!config.orchestrator.cleanup_after);
        assert_eq!(config.remediation.github_repo.as_deref(), Some("acme/site"));
        assert_eq!(config.remediation.github_token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn orchestrator_defaults_seed_run_config() {
        let mut config = OrchestratorConfig::default();
        config.max_concurrent_clients = 5;
        config.run_duration_ms = 0;
        let run = config.default_run_config();
        assert_eq!(run.max_concurrent_clients, 5);
        assert_eq!(run.run_duration_ms, 0);
        assert!(run.scenario_ids.is_empty());
    }

    #[test]
    fn load_classifies_read_and_parse_errors() {
        let missing_path = unique_temp_path("harness-missing-config");
        let err = load_harness_config(&missing_path).expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Read { path, .. } if path == missing_path));

        let default = load_harness_config_or_default(&missing_path).expect("defaults");
        assert_eq!(default, HarnessConfig::default());

        let invalid_path = unique_temp_path("harness-invalid-config");
        fs::write(&invalid_path, "[target\nbase_url = 1").expect("write invalid fixture");
        let err = load_harness_config(&invalid_path).expect_err("invalid config should fail");
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == invalid_path));
        let _ = fs::remove_file(invalid_path);
    }

    #[test]
    fn provider_parse_rejects_unknown_values() {
        assert_eq!("OpenAI".parse::<LlmProvider>(), Ok(LlmProvider::Openai));
        let err = "gemini".parse::<LlmProvider>().expect_err("unknown");
        assert!(err.contains("valid values"));
    }
}
