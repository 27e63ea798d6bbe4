//! Run, session, error and remediation records shared across the harness.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::scenario::StepKind;
use crate::state::{
    ActivityStatus, ClientStatus, ErrorRemediationStatus, RemediationStatus, RunStatus,
};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `e2e_{YYYY-MM-DD}_{base36 millis}`.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let millis = now.timestamp_millis().max(0) as u64;
        Self(format!(
            "e2e_{}_{}",
            now.format("%Y-%m-%d"),
            to_base36(millis)
        ))
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `{run_id}_client_{ordinal}`, ordinals starting at 1.
    pub fn for_run(run_id: &RunId, ordinal: u32) -> Self {
        Self(format!("{run_id}_client_{ordinal}"))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorId(pub String);

impl ErrorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(format!(
            "err_{}_{}",
            now.timestamp_millis(),
            random_suffix(6)
        ))
    }
}

impl std::fmt::Display for ErrorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ErrorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemediationRequestId(pub String);

impl RemediationRequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RemediationRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemediationRequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Lowercase alphanumeric suffix used to keep generated identifiers unique.
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Taxonomies
// ---------------------------------------------------------------------------

/// Classified failure kind recorded on every [`ErrorContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    NavigationError,
    ChatTimeout,
    ChatInvalidResponse,
    AgentFailure,
    FlowValidationError,
    Timeout,
    ValidationError,
    ApiError,
    RemediationAnalysisError,
    RemediationDeliveryError,
    /// Unexpected internal failure outside any step predicate.
    Exception,
    /// Client interrupted by a stop request.
    Cancelled,
}

impl ErrorType {
    pub const ALL: [ErrorType; 12] = [
        ErrorType::NavigationError,
        ErrorType::ChatTimeout,
        ErrorType::ChatInvalidResponse,
        ErrorType::AgentFailure,
        ErrorType::FlowValidationError,
        ErrorType::Timeout,
        ErrorType::ValidationError,
        ErrorType::ApiError,
        ErrorType::RemediationAnalysisError,
        ErrorType::RemediationDeliveryError,
        ErrorType::Exception,
        ErrorType::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::NavigationError => "navigation_error",
            ErrorType::ChatTimeout => "chat_timeout",
            ErrorType::ChatInvalidResponse => "chat_invalid_response",
            ErrorType::AgentFailure => "agent_failure",
            ErrorType::FlowValidationError => "flow_validation_error",
            ErrorType::Timeout => "timeout",
            ErrorType::ValidationError => "validation_error",
            ErrorType::ApiError => "api_error",
            ErrorType::RemediationAnalysisError => "remediation_analysis_error",
            ErrorType::RemediationDeliveryError => "remediation_delivery_error",
            ErrorType::Exception => "exception",
            ErrorType::Cancelled => "cancelled",
        }
    }

    /// Cancellation is recorded for inspection only; it is not a product defect.
    pub fn is_defect(self) -> bool {
        self != ErrorType::Cancelled
    }
}

impl std::str::FromStr for ErrorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        ErrorType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                let valid = ErrorType::ALL
                    .iter()
                    .map(|kind| kind.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("invalid error type '{normalized}'. valid values: {valid}")
            })
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!(
                "invalid priority '{other}'. valid values: critical, high, medium, low"
            )),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a remediation request's artifact is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTarget {
    GithubPr,
    CursorTask,
    N8nWorkflow,
}

impl OutputTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputTarget::GithubPr => "github_pr",
            OutputTarget::CursorTask => "cursor_task",
            OutputTarget::N8nWorkflow => "n8n_workflow",
        }
    }

    /// Targets whose artifact is a task for a human rather than an automated change.
    pub fn is_human_review(self) -> bool {
        matches!(self, OutputTarget::CursorTask)
    }
}

impl std::str::FromStr for OutputTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "github_pr" => Ok(OutputTarget::GithubPr),
            "cursor_task" => Ok(OutputTarget::CursorTask),
            "n8n_workflow" => Ok(OutputTarget::N8nWorkflow),
            other => Err(format!(
                "invalid output target '{other}'. valid values: github_pr, cursor_task, n8n_workflow"
            )),
        }
    }
}

impl std::fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FixScope {
    #[default]
    Minimal,
    Comprehensive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// How a run picks its scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ScenarioSelection {
    Ids(Vec<String>),
    Preset(String),
    All,
}

/// Resolved configuration of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub scenario_ids: Vec<String>,
    #[serde(default)]
    pub scenario_preset: Option<String>,
    /// Empty means every persona is eligible.
    #[serde(default)]
    pub persona_ids: Vec<String>,
    /// Relative scenario weights; scenarios without an entry weigh 1.
    #[serde(default)]
    pub scenario_weights: BTreeMap<String, u32>,
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

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenario_ids: Vec::new(),
            scenario_preset: None,
            persona_ids: Vec::new(),
            scenario_weights: BTreeMap::new(),
            max_concurrent_clients: default_max_concurrent_clients(),
            spawn_interval_ms: default_spawn_interval_ms(),
            run_duration_ms: default_run_duration_ms(),
            max_clients: None,
            cleanup_after: true,
        }
    }
}

impl RunConfig {
    /// Explicit ids win over a preset; neither means every scenario.
    pub fn selection(&self) -> ScenarioSelection {
        if !self.scenario_ids.is_empty() {
            ScenarioSelection::Ids(self.scenario_ids.clone())
        } else if let Some(preset) = self.scenario_preset.as_deref() {
            if preset == "all" {
                ScenarioSelection::All
            } else {
                ScenarioSelection::Preset(preset.to_string())
            }
        } else {
            ScenarioSelection::All
        }
    }

    pub fn weight_of(&self, scenario_id: &str) -> u32 {
        self.scenario_weights.get(scenario_id).copied().unwrap_or(1)
    }

    /// Total number of clients this run may spawn, if bounded.
    pub fn spawn_cap(&self) -> Option<usize> {
        match (self.run_duration_ms, self.max_clients) {
            (0, Some(cap)) => Some(cap.min(self.max_concurrent_clients)),
            (0, None) => Some(self.max_concurrent_clients),
            (_, cap) => cap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub clients_spawned: u32,
    pub clients_completed: u32,
    pub clients_failed: u32,
    #[serde(default)]
    pub cleaned_up_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(id: RunId, config: RunConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            config,
            clients_spawned: 0,
            clients_completed: 0,
            clients_failed: 0,
            cleaned_up_at: None,
        }
    }

    pub fn clients_finished(&self) -> u32 {
        self.clients_completed + self.clients_failed
    }

    pub fn counters_consistent(&self) -> bool {
        self.clients_finished() <= self.clients_spawned
    }

    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        let end = self.completed_at.unwrap_or(now);
        (end - self.started_at).num_milliseconds().max(0)
    }
}

// ---------------------------------------------------------------------------
// Client sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_type: StepKind,
    pub outcome: StepOutcome,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub data: Option<serde_json::Value>,
}

/// Rows a client created in the target system, kept for scoped cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResources {
    pub chat_session_id: Option<String>,
    pub contact_id: Option<i64>,
    pub diagnostic_id: Option<String>,
    pub order_id: Option<String>,
}

impl CreatedResources {
    pub fn is_empty(&self) -> bool {
        self.chat_session_id.is_none()
            && self.contact_id.is_none()
            && self.diagnostic_id.is_none()
            && self.order_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSession {
    pub client_id: ClientId,
    pub run_id: RunId,
    pub persona_id: String,
    pub persona_name: String,
    pub contact_email: String,
    pub scenario_id: String,
    pub scenario_name: String,
    /// Session key sent to the target's chat endpoint.
    pub session_key: String,
    pub status: ClientStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step_index: usize,
    pub total_steps: usize,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub created_resources: CreatedResources,
}

impl ClientSession {
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0))
    }
}

/// Progress snapshot of one in-flight client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveActivity {
    pub client_id: ClientId,
    pub persona_id: String,
    pub persona_name: String,
    pub scenario_id: String,
    pub scenario_name: String,
    pub current_step_index: usize,
    pub total_steps: usize,
    /// Step kind, or one of the phases `initializing`, `validating`, `complete`.
    pub current_step_type: String,
    pub current_step_description: String,
    pub started_at: DateTime<Utc>,
    pub step_started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub status: ActivityStatus,
    pub last_action: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioBreakdown {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub running: u32,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

/// One captured step failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_id: ErrorId,
    pub run_id: RunId,
    pub client_id: ClientId,
    pub occurred_at: DateTime<Utc>,
    pub error_type: ErrorType,
    pub message: String,
    pub stack_trace: Option<String>,
    pub scenario_id: String,
    pub persona_id: String,
    pub step_index: usize,
    /// Step kind, or the phase name for failures outside a step.
    pub step_type: String,
    pub step_config: Option<serde_json::Value>,
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
    pub expected: Option<serde_json::Value>,
    pub actual: Option<serde_json::Value>,
    #[serde(default)]
    pub likely_source_files: Vec<String>,
    #[serde(default)]
    pub remediation_status: ErrorRemediationStatus,
    #[serde(default)]
    pub remediation_request_id: Option<RemediationRequestId>,
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationOptions {
    pub output: OutputTarget,
    #[serde(default)]
    pub auto_create_pr: bool,
    #[serde(default = "default_target_branch")]
    pub target_branch: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub fix_scope: FixScope,
    #[serde(default)]
    pub include_tests: bool,
    #[serde(default = "default_true")]
    pub require_approval: bool,
}

fn default_target_branch() -> String {
    "main".to_string()
}

impl RemediationOptions {
    pub fn for_target(output: OutputTarget) -> Self {
        Self {
            output,
            auto_create_pr: false,
            target_branch: default_target_branch(),
            assignees: Vec::new(),
            fix_scope: FixScope::default(),
            include_tests: false,
            require_approval: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAnalysis {
    pub root_cause: String,
    pub affected_files: Vec<String>,
    pub suggested_approach: String,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub estimated_complexity: Complexity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFix {
    pub file: String,
    pub original_content: String,
    pub fixed_content: String,
    pub explanation: String,
    pub lines_added: usize,
    pub lines_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRequest {
    pub id: RemediationRequestId,
    pub run_id: Option<RunId>,
    pub error_ids: Vec<ErrorId>,
    pub options: RemediationOptions,
    pub priority: Priority,
    pub additional_notes: Option<String>,
    pub created_by: Option<String>,
    pub status: RemediationStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub analysis: Option<RemediationAnalysis>,
    #[serde(default)]
    pub fixes: Vec<CodeFix>,
    /// Markdown task description, available once fixes are generated.
    pub task_prompt: Option<String>,
    pub github_pr_url: Option<String>,
    pub cursor_task_id: Option<String>,
    pub n8n_execution_id: Option<String>,
    pub failure_reason: Option<String>,
    pub outcome_notes: Option<String>,
}

impl RemediationRequest {
    /// Reference of the delivered artifact for the request's output target.
    pub fn artifact_reference(&self) -> Option<&str> {
        match self.options.output {
            OutputTarget::GithubPr => self.github_pr_url.as_deref(),
            OutputTarget::CursorTask => self.cursor_task_id.as_deref(),
            OutputTarget::N8nWorkflow => self.n8n_execution_id.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_id_uses_date_and_base36_millis() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).single().expect("valid time");
        let id = RunId::generate(now);
        let expected = format!("e2e_2024-03-05_{}", to_base36(now.timestamp_millis() as u64));
        assert_eq!(id.0, expected);
    }

    #[test]
    fn base36_encodes_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_295), "zz");
    }

    #[test]
    fn client_id_is_scoped_to_run() {
        let run = RunId::new("e2e_2024-01-01_abc");
        assert_eq!(
            ClientId::for_run(&run, 3).0,
            "e2e_2024-01-01_abc_client_3"
        );
    }

    #[test]
    fn error_ids_are_unique_and_prefixed() {
        let now = Utc::now();
        let a = ErrorId::generate(now);
        let b = ErrorId::generate(now);
        assert!(a.0.starts_with("err_"));
        assert_ne!(a, b);
    }

    #[test]
    fn error_type_round_trips_through_str() {
        for kind in ErrorType::ALL {
            assert_eq!(kind.as_str().parse::<ErrorType>().expect("parse"), kind);
        }
        let err = "bogus".parse::<ErrorType>().expect_err("unknown type");
        assert!(err.contains("navigation_error"));
    }

    #[test]
    fn cancelled_is_not_a_defect() {
        assert!(!ErrorType::Cancelled.is_defect());
        assert!(ErrorType::ChatTimeout.is_defect());
    }

    #[test]
    fn selection_prefers_ids_then_preset() {
        let mut config = RunConfig::default();
        assert_eq!(config.selection(), ScenarioSelection::All);

        config.scenario_preset = Some("smoke".to_string());
        assert_eq!(
            config.selection(),
            ScenarioSelection::Preset("smoke".to_string())
        );

        config.scenario_ids = vec!["quick_browse".to_string()];
        assert_eq!(
            config.selection(),
            ScenarioSelection::Ids(vec!["quick_browse".to_string()])
        );

        config.scenario_ids.clear();
        config.scenario_preset = Some("all".to_string());
        assert_eq!(config.selection(), ScenarioSelection::All);
    }

    #[test]
    fn zero_duration_caps_to_one_wave() {
        let config = RunConfig {
            run_duration_ms: 0,
            max_concurrent_clients: 4,
            ..RunConfig::default()
        };
        assert_eq!(config.spawn_cap(), Some(4));

        let config = RunConfig {
            run_duration_ms: 0,
            max_concurrent_clients: 4,
            max_clients: Some(2),
            ..RunConfig::default()
        };
        assert_eq!(config.spawn_cap(), Some(2));

        let config = RunConfig::default();
        assert_eq!(config.spawn_cap(), None);
    }

    #[test]
    fn run_config_deserializes_with_defaults() {
        let config: RunConfig = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(config.max_concurrent_clients, 3);
        assert_eq!(config.run_duration_ms, 60_000);
        assert!(config.cleanup_after);
        assert_eq!(config.weight_of("anything"), 1);
    }

    #[test]
    fn artifact_reference_follows_output_target() {
        let mut request = RemediationRequest {
            id: RemediationRequestId::new("r1"),
            run_id: None,
            error_ids: vec![],
            options: RemediationOptions::for_target(OutputTarget::CursorTask),
            priority: Priority::default(),
            additional_notes: None,
            created_by: None,
            status: RemediationStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            analysis: None,
            fixes: vec![],
            task_prompt: None,
            github_pr_url: Some("https://example.test/pull/1".to_string()),
            cursor_task_id: Some("cursor_1".to_string()),
            n8n_execution_id: None,
            failure_reason: None,
            outcome_notes: None,
        };
        assert_eq!(request.artifact_reference(), Some("cursor_1"));
        request.options.output = OutputTarget::N8nWorkflow;
        assert_eq!(request.artifact_reference(), None);
    }

    #[test]
    fn priority_defaults_to_medium_and_orders() {
        assert_eq!(Priority::default(), Priority::Medium);
        assert!(Priority::Critical > Priority::Low);
    }
}
