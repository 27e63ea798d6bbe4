use std::collections::BTreeMap;

use harness_core::events::HarnessEvent;
use harness_core::scenario::Scenario;
use harness_core::state::{ErrorRemediationStatus, RemediationStatus};
use harness_core::types::{
    ErrorContext, ErrorId, FixScope, OutputTarget, Priority, RemediationRequest, RunConfig,
};
use harnessd::remediation::NewRemediation;
use harnessd::{CleanupOutcome, PurgeReport, RunSummary};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PURGE_DAYS: u32 = 7;

/// Body of `POST /api/testing/run`. Absent fields fall back to the
/// `[orchestrator]` section of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    #[serde(default)]
    pub scenario_ids: Vec<String>,
    #[serde(default)]
    pub scenario_preset: Option<String>,
    #[serde(default)]
    pub persona_ids: Vec<String>,
    #[serde(default)]
    pub scenario_weights: BTreeMap<String, u32>,
    #[serde(default)]
    pub max_concurrent_clients: Option<usize>,
    #[serde(default)]
    pub spawn_interval: Option<u64>,
    /// Milliseconds.
    #[serde(default)]
    pub run_duration: Option<u64>,
    #[serde(default)]
    pub max_clients: Option<usize>,
    #[serde(default)]
    pub cleanup_after: Option<bool>,
}

impl StartRunRequest {
    pub fn into_run_config(self, mut base: RunConfig) -> RunConfig {
        if !self.scenario_ids.is_empty() {
            base.scenario_ids = self.scenario_ids;
        }
        if self.scenario_preset.is_some() {
            base.scenario_preset = self.scenario_preset;
        }
        if !self.persona_ids.is_empty() {
            base.persona_ids = self.persona_ids;
        }
        if !self.scenario_weights.is_empty() {
            base.scenario_weights = self.scenario_weights;
        }
        if let Some(value) = self.max_concurrent_clients {
            base.max_concurrent_clients = value;
        }
        if let Some(value) = self.spawn_interval {
            base.spawn_interval_ms = value;
        }
        if let Some(value) = self.run_duration {
            base.run_duration_ms = value;
        }
        if self.max_clients.is_some() {
            base.max_clients = self.max_clients;
        }
        if let Some(value) = self.cleanup_after {
            base.cleanup_after = value;
        }
        base
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub run_id: String,
    pub config: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunListResponse {
    pub runs: Vec<RunSummary>,
    pub active_run_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRunResponse {
    pub run_id: String,
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIdQuery {
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_count: usize,
    pub failures: Vec<String>,
}

impl From<CleanupOutcome> for CleanupResponse {
    fn from(outcome: CleanupOutcome) -> Self {
        Self {
            success: outcome.success,
            deleted_count: outcome.deleted_count,
            failures: outcome.failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default)]
    pub days_old: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    pub days_old: u32,
    pub runs: usize,
    pub sessions: usize,
    pub errors: usize,
    pub total: usize,
}

impl PurgeResponse {
    pub fn new(days_old: u32, report: PurgeReport) -> Self {
        Self {
            days_old,
            runs: report.runs,
            sessions: report.sessions,
            errors: report.errors,
            total: report.total(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorListResponse {
    pub errors: Vec<ErrorContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPatchRequest {
    pub remediation_status: ErrorRemediationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkErrorPatchRequest {
    pub request_id: String,
    pub remediation_status: ErrorRemediationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkErrorPatchResponse {
    pub updated: usize,
    pub request: RemediationRequest,
}

/// Body of `POST /api/testing/remediation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRemediationRequest {
    pub error_ids: Vec<String>,
    pub output: OutputTarget,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub auto_create_pr: bool,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub fix_scope: FixScope,
    #[serde(default)]
    pub include_tests: bool,
    #[serde(default)]
    pub require_approval: Option<bool>,
    #[serde(default)]
    pub additional_notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl From<CreateRemediationRequest> for NewRemediation {
    fn from(body: CreateRemediationRequest) -> Self {
        let mut input = NewRemediation::new(
            body.error_ids.into_iter().map(ErrorId::new).collect(),
            body.output,
        );
        input.priority = body.priority;
        input.additional_notes = body.additional_notes;
        input.created_by = body.created_by;
        input.options.auto_create_pr = body.auto_create_pr;
        if let Some(branch) = body.target_branch {
            input.options.target_branch = branch;
        }
        input.options.assignees = body.assignees;
        input.options.fix_scope = body.fix_scope;
        input.options.include_tests = body.include_tests;
        if let Some(require) = body.require_approval {
            input.options.require_approval = require;
        }
        input
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemediationListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub status: Option<RemediationStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationListResponse {
    pub requests: Vec<RemediationRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationDetailResponse {
    pub request: RemediationRequest,
    pub errors: Vec<ErrorContext>,
    pub task_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationActionRequest {
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRemediationResponse {
    pub deleted: bool,
    pub errors_released: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScenarioQuery {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub journey_stage: String,
    pub tags: Vec<String>,
    pub step_count: usize,
    pub estimated_duration_ms: u64,
}

impl From<&Scenario> for ScenarioView {
    fn from(scenario: &Scenario) -> Self {
        Self {
            id: scenario.id.clone(),
            name: scenario.name.clone(),
            description: scenario.description.clone(),
            journey_stage: scenario.journey_stage.as_str().to_string(),
            tags: scenario.tags.clone(),
            step_count: scenario.steps.len(),
            estimated_duration_ms: scenario.estimated_duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioListResponse {
    pub scenarios: Vec<ScenarioView>,
    pub presets: Vec<String>,
    pub estimated_total_duration_ms: u64,
}

pub fn web_event_name(event: &HarnessEvent) -> &'static str {
    event.kind.name()
}
