//! Analyze, fix and deliver pipeline over captured errors.
//!
//! A request moves `pending → analyzing → generating_fix` in a background
//! task and then either waits at `review_required` or is delivered straight
//! to its target. Every status change is persisted before it is announced,
//! so polling [`RemediationEngine::get`] never misses one.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use harness_core::config::HarnessConfig;
use harness_core::events::EventKind;
use harness_core::state::{ErrorRemediationStatus, RemediationStatus, TransitionError};
use harness_core::types::{
    CodeFix, Complexity, ErrorContext, ErrorId, ErrorType, FixScope, OutputTarget, Priority,
    RemediationAnalysis, RemediationOptions, RemediationRequest, RemediationRequestId,
};
use harness_deliver::{render_task_prompt, truncate_chars, Deliverer, DeliveryPackage, ErrorDigest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chat_agent::{ChatTurn, LlmBackend, LlmRequest};
use crate::event_bus::EventBus;
use crate::persistence::{PersistenceError, SqliteStore};

const ANALYSIS_TEMPERATURE: f64 = 0.3;
const ANALYSIS_MAX_TOKENS: u32 = 1500;
const STACK_PREVIEW_CHARS: usize = 500;
const TEMPLATE_FIX_CONTENT: &str = "// Manual fix required";

#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    #[error("at least one error id is required")]
    NoErrors,
    #[error("unknown error ids: {}", .ids.join(", "))]
    UnknownErrors { ids: Vec<String> },
    #[error("errors already attached to an open remediation request: {}", .ids.join(", "))]
    AlreadyAttached { ids: Vec<String> },
    #[error("cancelled clients are not defects and cannot be remediated: {}", .ids.join(", "))]
    IncompatibleErrors { ids: Vec<String> },
    #[error("remediation request not found: {request_id}")]
    NotFound { request_id: String },
    #[error("error not found: {error_id}")]
    ErrorNotFound { error_id: String },
    #[error("only failed requests can be reprocessed; {request_id} is {status}")]
    NotReprocessable {
        request_id: String,
        status: RemediationStatus,
    },
    #[error("'{status}' does not resolve a request; use fixed or wont_fix")]
    NotResolution { status: ErrorRemediationStatus },
    #[error("remediation request {request_id} still {status} after {waited_ms}ms")]
    WaitTimedOut {
        request_id: String,
        status: RemediationStatus,
        waited_ms: u64,
    },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("remediation write lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemediationSettings {
    pub model: String,
    pub max_fix_files: usize,
    /// Upper bound on one provider call.
    pub timeout: Duration,
}

impl RemediationSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            max_fix_files: config.remediation.max_fix_files,
            timeout: Duration::from_millis(config.llm.timeout_ms),
        }
    }
}

/// Input of [`RemediationEngine::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRemediation {
    pub error_ids: Vec<ErrorId>,
    pub options: RemediationOptions,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub additional_notes: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewRemediation {
    pub fn new(error_ids: Vec<ErrorId>, output: OutputTarget) -> Self {
        Self {
            error_ids,
            options: RemediationOptions::for_target(output),
            priority: Priority::default(),
            additional_notes: None,
            created_by: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationDetail {
    pub request: RemediationRequest,
    pub errors: Vec<ErrorContext>,
    /// Markdown task description once fixes have been generated.
    pub task_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkOutcome {
    /// Errors whose status actually changed.
    pub updated: usize,
    pub request: RemediationRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    Process,
    Reprocess,
    Cancel,
}

impl std::str::FromStr for RemediationAction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "process" => Ok(RemediationAction::Process),
            "reprocess" => Ok(RemediationAction::Reprocess),
            "cancel" => Ok(RemediationAction::Cancel),
            other => Err(format!("Unknown action: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Template analysis
// ---------------------------------------------------------------------------

/// Files of the application under test that usually own failures of a step kind.
pub fn likely_source_files(step_type: &str) -> &'static [&'static str] {
    match step_type {
        "chat" => &[
            "app/api/chat/route.ts",
            "lib/n8n.ts",
            "components/chat/Chat.tsx",
        ],
        "diagnostic" => &["app/api/chat/route.ts", "lib/diagnostic.ts", "lib/n8n.ts"],
        "checkout" => &[
            "app/api/checkout/route.ts",
            "lib/stripe.ts",
            "components/checkout/",
        ],
        "contact_form" => &["app/api/contact/route.ts", "components/Contact.tsx"],
        "navigate" | "browse" => &["app/", "components/Navigation.tsx"],
        "add_to_cart" => &["lib/cart.ts", "components/ShoppingCart.tsx"],
        "validate_database" | "wait_for_data" => &["lib/supabase.ts"],
        "wait_for_webhook" => &["lib/n8n.ts", "app/api/webhooks/"],
        "admin_action" => &["app/api/admin/outreach/route.ts"],
        _ => &[],
    }
}

fn root_cause(error: Option<&ErrorContext>) -> String {
    let Some(error) = error else {
        return "Unable to determine root cause - no error context available".to_string();
    };
    let step = &error.step_type;
    match error.error_type {
        ErrorType::NavigationError => format!(
            "Page navigation failed in {step} step. The page was unreachable or returned an error status."
        ),
        ErrorType::ChatTimeout => format!(
            "Chat response timed out in {step} step. The chat endpoint or its workflow took longer than expected."
        ),
        ErrorType::ChatInvalidResponse => format!(
            "Chat returned an unexpected reply in {step} step. The response was empty, malformed or missing expected content."
        ),
        ErrorType::AgentFailure => format!(
            "The simulated visitor could not produce a message in {step} step. The language model provider failed or timed out."
        ),
        ErrorType::FlowValidationError => format!(
            "Business flow assertion failed in {step} step. An expected intermediate state was never reached."
        ),
        ErrorType::Timeout => format!(
            "Operation timed out in {step} step. The target operation took longer than expected."
        ),
        ErrorType::ValidationError => format!(
            "Data validation failed in {step} step. Expected data did not match actual results."
        ),
        ErrorType::ApiError => format!(
            "API endpoint failure in {step} step. The server returned an unexpected response."
        ),
        ErrorType::Exception => format!(
            "Unhandled exception in {step} step. An unexpected error occurred during execution."
        ),
        other => format!("Unknown error type: {other}"),
    }
}

fn suggested_approach(error: Option<&ErrorContext>) -> &'static str {
    let Some(error) = error else {
        return "Review the test logs for more context.";
    };
    match error.error_type {
        ErrorType::NavigationError => {
            "Check route definitions, page-level data loading and middleware redirects for the failing path."
        }
        ErrorType::ChatTimeout => {
            "Profile the chat route and its workflow call, add timeouts upstream, or stream partial replies."
        }
        ErrorType::ChatInvalidResponse => {
            "Verify the chat response schema and the prompt that produces it, and handle empty replies."
        }
        ErrorType::AgentFailure => {
            "Check provider credentials, rate limits and model availability for the simulated visitor."
        }
        ErrorType::FlowValidationError => {
            "Trace the flow's intermediate writes and confirm each request persists the state the next step expects."
        }
        ErrorType::Timeout => {
            "Increase timeout values, optimize slow queries, or add caching for expensive operations."
        }
        ErrorType::ValidationError => {
            "Review database queries, check data transformations, and verify schema constraints."
        }
        ErrorType::ApiError => {
            "Check API route handlers, verify request/response formats, and review error handling."
        }
        ErrorType::Exception => {
            "Add error handling, validate inputs, and handle edge cases in the affected code."
        }
        _ => "Review the error details and stack trace for insights.",
    }
}

/// Most common `{error_type}:{step_type}` group's first error; ties go to the
/// group seen first.
fn primary_error(errors: &[ErrorContext]) -> Option<&ErrorContext> {
    let mut groups: Vec<(String, &ErrorContext, usize)> = Vec::new();
    for error in errors {
        let key = format!("{}:{}", error.error_type, error.step_type);
        match groups.iter_mut().find(|(existing, _, _)| *existing == key) {
            Some(group) => group.2 += 1,
            None => groups.push((key, error, 1)),
        }
    }
    let mut best: Option<(&ErrorContext, usize)> = None;
    for (_, first, count) in groups {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((first, count));
        }
    }
    best.map(|(error, _)| error)
}

pub fn confidence(errors: &[ErrorContext]) -> f64 {
    let mut score: f64 = 0.5;
    let types: HashSet<ErrorType> = errors.iter().map(|e| e.error_type).collect();
    if types.len() == 1 {
        score += 0.2;
    }
    if errors.iter().any(|e| e.stack_trace.is_some()) {
        score += 0.15;
    }
    if errors.iter().any(|e| !e.likely_source_files.is_empty()) {
        score += 0.15;
    }
    score.min(1.0)
}

pub fn estimate_complexity(errors: &[ErrorContext]) -> Complexity {
    let types: HashSet<ErrorType> = errors.iter().map(|e| e.error_type).collect();
    let files: HashSet<&str> = errors
        .iter()
        .flat_map(|e| e.likely_source_files.iter().map(String::as_str))
        .collect();
    if types.len() == 1 && files.len() <= 2 {
        Complexity::Simple
    } else if types.len() <= 2 && files.len() <= 5 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    }
}

/// Rule-based analysis; the starting point a provider may refine.
pub fn analyze_errors(errors: &[ErrorContext]) -> RemediationAnalysis {
    let primary = primary_error(errors);
    let mut affected_files: Vec<String> = Vec::new();
    let hinted = errors.iter().flat_map(|e| e.likely_source_files.iter().cloned());
    let inferred = primary
        .map(|e| likely_source_files(&e.step_type))
        .unwrap_or_default()
        .iter()
        .map(|file| file.to_string());
    for file in hinted.chain(inferred) {
        if !affected_files.contains(&file) {
            affected_files.push(file);
        }
    }

    RemediationAnalysis {
        root_cause: root_cause(primary),
        affected_files,
        suggested_approach: suggested_approach(primary).to_string(),
        confidence: confidence(errors),
        estimated_complexity: estimate_complexity(errors),
    }
}

/// Errors with the same type, step and step configuration, listed once.
fn consolidate(errors: &[ErrorContext]) -> Vec<(&ErrorContext, usize)> {
    let mut groups: Vec<(&ErrorContext, usize)> = Vec::new();
    for error in errors {
        let same_shape = |other: &&ErrorContext| {
            other.error_type == error.error_type
                && other.step_type == error.step_type
                && other.step_config == error.step_config
        };
        match groups.iter_mut().find(|(other, _)| same_shape(other)) {
            Some(group) => group.1 += 1,
            None => groups.push((error, 1)),
        }
    }
    groups
}

fn analysis_prompt(errors: &[ErrorContext], base: &RemediationAnalysis) -> String {
    let mut out = String::from("Analyze these test errors and provide insights.\n\n## Errors\n");
    for (error, count) in consolidate(errors) {
        out.push_str(&format!(
            "\n- Type: {}\n- Message: {}\n- Step: {}\n- Scenario: {}\n",
            error.error_type, error.message, error.step_type, error.scenario_id
        ));
        if count > 1 {
            out.push_str(&format!("- Occurrences: {count}\n"));
        }
        if let Some(config) = &error.step_config {
            out.push_str(&format!("- Step config: {config}\n"));
        }
        if let Some(stack) = &error.stack_trace {
            out.push_str(&format!(
                "- Stack: {}\n",
                truncate_chars(stack, STACK_PREVIEW_CHARS)
            ));
        }
    }
    out.push_str(&format!(
        "\n## Current Analysis\n- Root Cause: {}\n- Affected Files: {}\n\n",
        base.root_cause,
        base.affected_files.join(", ")
    ));
    out.push_str(
        "Provide a more detailed analysis in JSON format:\n\
{\n  \"rootCause\": \"detailed explanation of root cause\",\n  \
\"suggestedApproach\": \"step by step fix approach\",\n  \
\"additionalFiles\": [\"any additional files that might be involved\"]\n}",
    );
    out
}

fn fix_prompt(
    file: &str,
    errors: &[ErrorContext],
    analysis: &RemediationAnalysis,
    options: &RemediationOptions,
) -> String {
    let mut out = String::from(
        "You are a code fixer. Analyze this error and generate a fix.\n\n## Error Details\n",
    );
    for error in errors {
        out.push_str(&format!("- {}: {}\n", error.error_type, error.message));
    }
    out.push_str(&format!(
        "\n## Root Cause\n{}\n\n## File: {file}\n\n## Instructions\n\
1. Identify the bug in the code\n2. Generate a fixed version\n3. Explain what was changed and why\n",
        analysis.root_cause
    ));
    match options.fix_scope {
        FixScope::Minimal => out.push_str("4. Keep the change as small as possible\n"),
        FixScope::Comprehensive => {
            out.push_str("4. Also address closely related weaknesses in the same file\n")
        }
    }
    if options.include_tests {
        out.push_str("5. Include or update tests covering the fix\n");
    }
    out.push_str(
        "\nRespond with JSON in this format:\n\
{\n  \"fixedContent\": \"... the fixed code ...\",\n  \"explanation\": \"... what was changed and why ...\"\n}",
    );
    out
}

fn template_fix(file: &str, errors: &[ErrorContext]) -> CodeFix {
    let message = errors.first().map(|e| e.message.as_str()).unwrap_or_default();
    CodeFix {
        file: file.to_string(),
        original_content: String::new(),
        fixed_content: TEMPLATE_FIX_CONTENT.to_string(),
        explanation: format!("Review {file} for issues related to: {message}"),
        lines_added: 0,
        lines_removed: 0,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisEnhancement {
    #[serde(default)]
    root_cause: Option<String>,
    #[serde(default)]
    suggested_approach: Option<String>,
    #[serde(default)]
    additional_files: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixSuggestion {
    fixed_content: String,
    explanation: String,
}

/// Parses the outermost JSON object of a completion, tolerating code fences.
fn parse_json_object<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err("response contained no JSON object".to_string());
    };
    if end < start {
        return Err("response contained no JSON object".to_string());
    }
    serde_json::from_str(&text[start..=end]).map_err(|err| format!("malformed JSON: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Inner {
    store: Arc<SqliteStore>,
    llm: Arc<dyn LlmBackend>,
    deliverer: Arc<Deliverer>,
    events: EventBus,
    settings: RemediationSettings,
    /// Serializes read-check-write of request rows.
    writes: Mutex<()>,
}

impl Inner {
    fn writes(&self) -> Result<MutexGuard<'_, ()>, RemediationError> {
        self.writes.lock().map_err(|_| RemediationError::Poisoned)
    }
}

#[derive(Clone)]
pub struct RemediationEngine {
    inner: Arc<Inner>,
}

impl RemediationEngine {
    pub fn new(
        store: Arc<SqliteStore>,
        llm: Arc<dyn LlmBackend>,
        deliverer: Arc<Deliverer>,
        events: EventBus,
        settings: RemediationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                llm,
                deliverer,
                events,
                settings,
                writes: Mutex::new(()),
            }),
        }
    }

    fn load(&self, request_id: &RemediationRequestId) -> Result<RemediationRequest, RemediationError> {
        self.inner
            .store
            .load_remediation_request(request_id)?
            .ok_or_else(|| RemediationError::NotFound {
                request_id: request_id.0.clone(),
            })
    }

    fn announce(&self, request: &RemediationRequest) {
        self.inner.events.publish(EventKind::RemediationUpdated {
            request_id: request.id.clone(),
            status: request.status,
        });
    }

    /// Checks that `ids` name defects not owned by another open request.
    fn eligible_errors(&self, ids: &[ErrorId]) -> Result<Vec<ErrorContext>, RemediationError> {
        if ids.is_empty() {
            return Err(RemediationError::NoErrors);
        }
        let errors = self.inner.store.load_errors(ids)?;
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| !errors.iter().any(|error| &error.error_id == *id))
            .map(|id| id.0.clone())
            .collect();
        if !unknown.is_empty() {
            return Err(RemediationError::UnknownErrors { ids: unknown });
        }

        let cancelled: Vec<String> = errors
            .iter()
            .filter(|error| !error.error_type.is_defect())
            .map(|error| error.error_id.0.clone())
            .collect();
        if !cancelled.is_empty() {
            return Err(RemediationError::IncompatibleErrors { ids: cancelled });
        }

        let mut attached = Vec::new();
        for error in &errors {
            let Some(owner) = &error.remediation_request_id else {
                continue;
            };
            let open = self
                .inner
                .store
                .load_remediation_request(owner)?
                .is_some_and(|request| {
                    !matches!(
                        request.status,
                        RemediationStatus::Rejected | RemediationStatus::Failed
                    )
                });
            if open {
                attached.push(error.error_id.0.clone());
            }
        }
        if !attached.is_empty() {
            return Err(RemediationError::AlreadyAttached { ids: attached });
        }
        Ok(errors)
    }

    /// Records a `pending` request for the given errors and starts its pipeline.
    pub fn create(&self, input: NewRemediation) -> Result<RemediationRequest, RemediationError> {
        let mut error_ids: Vec<ErrorId> = Vec::with_capacity(input.error_ids.len());
        for id in input.error_ids {
            if !error_ids.contains(&id) {
                error_ids.push(id);
            }
        }

        let request = {
            let _writes = self.inner.writes()?;
            let errors = self.eligible_errors(&error_ids)?;
            let run_id = errors
                .first()
                .map(|first| first.run_id.clone())
                .filter(|run| errors.iter().all(|error| &error.run_id == run));

            let request = RemediationRequest {
                id: RemediationRequestId::new(uuid::Uuid::new_v4().to_string()),
                run_id,
                error_ids,
                options: input.options,
                priority: input.priority,
                additional_notes: non_blank(input.additional_notes),
                created_by: input.created_by,
                status: RemediationStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                analysis: None,
                fixes: Vec::new(),
                task_prompt: None,
                github_pr_url: None,
                cursor_task_id: None,
                n8n_execution_id: None,
                failure_reason: None,
                outcome_notes: None,
            };
            self.inner.store.upsert_remediation_request(&request)?;
            self.inner.store.attach_errors(&request.error_ids, &request.id)?;
            request
        };

        info!(
            request_id = %request.id,
            errors = request.error_ids.len(),
            output = %request.options.output,
            priority = %request.priority,
            "remediation request created"
        );
        self.announce(&request);
        self.spawn_process(request.id.clone());
        Ok(request)
    }

    fn spawn_process(&self, request_id: RemediationRequestId) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.process(&request_id).await {
                warn!(request_id = %request_id, error = %err, "remediation pipeline stopped");
            }
        });
    }

    /// Persists `request`, optionally moved to `next`, unless the stored row
    /// moved on without us: settled elsewhere, or advanced by another
    /// pipeline. Returns whether it was written.
    fn commit(
        &self,
        request: &mut RemediationRequest,
        next: Option<RemediationStatus>,
    ) -> Result<bool, RemediationError> {
        {
            let _writes = self.inner.writes()?;
            let stored = self.load(&request.id)?;
            if stored.status.is_terminal() || stored.status != request.status {
                debug!(request_id = %request.id, status = %stored.status, "request moved on elsewhere");
                *request = stored;
                return Ok(false);
            }
            if let Some(next) = next {
                request.status = request.status.transition(next)?;
                if next.is_terminal() {
                    request.completed_at = Some(Utc::now());
                }
            }
            self.inner.store.upsert_remediation_request(request)?;
        }
        if next.is_some() {
            self.announce(request);
        }
        Ok(true)
    }

    fn fail(
        &self,
        request: &mut RemediationRequest,
        error_type: ErrorType,
        message: String,
    ) -> Result<(), RemediationError> {
        warn!(request_id = %request.id, error_type = %error_type, "{message}");
        request.failure_reason = Some(format!("{error_type}: {message}"));
        self.commit(request, Some(RemediationStatus::Failed))
            .map(|_| ())
    }

    /// Runs the pipeline for a `pending` request. Any other status returns the
    /// stored request untouched; of two concurrent calls only the first to
    /// reach `analyzing` continues.
    pub async fn process(
        &self,
        request_id: &RemediationRequestId,
    ) -> Result<RemediationRequest, RemediationError> {
        let mut request = self.load(request_id)?;
        if request.status != RemediationStatus::Pending {
            return Ok(request);
        }

        request.started_at = Some(Utc::now());
        if !self.commit(&mut request, Some(RemediationStatus::Analyzing))? {
            return Ok(request);
        }
        let errors = self.inner.store.load_errors(&request.error_ids)?;
        let analysis = match self.analyze(&errors).await {
            Ok(analysis) => analysis,
            Err(message) => {
                self.fail(&mut request, ErrorType::RemediationAnalysisError, message)?;
                return Ok(request);
            }
        };
        debug!(
            request_id = %request.id,
            confidence = analysis.confidence,
            complexity = analysis.estimated_complexity.as_str(),
            "analysis ready"
        );
        request.analysis = Some(analysis.clone());
        if !self.commit(&mut request, Some(RemediationStatus::GeneratingFix))? {
            return Ok(request);
        }

        let fixes = self.generate_fixes(&errors, &analysis, &request.options).await;
        let digests: Vec<ErrorDigest> = errors.iter().map(ErrorDigest::from).collect();
        let mut prompt = render_task_prompt(&digests, &analysis, &fixes);
        if let Some(notes) = &request.additional_notes {
            prompt.push_str(&format!("\n### Notes\n{notes}\n"));
        }
        request.fixes = fixes;
        request.task_prompt = Some(prompt);
        if !self.commit(&mut request, None)? {
            return Ok(request);
        }

        self.deliver(&mut request, digests, analysis).await?;
        info!(request_id = %request.id, status = %request.status, "remediation settled");
        Ok(request)
    }

    async fn complete(&self, prompt: String) -> Result<String, String> {
        let request = LlmRequest {
            model: self.inner.settings.model.clone(),
            system: "You analyze failing end-to-end tests of a web application and reply with a single JSON object."
                .to_string(),
            messages: vec![ChatTurn::user(prompt)],
            temperature: ANALYSIS_TEMPERATURE,
            max_tokens: ANALYSIS_MAX_TOKENS,
            style: None,
        };
        let timeout = self.inner.settings.timeout;
        match tokio::time::timeout(timeout, self.inner.llm.complete(&request)).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(_) => Err(format!(
                "{} timed out after {}ms",
                self.inner.llm.name(),
                timeout.as_millis()
            )),
        }
    }

    async fn analyze(&self, errors: &[ErrorContext]) -> Result<RemediationAnalysis, String> {
        let mut analysis = analyze_errors(errors);
        if self.inner.llm.is_mock() {
            return Ok(analysis);
        }
        let text = self.complete(analysis_prompt(errors, &analysis)).await?;
        let enhancement: AnalysisEnhancement = parse_json_object(&text)?;
        if let Some(root_cause) = non_blank(enhancement.root_cause) {
            analysis.root_cause = root_cause;
        }
        if let Some(approach) = non_blank(enhancement.suggested_approach) {
            analysis.suggested_approach = approach;
        }
        for file in enhancement.additional_files {
            if !file.trim().is_empty() && !analysis.affected_files.contains(&file) {
                analysis.affected_files.push(file);
            }
        }
        Ok(analysis)
    }

    /// One fix per affected file, at most `max_fix_files`. Files the provider
    /// cannot produce a fix for are skipped.
    async fn generate_fixes(
        &self,
        errors: &[ErrorContext],
        analysis: &RemediationAnalysis,
        options: &RemediationOptions,
    ) -> Vec<CodeFix> {
        let files = analysis
            .affected_files
            .iter()
            .take(self.inner.settings.max_fix_files);
        if self.inner.llm.is_mock() {
            return files.map(|file| template_fix(file, errors)).collect();
        }

        let mut fixes = Vec::new();
        for file in files {
            let suggestion = self
                .complete(fix_prompt(file, errors, analysis, options))
                .await
                .and_then(|text| parse_json_object::<FixSuggestion>(&text));
            match suggestion {
                Ok(suggestion) => fixes.push(CodeFix {
                    file: file.clone(),
                    original_content: String::new(),
                    lines_added: suggestion.fixed_content.matches('\n').count(),
                    lines_removed: 0,
                    fixed_content: suggestion.fixed_content,
                    explanation: suggestion.explanation,
                }),
                Err(message) => warn!(file = %file, "fix generation failed: {message}"),
            }
        }
        fixes
    }

    async fn deliver(
        &self,
        request: &mut RemediationRequest,
        errors: Vec<ErrorDigest>,
        analysis: RemediationAnalysis,
    ) -> Result<(), RemediationError> {
        let target = request.options.output;
        let automatic = target != OutputTarget::GithubPr || request.options.auto_create_pr;
        if !automatic {
            request.outcome_notes =
                Some("Automatic PR creation disabled; task prompt is ready for review".to_string());
            self.commit(request, Some(RemediationStatus::ReviewRequired))?;
            return Ok(());
        }
        if !self.inner.deliverer.is_configured(target) {
            request.outcome_notes = Some(format!(
                "{target} delivery is not configured; task prompt is ready for review"
            ));
            self.commit(request, Some(RemediationStatus::ReviewRequired))?;
            return Ok(());
        }

        let package = DeliveryPackage {
            request_id: request.id.clone(),
            priority: request.priority,
            options: request.options.clone(),
            errors,
            analysis,
            fixes: request.fixes.clone(),
            task_prompt: request.task_prompt.clone().unwrap_or_default(),
        };
        match self.inner.deliverer.deliver(&package).await {
            Ok(receipt) => {
                let next = match target {
                    OutputTarget::GithubPr => {
                        request.github_pr_url = Some(receipt.reference);
                        RemediationStatus::Applied
                    }
                    OutputTarget::CursorTask => {
                        request.cursor_task_id = Some(receipt.reference);
                        RemediationStatus::ReviewRequired
                    }
                    OutputTarget::N8nWorkflow => {
                        request.n8n_execution_id = Some(receipt.reference);
                        RemediationStatus::ReviewRequired
                    }
                };
                if let Some(location) = receipt.location {
                    request.outcome_notes = Some(format!("Delivered to {location}"));
                }
                self.commit(request, Some(next))?;
            }
            Err(err) => {
                self.fail(request, ErrorType::RemediationDeliveryError, err.to_string())?;
            }
        }
        Ok(())
    }

    pub fn get(&self, request_id: &RemediationRequestId) -> Result<RemediationDetail, RemediationError> {
        let request = self.load(request_id)?;
        let errors = self.inner.store.load_errors(&request.error_ids)?;
        Ok(RemediationDetail {
            task_prompt: request.task_prompt.clone(),
            request,
            errors,
        })
    }

    pub fn list(
        &self,
        limit: usize,
        status: Option<RemediationStatus>,
    ) -> Result<Vec<RemediationRequest>, RemediationError> {
        Ok(self.inner.store.list_remediation_requests(limit, status)?)
    }

    /// Polls until the pipeline leaves its in-flight stages.
    pub async fn wait_until_settled(
        &self,
        request_id: &RemediationRequestId,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<RemediationRequest, RemediationError> {
        let started = tokio::time::Instant::now();
        loop {
            let request = self.load(request_id)?;
            if !request.status.is_in_flight() {
                return Ok(request);
            }
            if started.elapsed() >= timeout {
                return Err(RemediationError::WaitTimedOut {
                    request_id: request_id.0.clone(),
                    status: request.status,
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn act(
        &self,
        request_id: &RemediationRequestId,
        action: RemediationAction,
    ) -> Result<RemediationRequest, RemediationError> {
        match action {
            RemediationAction::Process => {
                let request = self.load(request_id)?;
                if request.status == RemediationStatus::Pending {
                    self.spawn_process(request.id.clone());
                }
                Ok(request)
            }
            RemediationAction::Reprocess => self.reprocess(request_id),
            RemediationAction::Cancel => self.cancel(request_id),
        }
    }

    /// Retries a `failed` request as a fresh request over the same errors.
    /// The failed request stays terminal.
    pub fn reprocess(
        &self,
        request_id: &RemediationRequestId,
    ) -> Result<RemediationRequest, RemediationError> {
        let failed = self.load(request_id)?;
        if failed.status != RemediationStatus::Failed {
            return Err(RemediationError::NotReprocessable {
                request_id: request_id.0.clone(),
                status: failed.status,
            });
        }
        let retry = self.create(NewRemediation {
            error_ids: failed.error_ids,
            options: failed.options,
            priority: failed.priority,
            additional_notes: failed.additional_notes,
            created_by: failed.created_by,
        })?;
        info!(request_id = %retry.id, retry_of = %failed.id, "remediation request reprocessing");
        Ok(retry)
    }

    /// Rejects a request that has not settled yet.
    pub fn cancel(
        &self,
        request_id: &RemediationRequestId,
    ) -> Result<RemediationRequest, RemediationError> {
        let request = {
            let _writes = self.inner.writes()?;
            let mut request = self.load(request_id)?;
            request.status = request.status.transition(RemediationStatus::Rejected)?;
            request.completed_at = Some(Utc::now());
            request.outcome_notes = Some("Cancelled by user".to_string());
            self.inner.store.upsert_remediation_request(&request)?;
            request
        };
        info!(request_id = %request.id, "remediation request cancelled");
        self.announce(&request);
        Ok(request)
    }

    /// Removes a request and unlinks its errors. Returns how many were unlinked.
    pub fn delete(&self, request_id: &RemediationRequestId) -> Result<usize, RemediationError> {
        let _writes = self.inner.writes()?;
        self.load(request_id)?;
        let detached = self.inner.store.detach_errors(request_id)?;
        self.inner.store.delete_remediation_request(request_id)?;
        info!(request_id = %request_id, detached, "remediation request deleted");
        Ok(detached)
    }

    pub fn set_error_status(
        &self,
        error_id: &ErrorId,
        status: ErrorRemediationStatus,
    ) -> Result<ErrorContext, RemediationError> {
        self.inner
            .store
            .set_error_status(error_id, status)?
            .ok_or_else(|| RemediationError::ErrorNotFound {
                error_id: error_id.0.clone(),
            })
    }

    /// Resolves every error of a request and settles the request to match:
    /// `fixed` applies it, `wont_fix` rejects it. A request that already
    /// settled keeps its status, so repeating the call changes nothing.
    pub fn mark_errors(
        &self,
        request_id: &RemediationRequestId,
        status: ErrorRemediationStatus,
    ) -> Result<MarkOutcome, RemediationError> {
        let resolved = match status {
            ErrorRemediationStatus::Fixed => RemediationStatus::Applied,
            ErrorRemediationStatus::WontFix => RemediationStatus::Rejected,
            other => return Err(RemediationError::NotResolution { status: other }),
        };

        let (outcome, settled) = {
            let _writes = self.inner.writes()?;
            let mut request = self.load(request_id)?;
            let updated = self.inner.store.set_request_errors_status(request_id, status)?;
            let settled = !request.status.is_terminal();
            if settled {
                request.status = resolved;
                request.completed_at = Some(Utc::now());
                request.outcome_notes = Some(format!("Errors marked {status}"));
                self.inner.store.upsert_remediation_request(&request)?;
            }
            (MarkOutcome { updated, request }, settled)
        };
        if settled {
            self.announce(&outcome.request);
        }
        info!(
            request_id = %request_id,
            status = %status,
            updated = outcome.updated,
            "remediation errors marked"
        );
        Ok(outcome)
    }
}
