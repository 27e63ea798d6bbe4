//! One simulated visitor walking one scenario against the target.
//!
//! A [`SimulatedClient`] runs its scenario's steps strictly in order. The
//! first failing step (other than a screenshot) ends the client, records one
//! [`ErrorContext`] and leaves the step cursor on that step. Cancellation is
//! cooperative: it is observed between steps and inside every pause or poll,
//! never in the middle of a request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use harness_core::config::HarnessConfig;
use harness_core::persona::{DiagnosticCategory, PersonaInstance, PersonaRole};
use harness_core::scenario::{
    values_equal, AddToCartStep, AdminAction, AdminActionStep, ApiCallStep, BrowseStep,
    ChatStep, CheckoutStep, ContactFormStep, DelayStep, DiagnosticStep, HttpMethod, NavigateStep,
    RuleCondition, Scenario, ScreenshotStep, Step, StepKind, ValidateDatabaseStep,
    WaitForDataStep, WaitForWebhookStep, WebhookType,
};
use harness_core::state::{ActivityStatus, ClientStatus, ErrorRemediationStatus};
use harness_core::types::{
    random_suffix, ClientId, ClientSession, CreatedResources, ErrorContext, ErrorId, ErrorType,
    LiveActivity, RequestSnapshot, ResponseSnapshot, RunId, StepOutcome, StepResult,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat_agent::{AgentFailure, AgentFailureKind, ChatAgent, ChatTurn, ScenarioContext};
use crate::cleanup::{cleanup_resources, CleanupReport};
use crate::target::{TargetApp, TargetError, TargetRequest, TargetResponse};
use crate::target_data::{filters_from_conditions, Filter, Row, TargetDataStore};

const DIAGNOSTIC_TRIGGER: &str = "I'd like to perform an AI audit of my business";

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    /// Prefix of the chat session key, marking rows as synthetic.
    pub session_prefix: String,
    pub admin_token: Option<String>,
    /// Environment variable the admin token is read from.
    pub admin_token_env: String,
    /// Poll cadence for webhook waits without their own interval.
    pub poll_interval: Duration,
    pub inter_step_delay: bool,
    pub diagnostic_pause: Duration,
    pub cleanup_attempts: u32,
    pub cleanup_retry_delay: Duration,
}

impl ClientSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        let admin_token = std::env::var(&config.target.admin_token_env)
            .ok()
            .filter(|token| !token.trim().is_empty());
        Self {
            session_prefix: config.orchestrator.test_data_prefix.clone(),
            admin_token,
            admin_token_env: config.target.admin_token_env.clone(),
            poll_interval: Duration::from_millis(config.polling.default_interval_ms),
            inter_step_delay: config.orchestrator.inter_step_delay,
            diagnostic_pause: Duration::from_secs(1),
            cleanup_attempts: 3,
            cleanup_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Collaborators shared by every client of a run.
pub struct ClientEnv {
    pub target: Arc<dyn TargetApp>,
    pub data: Arc<dyn TargetDataStore>,
    pub agent: ChatAgent,
    pub settings: ClientSettings,
}

/// Receives a live-activity snapshot at every step boundary.
///
/// Implementations must return promptly; the client does not wait on them.
pub trait ProgressSink: Send + Sync {
    fn report(&self, activity: LiveActivity);

    /// Called whenever the client records a new synthetic row on the target.
    fn resources(&self, _client_id: &ClientId, _resources: &CreatedResources) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOutcome {
    pub session: ClientSession,
    pub errors: Vec<ErrorContext>,
    pub screenshots: Vec<String>,
    pub cleanup: Option<CleanupReport>,
}

// ---------------------------------------------------------------------------
// Step failures
// ---------------------------------------------------------------------------

/// Classified failure of one step, before it becomes an [`ErrorContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub error_type: ErrorType,
    pub message: String,
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl StepFailure {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            request: None,
            response: None,
            expected: None,
            actual: None,
        }
    }

    fn with_request(mut self, request: RequestSnapshot) -> Self {
        self.request = Some(request);
        self
    }

    fn with_response(mut self, response: &TargetResponse) -> Self {
        self.response = Some(response.snapshot());
        self
    }

    fn with_expectation(mut self, expected: Value, actual: Value) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual);
        self
    }
}

#[derive(Debug)]
enum StepError {
    Failed(StepFailure),
    Cancelled,
}

impl From<StepFailure> for StepError {
    fn from(failure: StepFailure) -> Self {
        StepError::Failed(failure)
    }
}

type StepOutput = Result<Value, StepError>;

fn agent_failure(failure: AgentFailure) -> StepFailure {
    let error_type = match failure.kind {
        AgentFailureKind::Timeout => ErrorType::ChatTimeout,
        AgentFailureKind::Provider => ErrorType::AgentFailure,
    };
    StepFailure::new(error_type, format!("Chat agent failed: {}", failure.message))
}

/// Renders a JSON value the way it reads in a message: strings unquoted.
fn plain(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Identifier carried as a JSON string or number.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn jittered(duration_ms: u64) -> u64 {
    let factor: f64 = rand::thread_rng().gen_range(0.8..=1.2);
    (duration_ms as f64 * factor).round() as u64
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SimulatedClient {
    env: Arc<ClientEnv>,
    persona: PersonaInstance,
    scenario: Scenario,
    cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressSink>>,
    cleanup_after: bool,
    session: ClientSession,
    history: Vec<ChatTurn>,
    cart: Vec<CartItem>,
    current_path: String,
    errors: Vec<ErrorContext>,
    screenshots: Vec<String>,
    phase: String,
    phase_description: String,
    step_started_at: DateTime<Utc>,
    last_action: Option<String>,
}

impl SimulatedClient {
    pub fn new(
        env: Arc<ClientEnv>,
        run_id: RunId,
        ordinal: u32,
        persona: PersonaInstance,
        scenario: Scenario,
        cancel: CancellationToken,
    ) -> Self {
        let now = Utc::now();
        let session_key = format!(
            "{}{}_{ordinal}_{}",
            env.settings.session_prefix,
            run_id,
            random_suffix(6)
        );
        let session = ClientSession {
            client_id: ClientId::for_run(&run_id, ordinal),
            run_id,
            persona_id: persona.persona.id.clone(),
            persona_name: persona.persona.name.clone(),
            contact_email: persona.email.clone(),
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            session_key,
            status: ClientStatus::Created,
            started_at: now,
            completed_at: None,
            current_step_index: 0,
            total_steps: scenario.steps.len(),
            step_results: Vec::new(),
            created_resources: CreatedResources::default(),
        };
        Self {
            env,
            persona,
            scenario,
            cancel,
            progress: None,
            cleanup_after: false,
            session,
            history: Vec::new(),
            cart: Vec::new(),
            current_path: "/".to_string(),
            errors: Vec::new(),
            screenshots: Vec::new(),
            phase: "initializing".to_string(),
            phase_description: "Starting scenario...".to_string(),
            step_started_at: now,
            last_action: None,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Deletes the client's synthetic rows once it reaches a terminal status.
    pub fn with_cleanup(mut self, cleanup_after: bool) -> Self {
        self.cleanup_after = cleanup_after;
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.session.client_id
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    pub fn live_activity(&self) -> LiveActivity {
        let now = Utc::now();
        LiveActivity {
            client_id: self.session.client_id.clone(),
            persona_id: self.session.persona_id.clone(),
            persona_name: self.session.persona_name.clone(),
            scenario_id: self.session.scenario_id.clone(),
            scenario_name: self.session.scenario_name.clone(),
            current_step_index: self.session.current_step_index,
            total_steps: self.session.total_steps,
            current_step_type: self.phase.clone(),
            current_step_description: self.phase_description.clone(),
            started_at: self.session.started_at,
            step_started_at: self.step_started_at,
            elapsed_ms: (now - self.session.started_at).num_milliseconds().max(0),
            status: match self.session.status {
                ClientStatus::Created | ClientStatus::Running => ActivityStatus::Running,
                ClientStatus::Failed => ActivityStatus::Error,
                ClientStatus::Completed | ClientStatus::Cancelled => ActivityStatus::Completing,
            },
            last_action: self.last_action.clone(),
        }
    }

    fn set_phase(&mut self, phase: &str, description: impl Into<String>) {
        self.phase = phase.to_string();
        self.phase_description = description.into();
        self.step_started_at = Utc::now();
        if let Some(sink) = &self.progress {
            sink.report(self.live_activity());
        }
    }

    fn track_resources(&self) {
        if let Some(sink) = &self.progress {
            sink.resources(&self.session.client_id, &self.session.created_resources);
        }
    }

    fn advance_to(&mut self, index: usize) {
        self.session.current_step_index = self.session.current_step_index.max(index);
    }

    /// Executes the scenario to a terminal status.
    pub async fn run(mut self) -> ClientOutcome {
        self.session.status = ClientStatus::Running;
        self.set_phase("initializing", "Starting scenario...");
        info!(
            client_id = %self.session.client_id,
            scenario = %self.scenario.id,
            persona = %self.session.persona_id,
            "client started"
        );

        let steps = self.scenario.steps.clone();
        let total = steps.len();
        for (index, step) in steps.iter().enumerate() {
            self.advance_to(index);
            if self.cancel.is_cancelled() {
                let now = Utc::now();
                self.push_result(index, step.kind(), StepOutcome::Failed, now, Some("cancelled".to_string()), None);
                self.mark_cancelled(index, step.kind().as_str());
                break;
            }
            if self.should_skip(step) {
                debug!(client_id = %self.session.client_id, step = index, "step skipped");
                let now = Utc::now();
                self.push_result(index, step.kind(), StepOutcome::Skipped, now, None, None);
                continue;
            }

            self.set_phase(step.kind().as_str(), step.describe());
            let started_at = Utc::now();
            debug!(
                client_id = %self.session.client_id,
                step = index + 1,
                total,
                kind = step.kind().as_str(),
                "executing step"
            );
            match self.execute_step(step).await {
                Ok(data) => {
                    self.push_result(index, step.kind(), StepOutcome::Success, started_at, None, Some(data));
                }
                Err(StepError::Failed(failure)) if step.kind() == StepKind::Screenshot => {
                    warn!(
                        client_id = %self.session.client_id,
                        step = index,
                        error = %failure.message,
                        "screenshot failed; continuing"
                    );
                    self.push_result(
                        index,
                        step.kind(),
                        StepOutcome::Failed,
                        started_at,
                        Some(failure.message),
                        None,
                    );
                }
                Err(StepError::Failed(failure)) => {
                    self.push_result(
                        index,
                        step.kind(),
                        StepOutcome::Failed,
                        started_at,
                        Some(failure.message.clone()),
                        None,
                    );
                    self.record_error(index, step.kind().as_str(), Some(step.config_snapshot()), failure);
                    self.session.status = ClientStatus::Failed;
                    break;
                }
                Err(StepError::Cancelled) => {
                    self.push_result(
                        index,
                        step.kind(),
                        StepOutcome::Failed,
                        started_at,
                        Some("cancelled".to_string()),
                        None,
                    );
                    self.mark_cancelled(index, step.kind().as_str());
                    break;
                }
            }

            if index + 1 < total && self.env.settings.inter_step_delay {
                let pause = self.inter_step_delay();
                if self.pause(pause).await.is_err() {
                    self.mark_cancelled(index, step.kind().as_str());
                    break;
                }
            }
        }

        if self.session.status == ClientStatus::Running {
            self.set_phase("validating", "Running validation...");
            match self.run_validation().await {
                Ok(()) => {
                    self.session.current_step_index = total;
                    self.session.status = ClientStatus::Completed;
                }
                Err(failure) => {
                    self.record_error(total, "validation", None, failure);
                    self.session.status = ClientStatus::Failed;
                }
            }
        }

        self.session.completed_at = Some(Utc::now());
        self.set_phase("complete", "Scenario complete");
        info!(
            client_id = %self.session.client_id,
            status = %self.session.status,
            steps = self.session.step_results.len(),
            "client finished"
        );

        let cleanup = if self.cleanup_after && !self.session.created_resources.is_empty() {
            let settings = &self.env.settings;
            let report = cleanup_resources(
                self.env.data.as_ref(),
                &self.session.created_resources,
                settings.cleanup_attempts,
                settings.cleanup_retry_delay,
            )
            .await;
            if !report.is_complete() {
                warn!(
                    client_id = %self.session.client_id,
                    failures = ?report.failures,
                    "client cleanup incomplete"
                );
            }
            Some(report)
        } else {
            None
        };

        ClientOutcome {
            session: self.session,
            errors: self.errors,
            screenshots: self.screenshots,
            cleanup,
        }
    }

    fn should_skip(&self, step: &Step) -> bool {
        let probability = self.scenario.variability.skip_probability_for(step);
        probability > 0.0 && rand::thread_rng().gen::<f64>() < probability
    }

    fn inter_step_delay(&self) -> Duration {
        let (min, max) = self.scenario.variability.delay_range_ms;
        let ms = if max > min {
            rand::thread_rng().gen_range(min..max)
        } else {
            min
        };
        Duration::from_millis(ms)
    }

    fn push_result(
        &mut self,
        index: usize,
        kind: StepKind,
        outcome: StepOutcome,
        started_at: DateTime<Utc>,
        error: Option<String>,
        data: Option<Value>,
    ) {
        let completed_at = Utc::now();
        self.session.step_results.push(StepResult {
            step_index: index,
            step_type: kind,
            outcome,
            started_at,
            completed_at: Some(completed_at),
            duration_ms: Some((completed_at - started_at).num_milliseconds().max(0) as u64),
            error,
            data,
        });
    }

    fn record_error(
        &mut self,
        index: usize,
        step_type: &str,
        step_config: Option<Value>,
        failure: StepFailure,
    ) {
        let now = Utc::now();
        warn!(
            client_id = %self.session.client_id,
            step = index,
            step_type,
            error_type = %failure.error_type,
            message = %failure.message,
            "step failed"
        );
        self.errors.push(ErrorContext {
            error_id: ErrorId::generate(now),
            run_id: self.session.run_id.clone(),
            client_id: self.session.client_id.clone(),
            occurred_at: now,
            error_type: failure.error_type,
            message: failure.message,
            stack_trace: None,
            scenario_id: self.scenario.id.clone(),
            persona_id: self.session.persona_id.clone(),
            step_index: index,
            step_type: step_type.to_string(),
            step_config,
            request: failure.request,
            response: failure.response,
            expected: failure.expected,
            actual: failure.actual,
            likely_source_files: Vec::new(),
            remediation_status: ErrorRemediationStatus::Pending,
            remediation_request_id: None,
        });
    }

    fn mark_cancelled(&mut self, index: usize, step_type: &str) {
        if self.session.status != ClientStatus::Running {
            return;
        }
        // Not a product defect: kept on the session, never as an error row.
        debug!(
            client_id = %self.session.client_id,
            step = index,
            step_type,
            "client cancelled"
        );
        self.last_action = Some("Cancelled by stop request".to_string());
        self.session.status = ClientStatus::Cancelled;
    }

    // -----------------------------------------------------------------------
    // Suspension points
    // -----------------------------------------------------------------------

    fn checkpoint(&self) -> Result<(), StepError> {
        if self.cancel.is_cancelled() {
            Err(StepError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), StepError> {
        if duration.is_zero() {
            return self.checkpoint();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StepError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn snapshot(&self, request: &TargetRequest) -> RequestSnapshot {
        request.snapshot(self.env.target.base_url())
    }

    /// Sends a request, classifying transport failures as `error_type`.
    async fn send(
        &mut self,
        request: &TargetRequest,
        error_type: ErrorType,
    ) -> Result<TargetResponse, StepError> {
        self.last_action = Some(format!("{} {}", request.method.as_str(), request.path));
        let result = self.env.target.send(request).await;
        self.checkpoint()?;
        result.map_err(|err: TargetError| {
            StepFailure::new(error_type, err.to_string())
                .with_request(self.snapshot(request))
                .into()
        })
    }

    // -----------------------------------------------------------------------
    // Step executors
    // -----------------------------------------------------------------------

    async fn execute_step(&mut self, step: &Step) -> StepOutput {
        match step {
            Step::Navigate(step) => self.navigate(step).await,
            Step::Browse(step) => self.browse(step).await,
            Step::Chat(step) => self.chat(step).await,
            Step::Diagnostic(step) => self.diagnostic(step).await,
            Step::AddToCart(step) => self.add_to_cart(step).await,
            Step::Checkout(step) => self.checkout(step).await,
            Step::ContactForm(step) => self.contact_form(step).await,
            Step::WaitForWebhook(step) => self.wait_for_webhook(step).await,
            Step::ValidateDatabase(step) => self.validate_database(step).await,
            Step::Screenshot(step) => self.screenshot(step).await,
            Step::Delay(step) => self.delay(step).await,
            Step::ApiCall(step) => self.api_call(step).await,
            Step::AdminAction(step) => self.admin_action(step).await,
            Step::WaitForData(step) => self.wait_for_data(step).await,
        }
    }

    async fn navigate(&mut self, step: &NavigateStep) -> StepOutput {
        let request = TargetRequest::get(step.path.clone());
        let response = self.send(&request, ErrorType::NavigationError).await?;
        if !response.is_success() && response.status != 304 {
            return Err(StepFailure::new(
                ErrorType::NavigationError,
                format!("Navigation to {} failed: {}", step.path, response.status),
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        }
        self.current_path = step.path.clone();
        Ok(json!({ "path": step.path, "status": response.status }))
    }

    async fn browse(&mut self, step: &BrowseStep) -> StepOutput {
        let request = TargetRequest::get(self.current_path.clone());
        let response = self.send(&request, ErrorType::NavigationError).await?;
        if !response.is_success() && response.status != 304 {
            return Err(StepFailure::new(
                ErrorType::NavigationError,
                format!(
                    "Section {} unreachable on {}: {}",
                    step.section, self.current_path, response.status
                ),
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        }
        self.last_action = Some(format!("Browsing {}", step.section));
        self.pause(Duration::from_millis(step.duration_ms)).await?;
        Ok(json!({
            "section": step.section,
            "durationMs": step.duration_ms,
            "interactions": step.interactions,
        }))
    }

    /// Posts one visitor message and returns the assistant's reply text.
    async fn send_chat(&mut self, message: &str, timeout_ms: Option<u64>) -> Result<String, StepError> {
        let mut request = TargetRequest::post(
            "/api/chat",
            json!({
                "message": message,
                "sessionId": self.session.session_key,
                "visitorEmail": self.persona.email,
                "visitorName": self.persona.persona.name,
            }),
        );
        if let Some(ms) = timeout_ms {
            request = request.with_timeout(Duration::from_millis(ms));
        }

        self.last_action = Some("Sending chat message".to_string());
        let result = self.env.target.send(&request).await;
        self.checkpoint()?;
        let response = match result {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Err(StepFailure::new(
                    ErrorType::ChatTimeout,
                    format!("Chat response not received: {err}"),
                )
                .with_request(self.snapshot(&request))
                .into())
            }
            Err(err) => {
                return Err(StepFailure::new(
                    ErrorType::ChatInvalidResponse,
                    format!("Chat API request failed: {err}"),
                )
                .with_request(self.snapshot(&request))
                .into())
            }
        };
        if !response.is_success() {
            return Err(StepFailure::new(
                ErrorType::ChatInvalidResponse,
                format!("Chat API error: {} - {}", response.status, response.text),
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        }
        let reply = response
            .json()
            .and_then(|body| body.get("response").and_then(Value::as_str).map(str::to_string));
        let Some(reply) = reply else {
            return Err(StepFailure::new(
                ErrorType::ChatInvalidResponse,
                "Chat API returned no response text",
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        };

        self.session.created_resources.chat_session_id = Some(self.session.session_key.clone());
        self.track_resources();
        self.history.push(ChatTurn::user(message));
        self.history.push(ChatTurn::assistant(reply.clone()));
        Ok(reply)
    }

    async fn chat(&mut self, step: &ChatStep) -> StepOutput {
        let turns = step.max_turns.unwrap_or(1).max(1);
        let mut exchanges = Vec::new();
        let mut escalate = false;

        for turn in 0..turns {
            self.checkpoint()?;
            let fixed = if turn == 0 { step.message.clone() } else { None };
            let (message, keep_going) = match fixed {
                Some(message) => (message, true),
                None => {
                    let context = ScenarioContext::chat(&self.scenario, &step.intent);
                    let reply = self
                        .env
                        .agent
                        .next_message(&self.persona.persona, &context, &self.history)
                        .await;
                    if let Some(failure) = reply.failure {
                        return Err(agent_failure(failure).into());
                    }
                    escalate |= reply.should_escalate;
                    (reply.content, reply.should_continue)
                }
            };

            let response = self.send_chat(&message, step.timeout_ms).await?;
            exchanges.push(json!({ "message": message, "response": response }));
            if !keep_going {
                break;
            }
        }

        let transcript = exchanges
            .iter()
            .filter_map(|exchange| exchange["response"].as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();
        for expected in &step.expected_response_contains {
            if !transcript.contains(&expected.to_lowercase()) {
                return Err(StepFailure::new(
                    ErrorType::ChatInvalidResponse,
                    format!("Expected response to contain \"{expected}\""),
                )
                .with_expectation(json!(expected), json!(transcript))
                .into());
            }
        }

        Ok(json!({
            "sessionId": self.session.session_key,
            "exchanges": exchanges,
            "shouldEscalate": escalate,
        }))
    }

    async fn diagnostic(&mut self, step: &DiagnosticStep) -> StepOutput {
        let trigger = TargetRequest::post(
            "/api/chat",
            json!({
                "message": DIAGNOSTIC_TRIGGER,
                "sessionId": self.session.session_key,
                "visitorEmail": self.persona.email,
                "visitorName": self.persona.persona.name,
                "diagnosticMode": true,
            }),
        );
        let response = self.send(&trigger, ErrorType::FlowValidationError).await?;
        if !response.is_success() {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                format!("Failed to trigger diagnostic: {}", response.status),
            )
            .with_request(self.snapshot(&trigger))
            .with_response(&response)
            .into());
        }
        let body = response.json().unwrap_or(Value::Null);
        let Some(diagnostic_id) = id_string(body.get("diagnosticAuditId")) else {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                "Diagnostic trigger response did not include diagnosticAuditId",
            )
            .with_request(self.snapshot(&trigger))
            .with_response(&response)
            .into());
        };
        self.session.created_resources.chat_session_id = Some(self.session.session_key.clone());
        self.session.created_resources.diagnostic_id = Some(diagnostic_id.clone());
        self.track_resources();
        self.history.push(ChatTurn::user(DIAGNOSTIC_TRIGGER));
        if let Some(reply) = body.get("response").and_then(Value::as_str) {
            self.history.push(ChatTurn::assistant(reply));
        }

        let mut answered = Vec::new();
        if step.complete_all_categories {
            for category in DiagnosticCategory::ALL {
                if step.skip_categories.contains(&category) {
                    continue;
                }
                self.checkpoint()?;
                self.last_action = Some(format!("Answering {}", category.title()));
                let reply = self
                    .env
                    .agent
                    .diagnostic_reply(
                        &self.persona.persona,
                        &self.scenario,
                        category,
                        &self.history,
                        step.use_persona_responses,
                    )
                    .await;
                if let Some(failure) = reply.failure {
                    return Err(agent_failure(failure).into());
                }

                let answer = TargetRequest::post(
                    "/api/chat",
                    json!({
                        "message": reply.content,
                        "sessionId": self.session.session_key,
                        "diagnosticMode": true,
                        "diagnosticAuditId": diagnostic_id,
                    }),
                );
                let response = self.send(&answer, ErrorType::FlowValidationError).await?;
                if !response.is_success() {
                    return Err(StepFailure::new(
                        ErrorType::FlowValidationError,
                        format!(
                            "Diagnostic answer for {} rejected: {} - {}",
                            category.as_str(),
                            response.status,
                            response.text
                        ),
                    )
                    .with_request(self.snapshot(&answer))
                    .with_response(&response)
                    .into());
                }
                self.history.push(ChatTurn::user(reply.content));
                if let Some(text) = response
                    .json()
                    .and_then(|body| body.get("response").and_then(Value::as_str).map(str::to_string))
                {
                    self.history.push(ChatTurn::assistant(text));
                }
                answered.push(category.as_str());
                self.pause(self.env.settings.diagnostic_pause).await?;
            }
        }

        Ok(json!({
            "diagnosticId": diagnostic_id,
            "completed": step.complete_all_categories,
            "categoriesAnswered": answered,
        }))
    }

    async fn first_product(&self, filters: &[Filter], details: &str) -> Result<Option<String>, StepError> {
        let rows = self
            .env
            .data
            .select("products", filters, Some(1))
            .await
            .map_err(|err| {
                StepFailure::new(
                    ErrorType::FlowValidationError,
                    format!("Database error querying products ({details}): {err}"),
                )
            })?;
        Ok(rows.first().and_then(|row| id_string(row.get("id"))))
    }

    async fn add_to_cart(&mut self, step: &AddToCartStep) -> StepOutput {
        let mut product_id = step.product_id.clone();
        if product_id.is_none() {
            if let Some(product_type) = &step.product_type {
                let filters = [
                    Filter::eq("product_type", product_type.as_str()),
                    Filter::eq("active", true),
                ];
                product_id = self
                    .first_product(&filters, &format!("product_type=\"{product_type}\""))
                    .await?;
            }
        }
        if product_id.is_none() {
            product_id = self
                .first_product(&[Filter::eq("active", true)], "any active product")
                .await?;
        }
        let Some(product_id) = product_id else {
            let attempted = match (&step.product_id, &step.product_type) {
                (Some(id), _) => format!("specific product ID \"{id}\""),
                (None, Some(kind)) => format!("product of type \"{kind}\""),
                (None, None) => "any active product".to_string(),
            };
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                format!(
                    "No products available to add to cart. Attempted to find: {attempted}. Check that products exist in the database with active=true."
                ),
            )
            .into());
        };

        let quantity = step.quantity.max(1);
        self.cart.push(CartItem {
            product_id: product_id.clone(),
            quantity,
        });
        self.last_action = Some(format!("Added {product_id} to cart"));
        Ok(json!({
            "productId": product_id,
            "quantity": quantity,
            "cartSize": self.cart.len(),
        }))
    }

    async fn checkout(&mut self, step: &CheckoutStep) -> StepOutput {
        let persona = &self.persona.persona;
        let contact = match (&step.custom_contact, step.use_persona_contact) {
            (Some(custom), false) => json!({
                "name": custom.name,
                "email": custom.email,
                "company": custom.company,
            }),
            _ => json!({
                "name": persona.name,
                "email": self.persona.email,
                "company": persona.company,
            }),
        };
        if self.cart.is_empty() {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                "Checkout attempted with an empty cart",
            )
            .into());
        }

        let items: Vec<Value> = self
            .cart
            .iter()
            .map(|item| json!({ "productId": item.product_id, "quantity": item.quantity }))
            .collect();
        let request = TargetRequest::post(
            "/api/checkout",
            json!({
                "items": items,
                "contact": contact,
                "paymentMethod": step.payment_method,
                "testMode": true,
            }),
        );
        let response = self.send(&request, ErrorType::FlowValidationError).await?;
        if !response.is_success() {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                format!("Checkout failed: {} - {}", response.status, response.text),
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        }
        let body = response.json().unwrap_or(Value::Null);
        let order_id = id_string(body.get("orderId"))
            .or_else(|| id_string(body.get("order_id")))
            .or_else(|| id_string(body.get("id")));
        let Some(order_id) = order_id else {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                "Checkout response did not include an order id",
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        };
        self.session.created_resources.order_id = Some(order_id.clone());
        self.track_resources();

        let rows = self
            .env
            .data
            .select("orders", &[Filter::eq("id", order_id.as_str())], Some(1))
            .await
            .map_err(|err| {
                StepFailure::new(
                    ErrorType::FlowValidationError,
                    format!("Database error verifying order {order_id}: {err}"),
                )
            })?;
        if rows.is_empty() {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                format!("Order {order_id} was not persisted"),
            )
            .with_expectation(json!({ "orders.id": order_id }), json!(null))
            .into());
        }

        self.cart.clear();
        Ok(json!({
            "orderId": order_id,
            "contact": contact,
            "paymentMethod": step.payment_method,
            "items": items,
        }))
    }

    fn persona_contact_fields(&self) -> Value {
        let persona = &self.persona.persona;
        json!({
            "name": persona.name,
            "email": self.persona.email,
            "company": persona.company,
            "message": format!(
                "Test submission from {}. {}",
                persona.name,
                persona.pain_points.first().map(String::as_str).unwrap_or_default()
            ),
            "annual_revenue": persona.budget.form_value(),
            "interest_areas": persona
                .interest_areas
                .iter()
                .map(|area| area.as_str())
                .collect::<Vec<_>>(),
            "is_decision_maker": persona.role == PersonaRole::DecisionMaker,
        })
    }

    async fn contact_form(&mut self, step: &ContactFormStep) -> StepOutput {
        let fields = if step.use_persona_data {
            self.persona_contact_fields()
        } else {
            json!(step.fields)
        };
        let request = TargetRequest::post("/api/contact", fields.clone());
        let response = self.send(&request, ErrorType::FlowValidationError).await?;
        if !response.is_success() {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                format!(
                    "Contact form submission failed: {} - {}",
                    response.status, response.text
                ),
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        }
        let submission_id = response.json().and_then(|body| match body.get("id") {
            Some(Value::Number(number)) => number.as_i64(),
            Some(Value::String(text)) => text.parse().ok(),
            _ => None,
        });
        let Some(submission_id) = submission_id else {
            return Err(StepFailure::new(
                ErrorType::FlowValidationError,
                "Contact form response did not include a submission id",
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        };
        self.session.created_resources.contact_id = Some(submission_id);
        self.track_resources();
        Ok(json!({ "fields": fields, "submissionId": submission_id }))
    }

    async fn webhook_arrived(&self, webhook: WebhookType) -> Result<bool, StepFailure> {
        let resources = &self.session.created_resources;
        let (table, filters) = match webhook {
            WebhookType::DiagnosticCompletion => match &resources.diagnostic_id {
                Some(id) => (
                    "diagnostic_audits",
                    vec![Filter::eq("id", id.as_str()), Filter::eq("status", "completed")],
                ),
                None => return Ok(false),
            },
            WebhookType::LeadQualification => match resources.contact_id {
                Some(id) => (
                    "contact_submissions",
                    vec![Filter::eq("id", id), Filter::not_null("lead_score")],
                ),
                None => return Ok(false),
            },
            WebhookType::OrderCreated | WebhookType::StripePayment => match &resources.order_id {
                Some(id) => ("orders", vec![Filter::eq("id", id.as_str())]),
                None => return Ok(false),
            },
        };
        let rows = self
            .env
            .data
            .select(table, &filters, Some(1))
            .await
            .map_err(|err| {
                StepFailure::new(
                    ErrorType::Exception,
                    format!("Webhook check on {table} failed: {err}"),
                )
            })?;
        let arrived = match webhook {
            WebhookType::StripePayment => rows.first().is_some_and(|row| {
                matches!(row.get("status").and_then(Value::as_str), Some("paid" | "completed"))
            }),
            _ => !rows.is_empty(),
        };
        Ok(arrived)
    }

    async fn wait_for_webhook(&mut self, step: &WaitForWebhookStep) -> StepOutput {
        let interval = step
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(self.env.settings.poll_interval);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(step.timeout_ms);
        loop {
            if self.webhook_arrived(step.webhook_type).await? {
                return Ok(json!({
                    "webhookType": step.webhook_type,
                    "receivedAt": Utc::now().to_rfc3339(),
                    "elapsedMs": started.elapsed().as_millis() as u64,
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.pause(interval.min(deadline - now)).await?;
        }
        Err(StepFailure::new(
            ErrorType::Timeout,
            format!(
                "Webhook {} not received within {}ms",
                step.webhook_type.as_str(),
                step.timeout_ms
            ),
        )
        .into())
    }

    /// Filters that scope a table to the rows this client created.
    fn isolation_filters(&self, table: &str) -> Vec<Filter> {
        let resources = &self.session.created_resources;
        match table {
            "chat_sessions" | "chat_messages" => {
                vec![Filter::eq("session_id", self.session.session_key.as_str())]
            }
            "contact_submissions" => resources
                .contact_id
                .map(|id| Filter::eq("id", id))
                .into_iter()
                .collect(),
            "diagnostic_audits" => resources
                .diagnostic_id
                .as_deref()
                .map(|id| Filter::eq("id", id))
                .into_iter()
                .collect(),
            "orders" => resources
                .order_id
                .as_deref()
                .map(|id| Filter::eq("id", id))
                .into_iter()
                .collect(),
            "order_items" => resources
                .order_id
                .as_deref()
                .map(|id| Filter::eq("order_id", id))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn validate_database(&mut self, step: &ValidateDatabaseStep) -> StepOutput {
        let mut filters = filters_from_conditions(&step.conditions);
        filters.extend(self.isolation_filters(&step.table));
        let rows = self
            .env
            .data
            .select(&step.table, &filters, None)
            .await
            .map_err(|err| {
                StepFailure::new(
                    ErrorType::ValidationError,
                    format!("Database validation query failed: {err}"),
                )
            })?;

        if let Some(expected) = step.expected_count {
            if rows.len() != expected {
                return Err(StepFailure::new(
                    ErrorType::ValidationError,
                    format!("Expected {expected} records, found {}", rows.len()),
                )
                .with_expectation(json!(expected), json!(rows.len()))
                .into());
            }
        }
        if let Some(first) = rows.first() {
            for (field, expected) in &step.expected_fields {
                let actual = first.get(field).cloned().unwrap_or(Value::Null);
                if !values_equal(expected, &actual) {
                    return Err(StepFailure::new(
                        ErrorType::ValidationError,
                        format!(
                            "Expected {field} to be {}, got {}",
                            plain(expected),
                            plain(&actual)
                        ),
                    )
                    .with_expectation(expected.clone(), actual)
                    .into());
                }
            }
        }

        Ok(json!({
            "table": step.table,
            "recordCount": rows.len(),
            "records": rows,
        }))
    }

    async fn screenshot(&mut self, step: &ScreenshotStep) -> StepOutput {
        let filename = format!(
            "{}_{}_{}.png",
            self.session.client_id,
            step.name,
            Utc::now().timestamp_millis()
        );
        let request = TargetRequest::get(self.current_path.clone());
        let response = self.send(&request, ErrorType::NavigationError).await?;
        if !response.is_success() {
            return Err(StepFailure::new(
                ErrorType::NavigationError,
                format!(
                    "Screenshot {} could not capture {}: {}",
                    step.name, self.current_path, response.status
                ),
            )
            .into());
        }
        self.screenshots.push(filename.clone());
        Ok(json!({
            "name": step.name,
            "filename": filename,
            "path": self.current_path,
            "fullPage": step.full_page,
            "bytes": response.text.len(),
        }))
    }

    async fn delay(&mut self, step: &DelayStep) -> StepOutput {
        let duration_ms = if step.randomize {
            jittered(step.duration_ms)
        } else {
            step.duration_ms
        };
        self.pause(Duration::from_millis(duration_ms)).await?;
        Ok(json!({ "durationMs": duration_ms }))
    }

    async fn api_call(&mut self, step: &ApiCallStep) -> StepOutput {
        let mut request = TargetRequest::new(step.method, step.endpoint.clone())
            .with_bearer(self.env.settings.admin_token.as_deref());
        if let Some(body) = &step.body {
            request = request.with_body(body.clone());
        }
        request.headers = step.headers.clone();

        let response = self.send(&request, ErrorType::ApiError).await?;
        self.last_action = Some(format!("API call: {} {}", step.method.as_str(), step.endpoint));
        match step.expected_status {
            Some(expected) if response.status != expected => {
                return Err(StepFailure::new(
                    ErrorType::ApiError,
                    format!(
                        "Expected status {expected}, got {}. Response: {}",
                        response.status, response.text
                    ),
                )
                .with_request(self.snapshot(&request))
                .with_response(&response)
                .with_expectation(json!(expected), json!(response.status))
                .into());
            }
            None if !response.is_success() => {
                return Err(StepFailure::new(
                    ErrorType::ApiError,
                    format!(
                        "{} {} returned {}: {}",
                        step.method.as_str(),
                        step.endpoint,
                        response.status,
                        response.text
                    ),
                )
                .with_request(self.snapshot(&request))
                .with_response(&response)
                .into());
            }
            _ => {}
        }

        let body = response.body_value();
        if let Value::Object(fields) = &body {
            for (key, expected) in &step.expected_response {
                let actual = fields.get(key).cloned().unwrap_or(Value::Null);
                if !values_equal(expected, &actual) {
                    return Err(StepFailure::new(
                        ErrorType::ValidationError,
                        format!(
                            "Expected response.{key} to be {}, got {}",
                            plain(expected),
                            plain(&actual)
                        ),
                    )
                    .with_request(self.snapshot(&request))
                    .with_response(&response)
                    .with_expectation(expected.clone(), actual)
                    .into());
                }
            }
        }

        Ok(json!({ "status": response.status, "response": body }))
    }

    /// First outreach item with `status`, or the step's explicit target.
    async fn outreach_item(
        &mut self,
        step: &AdminActionStep,
        status: &str,
        token: &str,
        missing: &str,
    ) -> Result<String, StepError> {
        if let Some(target) = &step.target {
            return Ok(target.clone());
        }
        let request = TargetRequest::get(format!("/api/admin/outreach?status={status}&limit=1"))
            .with_bearer(Some(token));
        let response = self.send(&request, ErrorType::ApiError).await?;
        if !response.is_success() {
            return Err(StepFailure::new(
                ErrorType::ApiError,
                format!("Failed to fetch {status} outreach: {}", response.status),
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        }
        let body = response.json().unwrap_or(Value::Null);
        id_string(body.pointer("/items/0/id"))
            .ok_or_else(|| StepFailure::new(ErrorType::FlowValidationError, missing).into())
    }

    async fn admin_request(&mut self, request: TargetRequest, failure: &str) -> Result<TargetResponse, StepError> {
        let response = self.send(&request, ErrorType::ApiError).await?;
        if !response.is_success() {
            return Err(StepFailure::new(
                ErrorType::ApiError,
                format!("{failure}: {} - {}", response.status, response.text),
            )
            .with_request(self.snapshot(&request))
            .with_response(&response)
            .into());
        }
        Ok(response)
    }

    async fn admin_action(&mut self, step: &AdminActionStep) -> StepOutput {
        self.last_action = Some(format!("Admin action: {}", step.action.as_str()));
        let Some(token) = self.env.settings.admin_token.clone() else {
            return Err(StepFailure::new(
                ErrorType::ApiError,
                format!(
                    "No admin token available; set {}",
                    self.env.settings.admin_token_env
                ),
            )
            .into());
        };

        match step.action {
            AdminAction::ApproveOutreach | AdminAction::RejectOutreach => {
                let (verb, past) = if step.action == AdminAction::ApproveOutreach {
                    ("approve", "approved")
                } else {
                    ("reject", "rejected")
                };
                let draft = self
                    .outreach_item(step, "draft", &token, &format!("No draft found to {verb}"))
                    .await?;
                let request = TargetRequest::new(
                    HttpMethod::Patch,
                    "/api/admin/outreach",
                )
                .with_body(json!({ "action": verb, "ids": [draft] }))
                .with_bearer(Some(&token));
                self.admin_request(request, &format!("Failed to {verb} outreach"))
                    .await?;
                Ok(json!({ past: draft }))
            }
            AdminAction::SendOutreach => {
                let approved = self
                    .outreach_item(step, "approved", &token, "No approved outreach found to send")
                    .await?;
                let request = TargetRequest::new(
                    HttpMethod::Post,
                    format!("/api/admin/outreach/{approved}/send"),
                )
                .with_bearer(Some(&token));
                self.admin_request(request, "Failed to send outreach").await?;
                Ok(json!({ "sent": approved }))
            }
            AdminAction::TriggerScraping => {
                let options = step
                    .options
                    .clone()
                    .unwrap_or_else(|| json!({ "source": "facebook" }));
                let request = TargetRequest::post("/api/admin/outreach/trigger", options)
                    .with_bearer(Some(&token));
                let response = self
                    .admin_request(request, "Failed to trigger scraping")
                    .await?;
                Ok(response.body_value())
            }
        }
    }

    async fn wait_for_data(&mut self, step: &WaitForDataStep) -> StepOutput {
        let interval = step
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(self.env.settings.poll_interval);
        let filters = filters_from_conditions(&step.conditions);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(step.timeout_ms);
        self.last_action = Some(format!("Waiting for data in {}", step.table));

        loop {
            let rows: Vec<Row> = self
                .env
                .data
                .select(&step.table, &filters, None)
                .await
                .map_err(|err| {
                    StepFailure::new(
                        ErrorType::Exception,
                        format!("Database query failed: {err}"),
                    )
                })?;
            let satisfied = !rows.is_empty()
                && step.expected_count.map_or(true, |count| rows.len() == count);
            if satisfied {
                return Ok(json!({
                    "found": true,
                    "count": rows.len(),
                    "elapsedMs": started.elapsed().as_millis() as u64,
                    "data": rows,
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.pause(interval.min(deadline - now)).await?;
        }
        Err(StepFailure::new(
            ErrorType::Timeout,
            format!(
                "Timeout waiting for data in {} after {}ms",
                step.table, step.timeout_ms
            ),
        )
        .into())
    }

    // -----------------------------------------------------------------------
    // Post-run validation
    // -----------------------------------------------------------------------

    async fn run_validation(&self) -> Result<(), StepFailure> {
        let mut problems = Vec::new();

        for kind in &self.scenario.expected_outcomes.must_complete {
            let done = self
                .session
                .step_results
                .iter()
                .any(|result| result.step_type == *kind && result.outcome == StepOutcome::Success);
            if !done {
                problems.push(format!("Expected at least one successful {kind} step"));
            }
        }

        for rule in &self.scenario.expected_outcomes.data_validation {
            let filters = self.isolation_filters(&rule.table);
            let rows = match self.env.data.select(&rule.table, &filters, None).await {
                Ok(rows) => rows,
                Err(err) => {
                    problems.push(format!("Query error for {}.{}: {err}", rule.table, rule.field));
                    continue;
                }
            };
            match rule.condition {
                RuleCondition::Exists => {
                    let present = rows
                        .iter()
                        .any(|row| row.get(&rule.field).is_some_and(|value| !value.is_null()));
                    if !present {
                        problems.push(format!("Expected {}.{} to exist", rule.table, rule.field));
                    }
                }
                RuleCondition::Equals => {
                    let expected = rule.value.clone().unwrap_or(Value::Null);
                    let matches = rows.first().is_some_and(|row| {
                        values_equal(&expected, row.get(&rule.field).unwrap_or(&Value::Null))
                    });
                    if !matches {
                        problems.push(format!(
                            "Expected {}.{} to equal {}",
                            rule.table,
                            rule.field,
                            plain(&expected)
                        ));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StepFailure::new(ErrorType::ValidationError, problems.join("; "))
                .with_expectation(json!(self.scenario.expected_outcomes), json!(problems)))
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use harness_core::scenario::{ExpectedOutcomes, JourneyStage, Scenario, Step, Variability};

    use super::{ClientEnv, ClientSettings};
    use crate::chat_agent::fixtures::mock_agent;
    use crate::chat_agent::ChatAgent;
    use crate::target::TargetApp;
    use crate::target_data::TargetDataStore;

    pub(crate) fn fast_settings() -> ClientSettings {
        ClientSettings {
            session_prefix: "test_e2e_".to_string(),
            admin_token: Some("admin-token".to_string()),
            admin_token_env: "HARNESS_ADMIN_TOKEN".to_string(),
            poll_interval: Duration::from_millis(10),
            inter_step_delay: false,
            diagnostic_pause: Duration::ZERO,
            cleanup_attempts: 2,
            cleanup_retry_delay: Duration::ZERO,
        }
    }

    pub(crate) fn env_with(
        target: Arc<dyn TargetApp>,
        data: Arc<dyn TargetDataStore>,
        agent: ChatAgent,
    ) -> Arc<ClientEnv> {
        Arc::new(ClientEnv {
            target,
            data,
            agent,
            settings: fast_settings(),
        })
    }

    pub(crate) fn env(target: Arc<dyn TargetApp>, data: Arc<dyn TargetDataStore>) -> Arc<ClientEnv> {
        env_with(target, data, mock_agent())
    }

    /// Scenario with no randomness and no post-run validation.
    pub(crate) fn scenario_with(steps: Vec<Step>) -> Scenario {
        Scenario {
            id: "custom".to_string(),
            name: "Custom".to_string(),
            description: "Hand-built scenario".to_string(),
            journey_stage: JourneyStage::Prospect,
            steps,
            variability: Variability {
                skip_probability: BTreeMap::new(),
                delay_range_ms: (0, 0),
                response_variation: false,
            },
            expected_outcomes: ExpectedOutcomes::default(),
            estimated_duration_ms: 1_000,
            tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use harness_core::persona::{create_persona_instance, DiagnosticCategory};
    use harness_core::scenario::{
        scenario, AddToCartStep, AdminAction, AdminActionStep, ApiCallStep, ChatStep,
        CheckoutStep, ContactFormStep, DelayStep, DiagnosticStep, ExpectedOutcomes,
        FieldCondition, HttpMethod, NavigateStep, PaymentMethod, RuleCondition, ScreenshotStep,
        Step, StepKind, ValidateDatabaseStep, ValidationRule, WaitForDataStep,
        WaitForWebhookStep, WebhookType,
    };
    use harness_core::state::{ActivityStatus, ClientStatus};
    use harness_core::types::{ClientId, CreatedResources, ErrorType, LiveActivity, RunId, StepOutcome};
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    use super::fixtures::{env, env_with, scenario_with};
    use super::{ClientEnv, ClientOutcome, ProgressSink, SimulatedClient};
    use crate::chat_agent::fixtures::{settings, SlowLlm};
    use crate::chat_agent::ChatAgent;
    use crate::target::fixtures::{ok, status, ScriptedTarget};
    use crate::target_data::fixtures::target_store;
    use crate::target_data::{SqliteTargetData, TargetDataStore};

    fn navigate(path: &str) -> Step {
        Step::Navigate(NavigateStep {
            path: path.to_string(),
            wait_for_selector: None,
        })
    }

    fn chat(message: Option<&str>) -> Step {
        Step::Chat(ChatStep {
            intent: "greeting".to_string(),
            message: message.map(str::to_string),
            expected_response_contains: Vec::new(),
            max_turns: None,
            timeout_ms: None,
        })
    }

    fn client(env: Arc<ClientEnv>, steps: Vec<Step>) -> SimulatedClient {
        client_for(env, scenario_with(steps), CancellationToken::new())
    }

    fn client_for(
        env: Arc<ClientEnv>,
        scenario: harness_core::scenario::Scenario,
        cancel: CancellationToken,
    ) -> SimulatedClient {
        let persona = create_persona_instance("startup_sarah").expect("catalog persona");
        SimulatedClient::new(env, RunId::new("e2e_test_run"), 1, persona, scenario, cancel)
    }

    /// Target answering every page GET and the chat endpoint.
    fn friendly_target() -> Arc<ScriptedTarget> {
        Arc::new(ScriptedTarget::new(|request| match request.path.as_str() {
            "/api/chat" => ok(r#"{"response":"Happy to help! Tell me about your business."}"#),
            "/missing" => status(404, "not found"),
            _ => ok("<html></html>"),
        }))
    }

    fn single_error(outcome: &ClientOutcome) -> &harness_core::types::ErrorContext {
        assert_eq!(outcome.errors.len(), 1, "errors: {:?}", outcome.errors);
        &outcome.errors[0]
    }

    #[tokio::test]
    async fn navigation_scenario_completes_with_cursor_at_end() {
        let target = friendly_target();
        let data = Arc::new(target_store());
        let outcome = client(
            env(target.clone(), data),
            vec![navigate("/"), navigate("/store"), navigate("/services")],
        )
        .run()
        .await;

        assert_eq!(outcome.session.status, ClientStatus::Completed);
        assert_eq!(outcome.session.current_step_index, 3);
        assert_eq!(outcome.session.total_steps, 3);
        assert!(outcome.errors.is_empty());
        assert_eq!(target.paths(), vec!["GET /", "GET /store", "GET /services"]);
    }

    #[tokio::test]
    async fn quick_browse_catalog_scenario_runs_offline() {
        let target = friendly_target();
        let mut quick = scenario("quick_browse").expect("catalog scenario").clone();
        for step in &mut quick.steps {
            if let Step::Browse(browse) = step {
                browse.duration_ms = 0;
            }
        }
        let outcome = client_for(env(target, Arc::new(target_store())), quick, CancellationToken::new())
            .run()
            .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed);
        assert_eq!(outcome.screenshots.len(), 3);
        assert!(outcome.screenshots[0].starts_with("e2e_test_run_client_1_home-page_"));
    }

    #[tokio::test]
    async fn failing_step_stops_the_client_on_that_step() {
        let target = friendly_target();
        let outcome = client(
            env(target.clone(), Arc::new(target_store())),
            vec![navigate("/"), navigate("/missing"), navigate("/store")],
        )
        .run()
        .await;

        assert_eq!(outcome.session.status, ClientStatus::Failed);
        assert_eq!(outcome.session.current_step_index, 1);
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::NavigationError);
        assert_eq!(error.message, "Navigation to /missing failed: 404");
        assert_eq!(error.step_index, 1);
        assert_eq!(error.step_type, "navigate");
        assert_eq!(error.step_config.as_ref().expect("config")["path"], "/missing");
        assert_eq!(target.paths().len(), 2);
    }

    #[tokio::test]
    async fn chat_posts_session_details_and_tracks_the_session() {
        let target = friendly_target();
        let mut step = ChatStep {
            intent: "greeting".to_string(),
            message: Some("Hi there".to_string()),
            expected_response_contains: vec!["HAPPY TO HELP".to_string()],
            max_turns: None,
            timeout_ms: None,
        };
        let outcome = client(env(target.clone(), Arc::new(target_store())), vec![Step::Chat(step.clone())])
            .run()
            .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed);
        let session_key = outcome.session.session_key.clone();
        assert!(session_key.starts_with("test_e2e_e2e_test_run_1_"));
        assert_eq!(
            outcome.session.created_resources.chat_session_id.as_deref(),
            Some(session_key.as_str())
        );
        let sent = target.seen.lock().expect("seen").clone();
        let body = sent[0].body.clone().expect("chat body");
        assert_eq!(body["message"], "Hi there");
        assert_eq!(body["sessionId"], session_key.as_str());
        assert_eq!(body["visitorName"], "Sarah Mitchell");

        step.expected_response_contains = vec!["pricing".to_string()];
        let outcome = client(env(friendly_target(), Arc::new(target_store())), vec![Step::Chat(step)])
            .run()
            .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::ChatInvalidResponse);
        assert_eq!(error.message, "Expected response to contain \"pricing\"");
    }

    #[tokio::test]
    async fn generated_chat_message_uses_the_agent() {
        let target = friendly_target();
        let step = Step::Chat(ChatStep {
            intent: "inquiry".to_string(),
            message: None,
            expected_response_contains: Vec::new(),
            max_turns: Some(3),
            timeout_ms: None,
        });
        let outcome = client(env(target.clone(), Arc::new(target_store())), vec![step])
            .run()
            .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed);
        let data = outcome.session.step_results[0].data.clone().expect("step data");
        assert_eq!(data["exchanges"].as_array().map(Vec::len), Some(3));
        assert_eq!(target.paths().len(), 3);
    }

    #[tokio::test]
    async fn chat_agent_timeout_fails_with_chat_timeout() {
        let target = friendly_target();
        let agent = ChatAgent::new(
            Arc::new(SlowLlm(Duration::from_millis(500))),
            settings(Duration::from_millis(20)),
        );
        let outcome = client(
            env_with(target.clone(), Arc::new(target_store()), agent),
            vec![chat(Some("Hello")), chat(None), navigate("/")],
        )
        .run()
        .await;

        assert_eq!(outcome.session.status, ClientStatus::Failed);
        assert_eq!(outcome.session.current_step_index, 1);
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::ChatTimeout);
        assert_eq!(error.step_index, 1);
        assert_eq!(target.paths(), vec!["POST /api/chat"]);
    }

    #[tokio::test]
    async fn chat_endpoint_error_is_invalid_response() {
        let target = Arc::new(ScriptedTarget::new(|_| status(500, "boom")));
        let outcome = client(env(target, Arc::new(target_store())), vec![chat(Some("Hi"))])
            .run()
            .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::ChatInvalidResponse);
        assert_eq!(error.message, "Chat API error: 500 - boom");
        assert_eq!(error.response.as_ref().map(|r| r.status), Some(500));
    }

    #[tokio::test]
    async fn diagnostic_answers_every_category_not_skipped() {
        let target = Arc::new(ScriptedTarget::new(|request| {
            let body = request.body.clone().unwrap_or(Value::Null);
            if body.get("diagnosticAuditId").is_none() {
                ok(r#"{"response":"Let's start your audit.","diagnosticAuditId":"diag-42"}"#)
            } else {
                ok(r#"{"response":"Thanks, next question."}"#)
            }
        }));
        let step = Step::Diagnostic(DiagnosticStep {
            complete_all_categories: true,
            skip_categories: vec![DiagnosticCategory::TechStack],
            use_persona_responses: true,
        });
        let outcome = client(env(target.clone(), Arc::new(target_store())), vec![step])
            .run()
            .await;

        assert_eq!(outcome.session.status, ClientStatus::Completed);
        assert_eq!(
            outcome.session.created_resources.diagnostic_id.as_deref(),
            Some("diag-42")
        );
        let sent = target.seen.lock().expect("seen").clone();
        assert_eq!(sent.len(), 6);
        assert_eq!(sent[0].body.as_ref().expect("body")["diagnosticMode"], true);
        let first_answer = sent[1].body.clone().expect("answer body");
        assert_eq!(first_answer["diagnosticAuditId"], "diag-42");
        assert!(first_answer["message"]
            .as_str()
            .expect("message")
            .starts_with("Our main challenges are"));
    }

    #[tokio::test]
    async fn diagnostic_without_audit_id_is_a_flow_failure() {
        let target = Arc::new(ScriptedTarget::new(|_| ok(r#"{"response":"Sure"}"#)));
        let step = Step::Diagnostic(DiagnosticStep {
            complete_all_categories: true,
            skip_categories: Vec::new(),
            use_persona_responses: true,
        });
        let outcome = client(env(target, Arc::new(target_store())), vec![step]).run().await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::FlowValidationError);
    }

    fn checkout_target(data: Arc<SqliteTargetData>) -> Arc<ScriptedTarget> {
        Arc::new(ScriptedTarget::new(move |request| {
            if request.path == "/api/checkout" {
                data.execute_batch(
                    "INSERT INTO orders (id, status, email) VALUES ('ord-1', 'completed', 'x@test');
                     INSERT INTO order_items (order_id, product_id) VALUES ('ord-1', 'prod-ebook');",
                )
                .expect("insert order");
                ok(r#"{"orderId":"ord-1"}"#)
            } else {
                ok("<html></html>")
            }
        }))
    }

    fn add_to_cart(product_type: Option<&str>) -> Step {
        Step::AddToCart(AddToCartStep {
            product_id: None,
            product_type: product_type.map(str::to_string),
            quantity: 1,
        })
    }

    fn checkout() -> Step {
        Step::Checkout(CheckoutStep {
            payment_method: PaymentMethod::StripeTest,
            use_persona_contact: true,
            custom_contact: None,
        })
    }

    #[tokio::test]
    async fn cart_and_checkout_create_a_verified_order() {
        let data = Arc::new(target_store());
        let target = checkout_target(data.clone());
        let mut scenario = scenario_with(vec![
            add_to_cart(Some("ebook")),
            checkout(),
            Step::ValidateDatabase(ValidateDatabaseStep {
                table: "orders".to_string(),
                conditions: BTreeMap::from([(
                    "status".to_string(),
                    FieldCondition::Equals(json!("completed")),
                )]),
                expected_count: Some(1),
                expected_fields: BTreeMap::new(),
            }),
        ]);
        scenario.expected_outcomes = ExpectedOutcomes {
            must_complete: vec![StepKind::AddToCart, StepKind::Checkout],
            data_validation: vec![ValidationRule {
                table: "order_items".to_string(),
                field: "id".to_string(),
                condition: RuleCondition::Exists,
                value: None,
            }],
        };

        let outcome = client_for(env(target.clone(), data), scenario, CancellationToken::new())
            .run()
            .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed, "{:?}", outcome.errors);
        assert_eq!(outcome.session.created_resources.order_id.as_deref(), Some("ord-1"));
        let sent = target.seen.lock().expect("seen").clone();
        let body = sent[0].body.clone().expect("checkout body");
        assert_eq!(body["items"][0]["productId"], "prod-ebook");
        assert_eq!(body["paymentMethod"], "stripe_test");
        assert_eq!(body["contact"]["company"], "TechFlow Solutions");
    }

    #[tokio::test]
    async fn cart_falls_back_to_any_active_product() {
        let outcome = client(
            env(friendly_target(), Arc::new(target_store())),
            vec![add_to_cart(Some("hardware"))],
        )
        .run()
        .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed);
        let data = outcome.session.step_results[0].data.clone().expect("data");
        assert!(matches!(data["productId"].as_str(), Some("prod-ebook" | "prod-training")));
    }

    #[tokio::test]
    async fn empty_catalog_explains_what_was_searched() {
        let data = Arc::new(target_store());
        data.execute_batch("UPDATE products SET active = 0")
            .expect("deactivate");
        let outcome = client(env(friendly_target(), data), vec![add_to_cart(Some("ebook"))])
            .run()
            .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::FlowValidationError);
        assert_eq!(
            error.message,
            "No products available to add to cart. Attempted to find: product of type \"ebook\". Check that products exist in the database with active=true."
        );
    }

    #[tokio::test]
    async fn checkout_with_empty_cart_fails() {
        let data = Arc::new(target_store());
        let outcome = client(env(checkout_target(data.clone()), data), vec![checkout()])
            .run()
            .await;
        assert_eq!(single_error(&outcome).error_type, ErrorType::FlowValidationError);
    }

    fn contact_form() -> Step {
        Step::ContactForm(ContactFormStep {
            fields: BTreeMap::new(),
            use_persona_data: true,
        })
    }

    fn contact_target(data: Arc<SqliteTargetData>, lead_score: Option<i64>) -> Arc<ScriptedTarget> {
        Arc::new(ScriptedTarget::new(move |request| {
            if request.path == "/api/contact" {
                let score = lead_score.map_or("NULL".to_string(), |s| s.to_string());
                data.execute_batch(&format!(
                    "INSERT INTO contact_submissions (id, name, email, lead_score) VALUES (11, 'Sarah', 's@test', {score})"
                ))
                .expect("insert contact");
                ok(r#"{"id":11}"#)
            } else if request.path == "/missing" {
                status(404, "not found")
            } else {
                ok("<html></html>")
            }
        }))
    }

    #[tokio::test]
    async fn contact_form_sends_persona_fields_and_waits_for_qualification() {
        let data = Arc::new(target_store());
        let target = contact_target(data.clone(), Some(82));
        let outcome = client(
            env(target.clone(), data),
            vec![
                contact_form(),
                Step::WaitForWebhook(WaitForWebhookStep {
                    webhook_type: WebhookType::LeadQualification,
                    timeout_ms: 1_000,
                    poll_interval_ms: None,
                }),
            ],
        )
        .run()
        .await;

        assert_eq!(outcome.session.status, ClientStatus::Completed, "{:?}", outcome.errors);
        assert_eq!(outcome.session.created_resources.contact_id, Some(11));
        let body = target.seen.lock().expect("seen")[0].body.clone().expect("body");
        assert_eq!(body["annual_revenue"], "5K-$15K");
        assert_eq!(body["is_decision_maker"], true);
        assert_eq!(
            body["message"],
            "Test submission from Sarah Mitchell. Manual lead follow-up taking too long"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_webhook_times_out() {
        let data = Arc::new(target_store());
        let outcome = client(
            env(contact_target(data.clone(), None), data),
            vec![
                contact_form(),
                Step::WaitForWebhook(WaitForWebhookStep {
                    webhook_type: WebhookType::LeadQualification,
                    timeout_ms: 5_000,
                    poll_interval_ms: Some(1_000),
                }),
            ],
        )
        .run()
        .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::Timeout);
        assert_eq!(error.message, "Webhook lead_qualification not received within 5000ms");
    }

    #[tokio::test]
    async fn validation_is_scoped_to_the_clients_chat_session() {
        let data = Arc::new(target_store());
        data.execute_batch(
            "INSERT INTO chat_sessions (session_id) VALUES ('someone_else'), ('someone_else_2')",
        )
        .expect("foreign sessions");
        let outcome = client(
            env(friendly_target(), data),
            vec![Step::ValidateDatabase(ValidateDatabaseStep {
                table: "chat_sessions".to_string(),
                conditions: BTreeMap::new(),
                expected_count: Some(1),
                expected_fields: BTreeMap::new(),
            })],
        )
        .run()
        .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::ValidationError);
        assert_eq!(error.message, "Expected 1 records, found 0");
        assert_eq!(error.expected, Some(json!(1)));
        assert_eq!(error.actual, Some(json!(0)));
    }

    #[tokio::test]
    async fn expected_field_mismatch_names_both_values() {
        let data = Arc::new(target_store());
        data.execute_batch("INSERT INTO orders (id, status) VALUES ('o-9', 'pending')")
            .expect("order");
        let outcome = client(
            env(friendly_target(), data),
            vec![Step::ValidateDatabase(ValidateDatabaseStep {
                table: "orders".to_string(),
                conditions: BTreeMap::new(),
                expected_count: None,
                expected_fields: BTreeMap::from([("status".to_string(), json!("completed"))]),
            })],
        )
        .run()
        .await;
        assert_eq!(
            single_error(&outcome).message,
            "Expected status to be completed, got pending"
        );
    }

    #[tokio::test]
    async fn screenshot_failure_does_not_fail_the_client() {
        let target = Arc::new(ScriptedTarget::new(|request| match request.path.as_str() {
            "/flaky" => status(503, "unavailable"),
            _ => ok("<html></html>"),
        }));
        let data = Arc::new(target_store());
        let mut client = client(
            env(target, data),
            vec![
                Step::Screenshot(ScreenshotStep {
                    name: "before".to_string(),
                    full_page: false,
                }),
                navigate("/"),
            ],
        );
        client.current_path = "/flaky".to_string();
        let outcome = client.run().await;

        assert_eq!(outcome.session.status, ClientStatus::Completed);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.session.step_results[0].outcome, StepOutcome::Failed);
        assert!(outcome.screenshots.is_empty());
    }

    fn api_call(expected_status: Option<u16>, expected_response: BTreeMap<String, Value>) -> Step {
        Step::ApiCall(ApiCallStep {
            endpoint: "/api/admin/outreach/queue".to_string(),
            method: HttpMethod::Get,
            body: None,
            headers: BTreeMap::new(),
            expected_status,
            expected_response,
            description: None,
        })
    }

    #[tokio::test]
    async fn api_call_checks_status_and_response_fields() {
        let target = Arc::new(ScriptedTarget::new(|_| ok(r#"{"count":2,"ok":true}"#)));
        let outcome = client(
            env(target.clone(), Arc::new(target_store())),
            vec![api_call(Some(200), BTreeMap::from([("ok".to_string(), json!(true))]))],
        )
        .run()
        .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed);
        assert_eq!(
            target.seen.lock().expect("seen")[0].bearer.as_deref(),
            Some("admin-token")
        );

        let outcome = client(
            env(Arc::new(ScriptedTarget::new(|_| status(403, "forbidden"))), Arc::new(target_store())),
            vec![api_call(Some(200), BTreeMap::new())],
        )
        .run()
        .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::ApiError);
        assert_eq!(error.message, "Expected status 200, got 403. Response: forbidden");

        let outcome = client(
            env(Arc::new(ScriptedTarget::new(|_| ok(r#"{"count":2}"#))), Arc::new(target_store())),
            vec![api_call(None, BTreeMap::from([("count".to_string(), json!(5))]))],
        )
        .run()
        .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::ValidationError);
        assert_eq!(error.message, "Expected response.count to be 5, got 2");
    }

    fn admin(action: AdminAction) -> Step {
        Step::AdminAction(AdminActionStep {
            action,
            target: None,
            options: None,
            description: None,
        })
    }

    #[tokio::test]
    async fn approve_outreach_patches_the_first_draft() {
        let target = Arc::new(ScriptedTarget::new(|request| match request.method {
            HttpMethod::Get => ok(r#"{"items":[{"id":"draft-7","contact_submission_id":3}]}"#),
            _ => ok(r#"{"updated":1}"#),
        }));
        let outcome = client(
            env(target.clone(), Arc::new(target_store())),
            vec![admin(AdminAction::ApproveOutreach)],
        )
        .run()
        .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed);
        assert_eq!(
            target.paths(),
            vec![
                "GET /api/admin/outreach?status=draft&limit=1",
                "PATCH /api/admin/outreach"
            ]
        );
        let patch = target.seen.lock().expect("seen")[1].body.clone().expect("body");
        assert_eq!(patch, json!({ "action": "approve", "ids": ["draft-7"] }));
    }

    #[tokio::test]
    async fn admin_actions_report_missing_drafts() {
        let target = Arc::new(ScriptedTarget::new(|_| ok(r#"{"items":[]}"#)));
        let outcome = client(
            env(target, Arc::new(target_store())),
            vec![admin(AdminAction::RejectOutreach)],
        )
        .run()
        .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::FlowValidationError);
        assert_eq!(error.message, "No draft found to reject");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_data_times_out_with_table_name() {
        let outcome = client(
            env(friendly_target(), Arc::new(target_store())),
            vec![Step::WaitForData(WaitForDataStep {
                table: "orders".to_string(),
                conditions: BTreeMap::from([(
                    "status".to_string(),
                    FieldCondition::IsNot { not: Value::Null },
                )]),
                timeout_ms: 3_000,
                poll_interval_ms: Some(500),
                expected_count: None,
                description: None,
            })],
        )
        .run()
        .await;
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::Timeout);
        assert_eq!(error.message, "Timeout waiting for data in orders after 3000ms");
    }

    #[tokio::test]
    async fn post_run_validation_failure_fails_the_client() {
        let mut scenario = scenario_with(vec![navigate("/")]);
        scenario.expected_outcomes.data_validation = vec![ValidationRule {
            table: "diagnostic_audits".to_string(),
            field: "status".to_string(),
            condition: RuleCondition::Equals,
            value: Some(json!("completed")),
        }];
        let outcome = client_for(
            env(friendly_target(), Arc::new(target_store())),
            scenario,
            CancellationToken::new(),
        )
        .run()
        .await;

        assert_eq!(outcome.session.status, ClientStatus::Failed);
        assert!(outcome.session.current_step_index < outcome.session.total_steps);
        let error = single_error(&outcome);
        assert_eq!(error.error_type, ErrorType::ValidationError);
        assert_eq!(error.step_type, "validation");
        assert_eq!(error.message, "Expected diagnostic_audits.status to equal completed");
    }

    #[tokio::test]
    async fn cancelled_client_records_no_error_row() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let target = friendly_target();
        let outcome = client_for(
            env(target.clone(), Arc::new(target_store())),
            scenario_with(vec![navigate("/")]),
            cancel,
        )
        .run()
        .await;
        assert_eq!(outcome.session.status, ClientStatus::Cancelled);
        assert!(outcome.errors.is_empty());
        let result = outcome.session.step_results.last().expect("step result");
        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert!(target.paths().is_empty());
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_delay() {
        let cancel = CancellationToken::new();
        let client = client_for(
            env(friendly_target(), Arc::new(target_store())),
            scenario_with(vec![
                Step::Delay(DelayStep {
                    duration_ms: 60_000,
                    randomize: false,
                    description: None,
                }),
                navigate("/"),
            ]),
            cancel.clone(),
        );
        let handle = tokio::spawn(client.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("client unwinds promptly")
            .expect("client task");
        assert_eq!(outcome.session.status, ClientStatus::Cancelled);
        assert_eq!(outcome.session.current_step_index, 0);
    }

    #[tokio::test]
    async fn cleanup_after_removes_created_rows_even_on_failure() {
        let data = Arc::new(target_store());
        let outcome = client(
            env(contact_target(data.clone(), Some(50)), data.clone()),
            vec![contact_form(), navigate("/missing")],
        )
        .with_cleanup(true)
        .run()
        .await;
        assert_eq!(outcome.session.status, ClientStatus::Failed);
        assert_eq!(outcome.cleanup.as_ref().map(|report| report.deleted), Some(1));
        let remaining = data
            .select("contact_submissions", &[], None)
            .await
            .expect("select");
        assert!(remaining.is_empty());
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<LiveActivity>>, Mutex<Vec<CreatedResources>>);

    impl ProgressSink for Recorder {
        fn report(&self, activity: LiveActivity) {
            self.0.lock().expect("recorder").push(activity);
        }

        fn resources(&self, _client_id: &ClientId, resources: &CreatedResources) {
            self.1.lock().expect("recorder").push(resources.clone());
        }
    }

    #[tokio::test]
    async fn created_rows_are_reported_as_soon_as_they_exist() {
        let recorder = Arc::new(Recorder::default());
        let data = Arc::new(target_store());
        let outcome = client(
            env(contact_target(data.clone(), Some(50)), data),
            vec![contact_form(), navigate("/missing")],
        )
        .with_progress(recorder.clone())
        .run()
        .await;
        assert_eq!(outcome.session.status, ClientStatus::Failed);

        let reported = recorder.1.lock().expect("recorder");
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].contact_id, Some(11));
    }

    #[tokio::test]
    async fn progress_reports_every_phase() {
        let recorder = Arc::new(Recorder::default());
        let outcome = client(env(friendly_target(), Arc::new(target_store())), vec![navigate("/")])
            .with_progress(recorder.clone())
            .run()
            .await;
        assert_eq!(outcome.session.status, ClientStatus::Completed);

        let seen = recorder.0.lock().expect("recorder");
        let phases: Vec<_> = seen.iter().map(|a| a.current_step_type.as_str()).collect();
        assert_eq!(phases, vec!["initializing", "navigate", "validating", "complete"]);
        assert_eq!(seen[1].current_step_description, "Navigating to /");
        assert_eq!(seen[3].status, ActivityStatus::Completing);
        let indices: Vec<_> = seen.iter().map(|a| a.current_step_index).collect();
        assert!(indices.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
