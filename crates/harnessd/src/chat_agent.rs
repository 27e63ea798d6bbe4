//! Conversational stand-in for a human visitor.
//!
//! [`ChatAgent`] is stateless: every call receives the persona, the scenario
//! context and the conversation so far, and returns the next visitor message.
//! Provider failures never propagate as errors; they come back as an
//! [`AgentReply`] carrying an [`AgentFailure`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harness_core::config::{LlmConfig, LlmProvider};
use harness_core::persona::{CommunicationStyle, DiagnosticCategory, Persona};
use harness_core::scenario::Scenario;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

pub const OPENAI_API_BASE: &str = "https://api.openai.com";
pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const MAX_TURNS_MESSAGE: &str =
    "Thank you for the information. I'll think about it and get back to you.";

// ---------------------------------------------------------------------------
// Provider abstraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The target site's assistant.
    Assistant,
    /// The simulated visitor.
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Assistant => "assistant",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatTurn>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Canned-reply selector for the mock backend; real providers ignore it.
    pub style: Option<CommunicationStyle>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("{provider} is not configured: {reason}")]
    NotConfigured {
        provider: &'static str,
        reason: String,
    },
    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} API error: {status} {body}")]
    Rejected {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} returned a malformed response: {message}")]
    Malformed {
        provider: &'static str,
        message: String,
    },
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether completions are canned rather than model generated.
    fn is_mock(&self) -> bool {
        false
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

/// Deterministic template backend; never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockLlm;

fn mock_responses(style: CommunicationStyle) -> &'static [&'static str] {
    match style {
        CommunicationStyle::Brief => &[
            "Interesting. Tell me more.",
            "That sounds good.",
            "What's the next step?",
            "I understand.",
        ],
        CommunicationStyle::Detailed => &[
            "That's very helpful information. I'd like to understand more about how this would work specifically for our situation.",
            "I appreciate the detail. Can you elaborate on the implementation process and what kind of support we'd receive?",
            "This aligns well with what we're looking for. What would be the typical timeline for getting started?",
        ],
        CommunicationStyle::Questioning => &[
            "How does that compare to other solutions on the market?",
            "What kind of results have similar companies seen?",
            "What happens if we need to make changes later?",
            "Can you walk me through a specific example?",
        ],
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_mock(&self) -> bool {
        true
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let responses = mock_responses(request.style.unwrap_or(CommunicationStyle::Brief));
        let turn = request
            .messages
            .iter()
            .filter(|turn| turn.role == Role::User)
            .count();
        Ok(responses[turn % responses.len()].to_string())
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn post_json(
    provider: &'static str,
    request: reqwest::RequestBuilder,
    body: &Value,
) -> Result<Value, LlmError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|err| LlmError::Transport {
            provider,
            message: err.to_string(),
        })?;
    let status = response.status();
    let text = response.text().await.map_err(|err| LlmError::Transport {
        provider,
        message: err.to_string(),
    })?;
    if !status.is_success() {
        return Err(LlmError::Rejected {
            provider,
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|err| LlmError::Malformed {
        provider,
        message: err.to_string(),
    })
}

fn text_at(value: &Value, pointer: &str, provider: &'static str) -> Result<String, LlmError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::Malformed {
            provider,
            message: format!("missing {pointer}"),
        })
}

#[derive(Debug, Clone)]
pub struct OpenAiLlm {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl OpenAiLlm {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiLlm {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let key = self.api_key.as_deref().ok_or_else(|| LlmError::NotConfigured {
            provider: "openai",
            reason: "API key not set".to_string(),
        })?;
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(
            request
                .messages
                .iter()
                .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content })),
        );
        let body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let response = post_json(
            "openai",
            self.client
                .post(format!("{}/v1/chat/completions", self.api_base))
                .bearer_auth(key),
            &body,
        )
        .await?;
        text_at(&response, "/choices/0/message/content", "openai")
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicLlm {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl AnthropicLlm {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmBackend for AnthropicLlm {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let key = self.api_key.as_deref().ok_or_else(|| LlmError::NotConfigured {
            provider: "anthropic",
            reason: "API key not set".to_string(),
        })?;
        let mut messages: Vec<Value> = request
            .messages
            .iter()
            .map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content }))
            .collect();
        // The messages API requires the conversation to open with a user turn.
        if messages.is_empty() {
            messages.push(json!({ "role": "user", "content": "Begin." }));
        }
        let body = json!({
            "model": request.model,
            "system": request.system,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        let response = post_json(
            "anthropic",
            self.client
                .post(format!("{}/v1/messages", self.api_base))
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            &body,
        )
        .await?;
        text_at(&response, "/content/0/text", "anthropic")
    }
}

/// Backend selected by `[llm] provider`, reading the API key from the environment.
pub fn backend_from_config(config: &LlmConfig) -> Arc<dyn LlmBackend> {
    let timeout = Duration::from_millis(config.timeout_ms);
    let key = std::env::var(config.api_key_env_name())
        .ok()
        .filter(|key| !key.trim().is_empty());
    match config.provider {
        LlmProvider::Mock => Arc::new(MockLlm),
        LlmProvider::Openai => Arc::new(OpenAiLlm::new(OPENAI_API_BASE, key, timeout)),
        LlmProvider::Anthropic => Arc::new(AnthropicLlm::new(ANTHROPIC_API_BASE, key, timeout)),
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

pub fn client_system_prompt(persona: &Persona, scenario: &Scenario) -> String {
    let pain_points = persona
        .pain_points
        .iter()
        .map(|point| format!("- {point}"))
        .collect::<Vec<_>>()
        .join("\n");
    let interests = persona
        .interest_areas
        .iter()
        .map(|area| area.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let objections = persona
        .common_objections
        .iter()
        .map(|objection| format!("- \"{objection}\""))
        .collect::<Vec<_>>()
        .join("\n");
    let stance = if persona.is_skeptical() {
        "You are skeptical and will raise objections frequently"
    } else {
        "You are generally receptive but may occasionally have concerns"
    };
    let style = persona.communication_style.as_str();

    format!(
        "You are simulating a potential client visiting a portfolio/consulting website for automated end-to-end testing.

## Your Persona
- **Name**: {name}
- **Company**: {company}
- **Role**: {role}
- **Budget**: {budget}
- **Urgency**: {urgency}
- **Decision Timeline**: {timeline}
- **Tech Savviness**: {savvy}/10
- **Communication Style**: {style}

## Pain Points
{pain_points}

## Interest Areas
{interests}

## Current Scenario
**{scenario_name}**: {scenario_description}

## Guidelines
1. Stay in character based on your persona at all times
2. Ask questions a real client would ask
3. Be {style} in your responses
4. {stance}
5. Your responses should feel natural and human-like
6. Do NOT break character or mention that you are an AI or a test
7. Keep responses concise (1-3 sentences typically)

## Common Objections You Might Raise
{objections}

Respond naturally as this client would. Remember: you are testing the website's chat system, so interact as a real potential customer would.",
        name = persona.name,
        company = persona.company,
        role = persona.role.as_str(),
        budget = persona.budget.as_str(),
        urgency = persona.urgency.as_str(),
        timeline = persona.decision_timeline.as_str(),
        savvy = persona.tech_savvy,
        scenario_name = scenario.name,
        scenario_description = scenario.description,
    )
}

pub fn diagnostic_system_prompt(persona: &Persona) -> String {
    let mut out = String::from(
        "You are in a business diagnostic/audit mode. The AI assistant will ask you questions about your business challenges, tech stack, automation needs, AI readiness, budget, and decision-making process.\n\n## Your Pre-Defined Answers\n",
    );
    for category in DiagnosticCategory::ALL {
        let answers = persona
            .diagnostic_answer(category)
            .cloned()
            .unwrap_or_else(|| json!({}));
        let pretty = serde_json::to_string_pretty(&answers).unwrap_or_else(|_| "{}".to_string());
        out.push_str(&format!("\n### {}\n{pretty}\n", category.title()));
    }
    out.push_str(
        "\n## Guidelines
1. Answer questions based on the pre-defined data above
2. Paraphrase and speak naturally - don't just dump JSON
3. You can elaborate or add color commentary that fits your persona
4. Stay consistent with the data provided
5. If asked something not covered above, improvise in a way that's consistent with your persona
6. Keep responses conversational and realistic",
    );
    out
}

/// Candidate opening lines for a chat intent; unknown intents greet.
pub fn opening_messages(persona: &Persona, intent: &str) -> Vec<String> {
    let first_pain = persona
        .pain_points
        .first()
        .map(|point| point.to_lowercase())
        .unwrap_or_else(|| "some business challenges".to_string());
    let first_interest = persona
        .interest_areas
        .first()
        .map(|area| area.as_str().replacen('_', " ", 1))
        .unwrap_or_else(|| "automation".to_string());
    let all_interests = persona
        .interest_areas
        .iter()
        .map(|area| area.as_str())
        .collect::<Vec<_>>()
        .join(" and ")
        .replace('_', " ");

    match intent {
        "inquiry" => vec![
            format!("I'm looking for help with {first_pain}."),
            format!("We're exploring solutions for {first_interest}."),
            format!("I heard you might be able to help with {all_interests}."),
        ],
        "trigger_diagnostic" => vec![
            "I'd like to perform an AI audit of my business.".to_string(),
            "Can you help me identify areas where we could improve?".to_string(),
            "I'm interested in getting a diagnostic assessment.".to_string(),
        ],
        "urgent_help" => vec![
            "I need urgent help with a critical issue.".to_string(),
            "We have an urgent situation and need assistance ASAP.".to_string(),
        ],
        "complex_question" => vec![
            "We have a complex integration requirement. Can I speak to someone about enterprise implementations?"
                .to_string(),
        ],
        _ => vec![
            format!("Hi there! I'm {} from {}.", persona.name, persona.company),
            "Hello! I've been looking at your portfolio.".to_string(),
            "Hi, I found your website and I'm interested in learning more.".to_string(),
        ],
    }
}

fn string_list(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn text_or<'a>(data: &'a Value, key: &str, fallback: &'a str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or(fallback)
}

/// Renders a persona's structured diagnostic answer as a spoken reply.
pub fn structured_to_natural(category: DiagnosticCategory, data: &Value) -> String {
    match category {
        DiagnosticCategory::BusinessChallenges => format!(
            "Our main challenges are {}. {}",
            string_list(data, "primary_challenges").join(", "),
            text_or(data, "current_impact", "significant impact")
        ),
        DiagnosticCategory::TechStack => format!(
            "We use {} for our CRM, along with {}.",
            text_or(data, "crm", "no CRM"),
            string_list(data, "other_tools").join(", ")
        ),
        DiagnosticCategory::AutomationNeeds => {
            let outcomes = string_list(data, "desired_outcomes");
            format!(
                "Our priorities are {}. We'd like to {}.",
                string_list(data, "priority_areas").join(", "),
                outcomes
                    .first()
                    .map(String::as_str)
                    .unwrap_or("improve efficiency")
            )
        }
        DiagnosticCategory::AiReadiness => format!(
            "Our data quality is {}. The team is {}.",
            text_or(data, "data_quality", "mixed"),
            text_or(data, "team_readiness", "cautiously optimistic")
        ),
        DiagnosticCategory::BudgetTimeline => format!(
            "Our budget is {} and timeline is {}.",
            text_or(data, "budget_range", "flexible"),
            text_or(data, "timeline", "open")
        ),
        DiagnosticCategory::DecisionMaking => {
            let maker = if data
                .get("decision_maker")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                "I am the decision maker"
            } else {
                "I need to consult with others"
            };
            format!(
                "{maker}. Key stakeholders include {}.",
                string_list(data, "stakeholders").join(", ")
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Visitor turns after which the agent politely ends the conversation.
    pub max_turns: usize,
    pub timeout: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_turns: config.max_turns,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// What the current turn is for.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioContext<'a> {
    pub scenario: &'a Scenario,
    pub intent: Option<&'a str>,
    /// Set while answering a diagnostic category.
    pub diagnostic_category: Option<DiagnosticCategory>,
}

impl<'a> ScenarioContext<'a> {
    pub fn chat(scenario: &'a Scenario, intent: &'a str) -> Self {
        Self {
            scenario,
            intent: Some(intent),
            diagnostic_category: None,
        }
    }

    pub fn diagnostic(scenario: &'a Scenario, category: DiagnosticCategory) -> Self {
        Self {
            scenario,
            intent: None,
            diagnostic_category: Some(category),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailureKind {
    Timeout,
    Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub kind: AgentFailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub content: String,
    pub should_escalate: bool,
    /// False once the agent wants the conversation to end.
    pub should_continue: bool,
    pub metadata: Value,
    pub failure: Option<AgentFailure>,
}

impl AgentReply {
    fn message(content: String, should_escalate: bool, should_continue: bool, metadata: Value) -> Self {
        Self {
            content,
            should_escalate,
            should_continue,
            metadata,
            failure: None,
        }
    }

    /// The `agent_failure` sentinel.
    pub fn failure(kind: AgentFailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: String::new(),
            should_escalate: false,
            should_continue: false,
            metadata: json!({ "agent_failure": true, "reason": message }),
            failure: Some(AgentFailure { kind, message }),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

fn wants_escalation(intent: Option<&str>) -> bool {
    matches!(intent, Some("urgent_help" | "complex_question"))
}

#[derive(Clone)]
pub struct ChatAgent {
    backend: Arc<dyn LlmBackend>,
    settings: AgentSettings,
}

impl ChatAgent {
    pub fn new(backend: Arc<dyn LlmBackend>, settings: AgentSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Next visitor message given the conversation so far.
    ///
    /// An empty history yields an opening line for the intent without a
    /// provider call.
    pub async fn next_message(
        &self,
        persona: &Persona,
        context: &ScenarioContext<'_>,
        history: &[ChatTurn],
    ) -> AgentReply {
        let escalate = wants_escalation(context.intent);
        if history.is_empty() && context.diagnostic_category.is_none() {
            let intent = context.intent.unwrap_or("greeting");
            let content = opening_message(persona, intent);
            return AgentReply::message(content, escalate, true, json!({ "opening": true, "intent": intent }));
        }

        let user_turns = history.iter().filter(|turn| turn.role == Role::User).count();
        if user_turns >= self.settings.max_turns {
            return AgentReply::message(
                MAX_TURNS_MESSAGE.to_string(),
                false,
                false,
                json!({ "reason": "max_turns_reached" }),
            );
        }

        let mut system = match context.diagnostic_category {
            Some(_) => diagnostic_system_prompt(persona),
            None => client_system_prompt(persona, context.scenario),
        };
        if let Some(intent) = context.intent {
            system.push_str(&format!(
                "\n\n[Context: The user's intent is \"{intent}\". Respond accordingly.]"
            ));
        }
        if let Some(category) = context.diagnostic_category {
            system.push_str(&format!(
                "\n\n[Context: The assistant is asking about {}.]",
                category.title()
            ));
        }
        let request = LlmRequest {
            model: self.settings.model.clone(),
            system,
            messages: history.to_vec(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            style: Some(persona.communication_style),
        };

        let call = self.backend.complete(&request);
        match tokio::time::timeout(self.settings.timeout, call).await {
            Err(_) => {
                warn!(
                    provider = self.backend.name(),
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "chat agent timed out"
                );
                AgentReply::failure(
                    AgentFailureKind::Timeout,
                    format!(
                        "{} did not respond within {}ms",
                        self.backend.name(),
                        self.settings.timeout.as_millis()
                    ),
                )
            }
            Ok(Err(err)) => {
                warn!(provider = self.backend.name(), error = %err, "chat agent call failed");
                AgentReply::failure(AgentFailureKind::Provider, err.to_string())
            }
            Ok(Ok(content)) if content.trim().is_empty() => AgentReply::failure(
                AgentFailureKind::Provider,
                format!("{} returned an empty message", self.backend.name()),
            ),
            Ok(Ok(content)) => AgentReply::message(
                content.trim().to_string(),
                escalate,
                user_turns + 1 < self.settings.max_turns,
                json!({ "provider": self.backend.name(), "mock": self.backend.is_mock() }),
            ),
        }
    }

    /// Answer for one diagnostic category, from the persona's preset data
    /// when allowed and present, otherwise from the provider.
    pub async fn diagnostic_reply(
        &self,
        persona: &Persona,
        scenario: &Scenario,
        category: DiagnosticCategory,
        history: &[ChatTurn],
        use_persona_responses: bool,
    ) -> AgentReply {
        if use_persona_responses {
            if let Some(data) = persona.diagnostic_answer(category) {
                return AgentReply::message(
                    structured_to_natural(category, data),
                    false,
                    true,
                    json!({ "category": category.as_str(), "used_preset_data": true }),
                );
            }
        }
        let mut history = history.to_vec();
        history.push(ChatTurn::assistant(format!(
            "Tell me about your {}",
            category.as_str().replacen('_', " ", 1)
        )));
        let context = ScenarioContext::diagnostic(scenario, category);
        self.next_message(persona, &context, &history).await
    }
}

pub fn opening_message(persona: &Persona, intent: &str) -> String {
    let options = opening_messages(persona, intent);
    options
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_else(|| format!("Hi there! I'm {}.", persona.name))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{AgentSettings, ChatAgent, LlmBackend, LlmError, LlmRequest, MockLlm};

    pub(crate) fn settings(timeout: Duration) -> AgentSettings {
        AgentSettings {
            model: "test-model".to_string(),
            temperature: 0.7,
            max_tokens: 200,
            max_turns: 20,
            timeout,
        }
    }

    pub(crate) fn mock_agent() -> ChatAgent {
        ChatAgent::new(Arc::new(MockLlm), settings(Duration::from_secs(5)))
    }

    /// Backend that sleeps before answering.
    pub(crate) struct SlowLlm(pub(crate) Duration);

    #[async_trait]
    impl LlmBackend for SlowLlm {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
            tokio::time::sleep(self.0).await;
            Ok("eventually".to_string())
        }
    }

    /// Backend that always errors and counts its calls.
    #[derive(Default)]
    pub(crate) struct FailingLlm {
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmBackend for FailingLlm {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Rejected {
                provider: "openai",
                status: 500,
                body: "upstream down".to_string(),
            })
        }
    }

    /// Backend returning a fixed completion.
    pub(crate) struct FixedLlm(pub(crate) String);

    #[async_trait]
    impl LlmBackend for FixedLlm {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use harness_core::persona::{persona, CommunicationStyle, DiagnosticCategory};
    use harness_core::scenario::scenario;
    use serde_json::{json, Value};

    use super::fixtures::{mock_agent, settings, FailingLlm, SlowLlm};
    use super::{
        client_system_prompt, diagnostic_system_prompt, opening_messages, structured_to_natural,
        AgentFailureKind, AnthropicLlm, ChatAgent, ChatTurn, LlmBackend, LlmError, LlmRequest,
        MockLlm, OpenAiLlm, ScenarioContext,
    };

    fn sarah() -> &'static harness_core::persona::Persona {
        persona("startup_sarah").expect("catalog persona")
    }

    fn chat_scenario() -> &'static harness_core::scenario::Scenario {
        scenario("chat_to_diagnostic").expect("catalog scenario")
    }

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}")
    }

    fn request(messages: Vec<ChatTurn>) -> LlmRequest {
        LlmRequest {
            model: "gpt-4o-mini".to_string(),
            system: "be a client".to_string(),
            messages,
            temperature: 0.7,
            max_tokens: 200,
            style: Some(CommunicationStyle::Brief),
        }
    }

    #[test]
    fn client_prompt_reflects_persona_and_scenario() {
        let prompt = client_system_prompt(sarah(), chat_scenario());
        assert!(prompt.contains("- **Name**: Sarah Mitchell"));
        assert!(prompt.contains("- **Tech Savviness**: 7/10"));
        assert!(prompt.contains("**Chat to Diagnostic**"));
        assert!(prompt.contains("generally receptive"));
        assert!(prompt.contains("- \"How quickly can this be implemented?\""));
    }

    #[test]
    fn skeptical_persona_raises_objections() {
        let sam = persona("skeptical_sam").expect("catalog persona");
        assert!(client_system_prompt(sam, chat_scenario()).contains("You are skeptical"));
    }

    #[test]
    fn diagnostic_prompt_lists_every_category() {
        let prompt = diagnostic_system_prompt(sarah());
        for category in DiagnosticCategory::ALL {
            assert!(prompt.contains(&format!("### {}", category.title())));
        }
        assert!(prompt.contains("Estimated $200K in lost revenue"));
    }

    #[test]
    fn openings_cover_intents_and_fall_back_to_greeting() {
        let persona = sarah();
        assert_eq!(opening_messages(persona, "greeting").len(), 3);
        assert_eq!(opening_messages(persona, "inquiry").len(), 3);
        assert_eq!(opening_messages(persona, "trigger_diagnostic").len(), 3);
        assert_eq!(opening_messages(persona, "urgent_help").len(), 2);
        assert_eq!(opening_messages(persona, "complex_question").len(), 1);
        assert_eq!(
            opening_messages(persona, "something_else"),
            opening_messages(persona, "greeting")
        );
        assert!(opening_messages(persona, "inquiry")[0]
            .contains("manual lead follow-up taking too long"));
    }

    #[test]
    fn structured_answers_render_naturally() {
        let rendered = structured_to_natural(
            DiagnosticCategory::DecisionMaking,
            &json!({ "decision_maker": true, "stakeholders": ["CFO", "Head of Sales"] }),
        );
        assert_eq!(
            rendered,
            "I am the decision maker. Key stakeholders include CFO, Head of Sales."
        );
        let fallback = structured_to_natural(DiagnosticCategory::BudgetTimeline, &json!({}));
        assert_eq!(fallback, "Our budget is flexible and timeline is open.");
    }

    #[tokio::test]
    async fn mock_backend_is_deterministic_per_turn() {
        let first = MockLlm.complete(&request(vec![])).await.expect("mock");
        let again = MockLlm.complete(&request(vec![])).await.expect("mock");
        assert_eq!(first, again);
        assert_eq!(first, "Interesting. Tell me more.");

        let later = MockLlm
            .complete(&request(vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")]))
            .await
            .expect("mock");
        assert_eq!(later, "That sounds good.");
    }

    #[tokio::test]
    async fn empty_history_opens_without_provider_call() {
        let failing = Arc::new(FailingLlm::default());
        let agent = ChatAgent::new(failing.clone(), settings(Duration::from_secs(1)));
        let context = ScenarioContext::chat(chat_scenario(), "trigger_diagnostic");

        let reply = agent.next_message(sarah(), &context, &[]).await;
        assert!(!reply.is_failure());
        assert!(opening_messages(sarah(), "trigger_diagnostic").contains(&reply.content));
        assert_eq!(failing.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_error_becomes_failure_sentinel() {
        let agent = ChatAgent::new(Arc::new(FailingLlm::default()), settings(Duration::from_secs(1)));
        let context = ScenarioContext::chat(chat_scenario(), "greeting");
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("Welcome!")];

        let reply = agent.next_message(sarah(), &context, &history).await;
        let failure = reply.failure.expect("failure sentinel");
        assert_eq!(failure.kind, AgentFailureKind::Provider);
        assert!(failure.message.contains("upstream down"));
        assert_eq!(reply.metadata["agent_failure"], json!(true));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let agent = ChatAgent::new(
            Arc::new(SlowLlm(Duration::from_millis(500))),
            settings(Duration::from_millis(20)),
        );
        let context = ScenarioContext::chat(chat_scenario(), "greeting");
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("Welcome!")];

        let reply = agent.next_message(sarah(), &context, &history).await;
        assert_eq!(
            reply.failure.map(|failure| failure.kind),
            Some(AgentFailureKind::Timeout)
        );
    }

    #[tokio::test]
    async fn max_turns_ends_the_conversation() {
        let mut agent_settings = settings(Duration::from_secs(1));
        agent_settings.max_turns = 1;
        let agent = ChatAgent::new(Arc::new(MockLlm), agent_settings);
        let context = ScenarioContext::chat(chat_scenario(), "greeting");
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("Welcome!")];

        let reply = agent.next_message(sarah(), &context, &history).await;
        assert!(!reply.should_continue);
        assert_eq!(reply.metadata["reason"], "max_turns_reached");
    }

    #[tokio::test]
    async fn diagnostic_reply_prefers_preset_answers() {
        let agent = mock_agent();
        let reply = agent
            .diagnostic_reply(
                sarah(),
                chat_scenario(),
                DiagnosticCategory::BusinessChallenges,
                &[],
                true,
            )
            .await;
        assert!(reply.content.starts_with("Our main challenges are Manual lead follow-up"));
        assert_eq!(reply.metadata["used_preset_data"], json!(true));

        let mut blank = sarah().clone();
        blank.diagnostic_responses.clear();
        let improvised = agent
            .diagnostic_reply(&blank, chat_scenario(), DiagnosticCategory::TechStack, &[], true)
            .await;
        assert!(!improvised.is_failure());
        assert!(!improvised.content.is_empty());
    }

    #[tokio::test]
    async fn openai_backend_sends_chat_completion_request() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers.get("authorization").and_then(|v| v.to_str().ok()),
                    Some("Bearer sk-test")
                );
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["max_tokens"], 200);
                Json(json!({ "choices": [{ "message": { "content": "Sounds great." } }] }))
            }),
        );
        let base = spawn(router).await;
        let backend = OpenAiLlm::new(base, Some("sk-test".to_string()), Duration::from_secs(5));

        let reply = backend
            .complete(&request(vec![ChatTurn::assistant("Hi, how can I help?")]))
            .await
            .expect("completion");
        assert_eq!(reply, "Sounds great.");
    }

    #[tokio::test]
    async fn anthropic_backend_sends_version_header_and_system_field() {
        let router = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers.get("anthropic-version").and_then(|v| v.to_str().ok()),
                    Some("2023-06-01")
                );
                assert_eq!(body["system"], "be a client");
                assert_eq!(body["messages"][0]["role"], "user");
                Json(json!({ "content": [{ "type": "text", "text": "Tell me more." }] }))
            }),
        );
        let base = spawn(router).await;
        let backend = AnthropicLlm::new(base, Some("key".to_string()), Duration::from_secs(5));

        let reply = backend.complete(&request(vec![])).await.expect("completion");
        assert_eq!(reply, "Tell me more.");
    }

    #[tokio::test]
    async fn missing_api_key_is_not_configured() {
        let backend = OpenAiLlm::new("http://127.0.0.1:9", None, Duration::from_secs(1));
        let err = backend.complete(&request(vec![])).await.expect_err("no key");
        assert!(matches!(err, LlmError::NotConfigured { provider: "openai", .. }));
    }
}
