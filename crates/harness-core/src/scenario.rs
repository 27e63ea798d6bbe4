//! Scenario catalog: ordered step sequences modelling one user journey each.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::persona::DiagnosticCategory;
use crate::types::ScenarioSelection;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown scenario '{id}'")]
    UnknownScenario { id: String },
    #[error("unknown persona '{id}'")]
    UnknownPersona { id: String },
    #[error("unknown scenario preset '{name}'. valid values: {}", PRESETS.join(", "))]
    UnknownPreset { name: String },
    #[error("scenario selection resolved to no scenarios")]
    EmptySelection,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Discriminant of a [`Step`], used for descriptions, skip keys and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Navigate,
    Browse,
    Chat,
    Diagnostic,
    AddToCart,
    Checkout,
    ContactForm,
    WaitForWebhook,
    ValidateDatabase,
    Screenshot,
    Delay,
    ApiCall,
    AdminAction,
    WaitForData,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Navigate => "navigate",
            StepKind::Browse => "browse",
            StepKind::Chat => "chat",
            StepKind::Diagnostic => "diagnostic",
            StepKind::AddToCart => "add_to_cart",
            StepKind::Checkout => "checkout",
            StepKind::ContactForm => "contact_form",
            StepKind::WaitForWebhook => "wait_for_webhook",
            StepKind::ValidateDatabase => "validate_database",
            StepKind::Screenshot => "screenshot",
            StepKind::Delay => "delay",
            StepKind::ApiCall => "api_call",
            StepKind::AdminAction => "admin_action",
            StepKind::WaitForData => "wait_for_data",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    Scroll,
    Hover,
    Click,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigateStep {
    pub path: String,
    #[serde(default)]
    pub wait_for_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseStep {
    pub section: String,
    /// Dwell time on the section.
    pub duration_ms: u64,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStep {
    /// Goal of this turn, e.g. `greeting` or `trigger_diagnostic`.
    pub intent: String,
    /// Fixed message; generated by the chat agent when absent.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expected_response_contains: Vec<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticStep {
    pub complete_all_categories: bool,
    #[serde(default)]
    pub skip_categories: Vec<DiagnosticCategory>,
    #[serde(default)]
    pub use_persona_responses: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddToCartStep {
    #[serde(default)]
    pub product_id: Option<String>,
    /// Picks any active product of this type when `product_id` is absent.
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    StripeTest,
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub company: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutStep {
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub use_persona_contact: bool,
    #[serde(default)]
    pub custom_contact: Option<ContactDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactFormStep {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub use_persona_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookType {
    LeadQualification,
    DiagnosticCompletion,
    OrderCreated,
    StripePayment,
}

impl WebhookType {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookType::LeadQualification => "lead_qualification",
            WebhookType::DiagnosticCompletion => "diagnostic_completion",
            WebhookType::OrderCreated => "order_created",
            WebhookType::StripePayment => "stripe_payment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForWebhookStep {
    pub webhook_type: WebhookType,
    pub timeout_ms: u64,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

/// Predicate on one column of a target-system row.
///
/// Written either as a bare value (equality) or as `{ "not": value }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldCondition {
    IsNot { not: Value },
    Equals(Value),
}

impl FieldCondition {
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            FieldCondition::Equals(expected) => values_equal(expected, actual),
            FieldCondition::IsNot { not } => !values_equal(not, actual),
        }
    }
}

/// Equality that treats SQL-style integer booleans as booleans.
pub fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Bool(b), Value::Number(n)) | (Value::Number(n), Value::Bool(b)) => {
            n.as_i64() == Some(i64::from(*b))
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => expected == actual,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateDatabaseStep {
    pub table: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, FieldCondition>,
    #[serde(default)]
    pub expected_count: Option<usize>,
    #[serde(default)]
    pub expected_fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotStep {
    pub name: String,
    #[serde(default)]
    pub full_page: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayStep {
    pub duration_ms: u64,
    /// Applies +/-20% jitter.
    #[serde(default)]
    pub randomize: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallStep {
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub expected_status: Option<u16>,
    /// Top-level fields the JSON response must carry.
    #[serde(default)]
    pub expected_response: BTreeMap<String, Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    ApproveOutreach,
    RejectOutreach,
    SendOutreach,
    TriggerScraping,
}

impl AdminAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminAction::ApproveOutreach => "approve_outreach",
            AdminAction::RejectOutreach => "reject_outreach",
            AdminAction::SendOutreach => "send_outreach",
            AdminAction::TriggerScraping => "trigger_scraping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminActionStep {
    pub action: AdminAction,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub options: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitForDataStep {
    pub table: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, FieldCondition>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub expected_count: Option<usize>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Navigate(NavigateStep),
    Browse(BrowseStep),
    Chat(ChatStep),
    Diagnostic(DiagnosticStep),
    AddToCart(AddToCartStep),
    Checkout(CheckoutStep),
    ContactForm(ContactFormStep),
    WaitForWebhook(WaitForWebhookStep),
    ValidateDatabase(ValidateDatabaseStep),
    Screenshot(ScreenshotStep),
    Delay(DelayStep),
    ApiCall(ApiCallStep),
    AdminAction(AdminActionStep),
    WaitForData(WaitForDataStep),
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Navigate(_) => StepKind::Navigate,
            Step::Browse(_) => StepKind::Browse,
            Step::Chat(_) => StepKind::Chat,
            Step::Diagnostic(_) => StepKind::Diagnostic,
            Step::AddToCart(_) => StepKind::AddToCart,
            Step::Checkout(_) => StepKind::Checkout,
            Step::ContactForm(_) => StepKind::ContactForm,
            Step::WaitForWebhook(_) => StepKind::WaitForWebhook,
            Step::ValidateDatabase(_) => StepKind::ValidateDatabase,
            Step::Screenshot(_) => StepKind::Screenshot,
            Step::Delay(_) => StepKind::Delay,
            Step::ApiCall(_) => StepKind::ApiCall,
            Step::AdminAction(_) => StepKind::AdminAction,
            Step::WaitForData(_) => StepKind::WaitForData,
        }
    }

    /// Human-readable label shown in the live-activity view.
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate(step) => format!("Navigating to {}", step.path),
            Step::Browse(step) => format!("Browsing {}", step.section),
            Step::Chat(step) => format!("Chatting - {}", step.intent),
            Step::Diagnostic(_) => "Completing diagnostic assessment".to_string(),
            Step::AddToCart(_) => "Adding item to cart".to_string(),
            Step::Checkout(_) => "Processing checkout".to_string(),
            Step::ContactForm(_) => "Submitting contact form".to_string(),
            Step::WaitForWebhook(step) => {
                format!("Waiting for {} webhook", step.webhook_type.as_str())
            }
            Step::ValidateDatabase(step) => format!("Validating {} records", step.table),
            Step::Screenshot(step) => format!("Taking screenshot {}", step.name),
            Step::Delay(step) => step
                .description
                .clone()
                .unwrap_or_else(|| "Waiting...".to_string()),
            Step::ApiCall(step) => step
                .description
                .clone()
                .unwrap_or_else(|| format!("API: {} {}", step.method.as_str(), step.endpoint)),
            Step::AdminAction(step) => step
                .description
                .clone()
                .unwrap_or_else(|| format!("Admin action: {}", step.action.as_str())),
            Step::WaitForData(step) => step
                .description
                .clone()
                .unwrap_or_else(|| format!("Waiting for data in {}", step.table)),
        }
    }

    /// Most specific skip-probability key, e.g. `browse:projects`.
    pub fn skip_key(&self) -> String {
        match self {
            Step::Browse(step) => format!("browse:{}", step.section),
            other => other.kind().as_str().to_string(),
        }
    }

    /// Serializable snapshot of the step's configuration.
    pub fn config_snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "type": self.kind().as_str() }))
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStage {
    Prospect,
    Lead,
    Client,
}

impl JourneyStage {
    pub fn as_str(self) -> &'static str {
        match self {
            JourneyStage::Prospect => "prospect",
            JourneyStage::Lead => "lead",
            JourneyStage::Client => "client",
        }
    }
}

impl std::str::FromStr for JourneyStage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "prospect" => Ok(JourneyStage::Prospect),
            "lead" => Ok(JourneyStage::Lead),
            "client" => Ok(JourneyStage::Client),
            other => Err(format!(
                "invalid journey stage '{other}'. valid values: prospect, lead, client"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variability {
    /// Skip chance keyed by step kind or `kind:section`.
    #[serde(default)]
    pub skip_probability: BTreeMap<String, f64>,
    /// Inclusive-exclusive bounds of the pause between steps.
    pub delay_range_ms: (u64, u64),
    #[serde(default)]
    pub response_variation: bool,
}

impl Variability {
    pub fn skip_probability_for(&self, step: &Step) -> f64 {
        self.skip_probability
            .get(&step.skip_key())
            .or_else(|| self.skip_probability.get(step.kind().as_str()))
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    Exists,
    Equals,
}

/// Post-run assertion on a target-system table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub table: String,
    pub field: String,
    pub condition: RuleCondition,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcomes {
    /// Kinds that must have at least one successful step.
    #[serde(default)]
    pub must_complete: Vec<StepKind>,
    #[serde(default)]
    pub data_validation: Vec<ValidationRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub journey_stage: JourneyStage,
    pub steps: Vec<Step>,
    pub variability: Variability,
    #[serde(default)]
    pub expected_outcomes: ExpectedOutcomes,
    /// Scheduling heuristic only.
    pub estimated_duration_ms: u64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Scenario {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

pub const PRESETS: [&str; 5] = ["all", "critical", "smoke", "chat", "ecommerce"];

pub fn all_scenarios() -> &'static [Scenario] {
    static SCENARIOS: OnceLock<Vec<Scenario>> = OnceLock::new();
    SCENARIOS.get_or_init(|| {
        vec![
            browse_and_buy(),
            chat_to_diagnostic(),
            service_inquiry(),
            full_funnel(),
            abandoned_cart(),
            support_escalation(),
            quick_browse(),
        ]
    })
}

pub fn scenario(id: &str) -> Option<&'static Scenario> {
    all_scenarios().iter().find(|scenario| scenario.id == id)
}

fn preset_ids(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "critical" => Some(&["browse_and_buy", "chat_to_diagnostic", "full_funnel"]),
        "smoke" => Some(&["quick_browse"]),
        "chat" => Some(&["chat_to_diagnostic", "full_funnel", "support_escalation"]),
        "ecommerce" => Some(&["browse_and_buy", "abandoned_cart"]),
        _ => None,
    }
}

pub fn preset(name: &str) -> Result<Vec<&'static Scenario>, CatalogError> {
    if name == "all" {
        return Ok(all_scenarios().iter().collect());
    }
    let ids = preset_ids(name).ok_or_else(|| CatalogError::UnknownPreset {
        name: name.to_string(),
    })?;
    Ok(ids.iter().filter_map(|id| scenario(id)).collect())
}

pub fn resolve_selection(
    selection: &ScenarioSelection,
) -> Result<Vec<&'static Scenario>, CatalogError> {
    let resolved = match selection {
        ScenarioSelection::All => all_scenarios().iter().collect(),
        ScenarioSelection::Preset(name) => preset(name)?,
        ScenarioSelection::Ids(ids) => ids
            .iter()
            .map(|id| scenario(id).ok_or_else(|| CatalogError::UnknownScenario { id: id.clone() }))
            .collect::<Result<Vec<_>, _>>()?,
    };
    if resolved.is_empty() {
        return Err(CatalogError::EmptySelection);
    }
    Ok(resolved)
}

pub fn scenarios_by_tag(tag: &str) -> Vec<&'static Scenario> {
    all_scenarios()
        .iter()
        .filter(|scenario| scenario.has_tag(tag))
        .collect()
}

pub fn scenarios_by_stage(stage: JourneyStage) -> Vec<&'static Scenario> {
    all_scenarios()
        .iter()
        .filter(|scenario| scenario.journey_stage == stage)
        .collect()
}

pub fn estimate_total_duration(scenarios: &[&Scenario]) -> u64 {
    scenarios.iter().map(|s| s.estimated_duration_ms).sum()
}

/// Builds a scenario from selected steps of catalog scenarios.
///
/// Unknown scenarios and out-of-range indices are ignored.
pub fn composite_scenario(id: &str, name: &str, sources: &[(&str, Vec<usize>)]) -> Scenario {
    let mut steps = Vec::new();
    let mut tags = BTreeSet::new();
    for (scenario_id, indices) in sources {
        let Some(source) = scenario(scenario_id) else {
            continue;
        };
        steps.extend(
            indices
                .iter()
                .filter_map(|index| source.steps.get(*index).cloned()),
        );
        tags.extend(source.tags.iter().cloned());
    }

    let mut all_tags = vec!["composite".to_string()];
    all_tags.extend(tags);
    Scenario {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("Composite scenario: {name}"),
        journey_stage: JourneyStage::Prospect,
        estimated_duration_ms: steps.len() as u64 * 5_000,
        steps,
        variability: Variability {
            skip_probability: BTreeMap::new(),
            delay_range_ms: (500, 2_000),
            response_variation: true,
        },
        expected_outcomes: ExpectedOutcomes::default(),
        tags: all_tags,
    }
}

/// Weighted random choice by cumulative draw.
///
/// Entries with equal weight are equally likely. When every weight is zero
/// the draw falls back to uniform over all entries.
pub fn weighted_choice<'a, T, R>(pool: &'a [(T, u32)], rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
{
    if pool.is_empty() {
        return None;
    }
    let total: u64 = pool.iter().map(|(_, weight)| u64::from(*weight)).sum();
    if total == 0 {
        return pool.get(rng.gen_range(0..pool.len())).map(|(item, _)| item);
    }
    let draw = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for (item, weight) in pool {
        cumulative += u64::from(*weight);
        if draw < cumulative {
            return Some(item);
        }
    }
    pool.last().map(|(item, _)| item)
}

// ---------------------------------------------------------------------------
// Catalog definitions
// ---------------------------------------------------------------------------

fn navigate(path: &str, selector: &str) -> Step {
    Step::Navigate(NavigateStep {
        path: path.to_string(),
        wait_for_selector: Some(selector.to_string()),
    })
}

fn browse(section: &str, duration_ms: u64, interactions: &[Interaction]) -> Step {
    Step::Browse(BrowseStep {
        section: section.to_string(),
        duration_ms,
        interactions: interactions.to_vec(),
    })
}

fn chat(intent: &str, message: &str) -> Step {
    Step::Chat(ChatStep {
        intent: intent.to_string(),
        message: Some(message.to_string()),
        expected_response_contains: Vec::new(),
        max_turns: None,
        timeout_ms: None,
    })
}

fn delay(duration_ms: u64, randomize: bool) -> Step {
    Step::Delay(DelayStep {
        duration_ms,
        randomize,
        description: None,
    })
}

fn screenshot(name: &str) -> Step {
    Step::Screenshot(ScreenshotStep {
        name: name.to_string(),
        full_page: false,
    })
}

fn add_to_cart(product_type: &str) -> Step {
    Step::AddToCart(AddToCartStep {
        product_id: None,
        product_type: Some(product_type.to_string()),
        quantity: 1,
    })
}

fn full_diagnostic() -> Step {
    Step::Diagnostic(DiagnosticStep {
        complete_all_categories: true,
        skip_categories: Vec::new(),
        use_persona_responses: true,
    })
}

fn persona_contact_form() -> Step {
    Step::ContactForm(ContactFormStep {
        fields: BTreeMap::new(),
        use_persona_data: true,
    })
}

fn validate(table: &str, conditions: &[(&str, Value)], expected_count: Option<usize>) -> Step {
    Step::ValidateDatabase(ValidateDatabaseStep {
        table: table.to_string(),
        conditions: conditions
            .iter()
            .map(|(field, value)| (field.to_string(), FieldCondition::Equals(value.clone())))
            .collect(),
        expected_count,
        expected_fields: BTreeMap::new(),
    })
}

fn wait_for_webhook(webhook_type: WebhookType, timeout_ms: u64) -> Step {
    Step::WaitForWebhook(WaitForWebhookStep {
        webhook_type,
        timeout_ms,
        poll_interval_ms: None,
    })
}

fn rule(table: &str, field: &str, condition: RuleCondition, value: Option<Value>) -> ValidationRule {
    ValidationRule {
        table: table.to_string(),
        field: field.to_string(),
        condition,
        value,
    }
}

fn variability(skips: &[(&str, f64)], delay_range_ms: (u64, u64), response_variation: bool) -> Variability {
    Variability {
        skip_probability: skips
            .iter()
            .map(|(key, probability)| (key.to_string(), *probability))
            .collect(),
        delay_range_ms,
        response_variation,
    }
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn browse_and_buy() -> Scenario {
    Scenario {
        id: "browse_and_buy".to_string(),
        name: "Browse and Buy".to_string(),
        description: "Browse products, add to cart, complete checkout with Stripe test payment"
            .to_string(),
        journey_stage: JourneyStage::Client,
        steps: vec![
            navigate("/", "[data-section=\"hero\"]"),
            browse("store", 3_000, &[Interaction::Scroll]),
            navigate("/store", "[data-testid=\"product-grid\"]"),
            delay(2_000, true),
            add_to_cart("ebook"),
            delay(1_000, false),
            screenshot("cart-with-item"),
            navigate("/checkout", "[data-testid=\"checkout-form\"]"),
            Step::Checkout(CheckoutStep {
                payment_method: PaymentMethod::StripeTest,
                use_persona_contact: true,
                custom_contact: None,
            }),
            validate("orders", &[("status", json!("completed"))], Some(1)),
            screenshot("checkout-success"),
        ],
        variability: variability(&[], (500, 2_000), false),
        expected_outcomes: ExpectedOutcomes {
            must_complete: vec![StepKind::AddToCart, StepKind::Checkout],
            data_validation: vec![
                rule("orders", "status", RuleCondition::Equals, Some(json!("completed"))),
                rule("order_items", "id", RuleCondition::Exists, None),
            ],
        },
        estimated_duration_ms: 30_000,
        tags: tags(&["e-commerce", "checkout", "stripe", "critical-path"]),
    }
}

fn chat_to_diagnostic() -> Scenario {
    Scenario {
        id: "chat_to_diagnostic".to_string(),
        name: "Chat to Diagnostic".to_string(),
        description:
            "Engage with chat assistant, trigger diagnostic assessment, complete all 6 categories"
                .to_string(),
        journey_stage: JourneyStage::Lead,
        steps: vec![
            navigate("/", "[data-section=\"contact\"]"),
            browse("contact", 2_000, &[Interaction::Scroll]),
            chat(
                "greeting",
                "Hi, I am interested in learning more about your services",
            ),
            delay(2_000, true),
            chat(
                "trigger_diagnostic",
                "I would like to perform an AI audit of my business",
            ),
            full_diagnostic(),
            screenshot("diagnostic-complete"),
            validate("diagnostic_audits", &[("status", json!("completed"))], Some(1)),
            wait_for_webhook(WebhookType::DiagnosticCompletion, 10_000),
        ],
        variability: variability(&[("wait_for_webhook", 0.2)], (1_000, 3_000), true),
        expected_outcomes: ExpectedOutcomes {
            must_complete: vec![StepKind::Chat, StepKind::Diagnostic],
            data_validation: vec![
                rule(
                    "diagnostic_audits",
                    "status",
                    RuleCondition::Equals,
                    Some(json!("completed")),
                ),
                rule("diagnostic_audits", "urgency_score", RuleCondition::Exists, None),
                rule("diagnostic_audits", "opportunity_score", RuleCondition::Exists, None),
                rule("chat_messages", "id", RuleCondition::Exists, None),
            ],
        },
        estimated_duration_ms: 120_000,
        tags: tags(&["chat", "diagnostic", "lead-qualification", "critical-path"]),
    }
}

fn service_inquiry() -> Scenario {
    Scenario {
        id: "service_inquiry".to_string(),
        name: "Service Inquiry".to_string(),
        description: "Browse services, select one for inquiry, submit contact form".to_string(),
        journey_stage: JourneyStage::Lead,
        steps: vec![
            navigate("/", "[data-section=\"hero\"]"),
            browse("about", 2_000, &[Interaction::Scroll]),
            navigate("/services", "[data-testid=\"services-grid\"]"),
            delay(3_000, true),
            screenshot("services-page"),
            navigate("/#contact", "[data-section=\"contact\"]"),
            persona_contact_form(),
            screenshot("contact-form-submitted"),
            validate("contact_submissions", &[], Some(1)),
            wait_for_webhook(WebhookType::LeadQualification, 10_000),
        ],
        variability: variability(&[("wait_for_webhook", 0.3)], (500, 2_000), false),
        expected_outcomes: ExpectedOutcomes {
            must_complete: vec![StepKind::ContactForm],
            data_validation: vec![
                rule("contact_submissions", "email", RuleCondition::Exists, None),
                rule("contact_submissions", "name", RuleCondition::Exists, None),
            ],
        },
        estimated_duration_ms: 25_000,
        tags: tags(&["services", "contact-form", "lead-generation"]),
    }
}

fn full_funnel() -> Scenario {
    Scenario {
        id: "full_funnel".to_string(),
        name: "Full Funnel Journey".to_string(),
        description:
            "Complete customer journey: chat -> diagnostic -> contact -> (simulated proposal)"
                .to_string(),
        journey_stage: JourneyStage::Client,
        steps: vec![
            navigate("/", "[data-section=\"hero\"]"),
            browse("projects", 3_000, &[Interaction::Scroll, Interaction::Hover]),
            browse("store", 2_000, &[Interaction::Scroll]),
            browse("about", 2_000, &[Interaction::Scroll]),
            browse("contact", 1_000, &[]),
            chat(
                "introduction",
                "Hello, I have been looking at your portfolio and I am impressed",
            ),
            delay(2_000, true),
            chat(
                "interest",
                "I think we might need some help with our business processes",
            ),
            delay(1_500, true),
            chat(
                "trigger_diagnostic",
                "Could you help me identify what areas we should focus on? Maybe do an assessment?",
            ),
            full_diagnostic(),
            screenshot("diagnostic-results"),
            persona_contact_form(),
            validate("diagnostic_audits", &[("status", json!("completed"))], None),
            validate("contact_submissions", &[], None),
            wait_for_webhook(WebhookType::DiagnosticCompletion, 15_000),
        ],
        variability: variability(
            &[
                ("browse:projects", 0.2),
                ("browse:store", 0.3),
                ("wait_for_webhook", 0.2),
            ],
            (1_000, 4_000),
            true,
        ),
        expected_outcomes: ExpectedOutcomes {
            must_complete: vec![StepKind::Chat, StepKind::Diagnostic, StepKind::ContactForm],
            data_validation: vec![
                rule(
                    "diagnostic_audits",
                    "status",
                    RuleCondition::Equals,
                    Some(json!("completed")),
                ),
                rule("contact_submissions", "email", RuleCondition::Exists, None),
                rule("chat_sessions", "session_id", RuleCondition::Exists, None),
            ],
        },
        estimated_duration_ms: 180_000,
        tags: tags(&["full-funnel", "chat", "diagnostic", "contact", "critical-path"]),
    }
}

fn abandoned_cart() -> Scenario {
    Scenario {
        id: "abandoned_cart".to_string(),
        name: "Abandoned Cart".to_string(),
        description:
            "Add items to cart, start checkout, then abandon (tests exit intent and recovery)"
                .to_string(),
        journey_stage: JourneyStage::Prospect,
        steps: vec![
            navigate("/store", "[data-testid=\"product-grid\"]"),
            delay(2_000, true),
            add_to_cart("ebook"),
            delay(1_500, false),
            add_to_cart("training"),
            screenshot("cart-multiple-items"),
            navigate("/checkout", "[data-testid=\"checkout-form\"]"),
            delay(3_000, true),
            navigate("/", "[data-section=\"hero\"]"),
            screenshot("exit-intent-popup"),
            delay(5_000, false),
            navigate("/checkout", "[data-testid=\"checkout-form\"]"),
            screenshot("cart-recovered"),
        ],
        variability: variability(&[], (1_000, 3_000), false),
        expected_outcomes: ExpectedOutcomes {
            must_complete: vec![StepKind::AddToCart],
            data_validation: Vec::new(),
        },
        estimated_duration_ms: 35_000,
        tags: tags(&["cart", "abandonment", "exit-intent", "recovery"]),
    }
}

fn support_escalation() -> Scenario {
    Scenario {
        id: "support_escalation".to_string(),
        name: "Support Escalation".to_string(),
        description: "Ask complex or urgent questions to trigger human escalation".to_string(),
        journey_stage: JourneyStage::Lead,
        steps: vec![
            navigate("/#contact", "[data-section=\"contact\"]"),
            chat("urgent_help", "I need urgent help with a problem I am having"),
            delay(2_000, true),
            chat(
                "complex_question",
                "We have a very complex integration requirement involving legacy systems, real-time data sync, and compliance requirements. Can I speak to someone who handles enterprise implementations?",
            ),
            delay(2_000, true),
            chat("request_human", "I would prefer to speak with a human about this"),
            screenshot("escalation-triggered"),
            validate("chat_sessions", &[("is_escalated", json!(true))], None),
        ],
        variability: variability(&[], (1_500, 3_000), true),
        expected_outcomes: ExpectedOutcomes {
            must_complete: vec![StepKind::Chat],
            data_validation: vec![rule(
                "chat_sessions",
                "is_escalated",
                RuleCondition::Equals,
                Some(json!(true)),
            )],
        },
        estimated_duration_ms: 30_000,
        tags: tags(&["chat", "escalation", "support"]),
    }
}

fn quick_browse() -> Scenario {
    Scenario {
        id: "quick_browse".to_string(),
        name: "Quick Browse (Smoke Test)".to_string(),
        description: "Quick navigation through all main sections - smoke test".to_string(),
        journey_stage: JourneyStage::Prospect,
        steps: vec![
            navigate("/", "[data-section=\"hero\"]"),
            screenshot("home-page"),
            browse("projects", 1_000, &[]),
            browse("store", 1_000, &[]),
            browse("about", 1_000, &[]),
            browse("contact", 1_000, &[]),
            navigate("/store", "[data-testid=\"product-grid\"]"),
            screenshot("store-page"),
            navigate("/services", "[data-testid=\"services-grid\"]"),
            screenshot("services-page"),
            navigate("/", "[data-section=\"hero\"]"),
        ],
        variability: variability(&[], (200, 500), false),
        expected_outcomes: ExpectedOutcomes::default(),
        estimated_duration_ms: 15_000,
        tags: tags(&["smoke-test", "navigation", "quick"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn catalog_has_seven_scenarios() {
        let ids: Vec<_> = all_scenarios().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "browse_and_buy",
                "chat_to_diagnostic",
                "service_inquiry",
                "full_funnel",
                "abandoned_cart",
                "support_escalation",
                "quick_browse",
            ]
        );
    }

    #[test]
    fn presets_resolve_to_catalog_members() {
        let critical: Vec<_> = preset("critical")
            .expect("critical preset")
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(
            critical,
            vec!["browse_and_buy", "chat_to_diagnostic", "full_funnel"]
        );
        assert_eq!(preset("smoke").expect("smoke")[0].id, "quick_browse");
        assert_eq!(preset("all").expect("all").len(), 7);
        assert!(matches!(
            preset("nightly"),
            Err(CatalogError::UnknownPreset { .. })
        ));
    }

    #[test]
    fn resolve_selection_rejects_unknown_ids() {
        let err = resolve_selection(&ScenarioSelection::Ids(vec!["nope".to_string()]))
            .expect_err("unknown id");
        assert_eq!(err, CatalogError::UnknownScenario { id: "nope".to_string() });
        assert_eq!(
            resolve_selection(&ScenarioSelection::Ids(vec![])).expect_err("empty"),
            CatalogError::EmptySelection
        );
    }

    #[test]
    fn filters_by_tag_and_stage() {
        let chat: Vec<_> = scenarios_by_tag("chat").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(chat, vec!["chat_to_diagnostic", "full_funnel", "support_escalation"]);
        assert_eq!(scenarios_by_stage(JourneyStage::Prospect).len(), 2);
    }

    #[test]
    fn total_duration_sums_estimates() {
        let picked = preset("ecommerce").expect("ecommerce");
        assert_eq!(estimate_total_duration(&picked), 65_000);
    }

    #[test]
    fn composite_scenario_collects_steps_and_tags() {
        let composite = composite_scenario(
            "mix",
            "Mix",
            &[("quick_browse", vec![0, 1, 99]), ("missing", vec![0])],
        );
        assert_eq!(composite.steps.len(), 2);
        assert_eq!(composite.estimated_duration_ms, 10_000);
        assert_eq!(composite.tags[0], "composite");
        assert!(composite.has_tag("smoke-test"));
    }

    #[test]
    fn step_serializes_with_snake_case_type_tag() {
        let step = add_to_cart("ebook");
        let value = step.config_snapshot();
        assert_eq!(value["type"], "add_to_cart");
        assert_eq!(value["product_type"], "ebook");
        let parsed: Step = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed.kind(), StepKind::AddToCart);
    }

    #[test]
    fn step_descriptions_name_their_target() {
        assert_eq!(navigate("/store", "x").describe(), "Navigating to /store");
        assert_eq!(chat("greeting", "hi").describe(), "Chatting - greeting");
        let api = Step::ApiCall(ApiCallStep {
            endpoint: "/api/x".to_string(),
            method: HttpMethod::Post,
            body: None,
            headers: BTreeMap::new(),
            expected_status: None,
            expected_response: BTreeMap::new(),
            description: None,
        });
        assert_eq!(api.describe(), "API: POST /api/x");
    }

    #[test]
    fn skip_probability_prefers_section_key() {
        let funnel = scenario("full_funnel").expect("full funnel");
        let projects = &funnel.steps[1];
        let contact = &funnel.steps[4];
        assert_eq!(funnel.variability.skip_probability_for(projects), 0.2);
        assert_eq!(funnel.variability.skip_probability_for(contact), 0.0);
        let webhook = funnel.steps.last().expect("last step");
        assert_eq!(funnel.variability.skip_probability_for(webhook), 0.2);
    }

    #[test]
    fn field_condition_parses_both_shapes() {
        let conditions: BTreeMap<String, FieldCondition> =
            serde_json::from_value(json!({ "status": "completed", "lead_score": { "not": null } }))
                .expect("deserialize");
        assert_eq!(conditions["status"], FieldCondition::Equals(json!("completed")));
        assert_eq!(
            conditions["lead_score"],
            FieldCondition::IsNot { not: Value::Null }
        );
        assert!(conditions["lead_score"].matches(Some(&json!(42))));
        assert!(!conditions["lead_score"].matches(None));
    }

    #[test]
    fn integer_booleans_compare_equal() {
        assert!(values_equal(&json!(true), &json!(1)));
        assert!(!values_equal(&json!(true), &json!(0)));
        assert!(values_equal(&json!(3), &json!(3.0)));
    }

    #[test]
    fn weighted_choice_respects_zero_weights() {
        let pool = [("never", 0u32), ("always", 5u32)];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(weighted_choice(&pool, &mut rng), Some(&"always"));
        }
    }

    #[test]
    fn weighted_choice_spreads_equal_weights() {
        let pool = [("a", 1u32), ("b", 1u32), ("c", 1u32)];
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = BTreeSet::new();
        for _ in 0..200 {
            seen.insert(*weighted_choice(&pool, &mut rng).expect("non-empty"));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn weighted_choice_handles_empty_and_all_zero() {
        let empty: [(&str, u32); 0] = [];
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(weighted_choice(&empty, &mut rng), None);
        let zeros = [("x", 0u32)];
        assert_eq!(weighted_choice(&zeros, &mut rng), Some(&"x"));
    }
}
