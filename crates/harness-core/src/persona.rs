//! Synthetic client personas.
//!
//! A [`Persona`] is an immutable template. [`create_persona_instance`] stamps a
//! template with a unique contact identity so rows written by concurrent runs
//! never collide.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::scenario::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRole {
    DecisionMaker,
    Researcher,
    Technical,
    BudgetHolder,
}

impl PersonaRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonaRole::DecisionMaker => "decision_maker",
            PersonaRole::Researcher => "researcher",
            PersonaRole::Technical => "technical",
            PersonaRole::BudgetHolder => "budget_holder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BudgetRange {
    #[serde(rename = "$1K-$5K")]
    UpTo5k,
    #[serde(rename = "$5K-$15K")]
    UpTo15k,
    #[serde(rename = "$15K-$50K")]
    UpTo50k,
    #[serde(rename = "$50K+")]
    Over50k,
}

impl BudgetRange {
    pub fn as_str(self) -> &'static str {
        match self {
            BudgetRange::UpTo5k => "$1K-$5K",
            BudgetRange::UpTo15k => "$5K-$15K",
            BudgetRange::UpTo50k => "$15K-$50K",
            BudgetRange::Over50k => "$50K+",
        }
    }

    /// Form value for the target's `annual_revenue` field, e.g. `50K-plus`.
    pub fn form_value(self) -> String {
        self.as_str().replacen('$', "", 1).replace('+', "-plus")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionTimeline {
    #[serde(rename = "immediate")]
    Immediate,
    #[serde(rename = "30_days")]
    ThirtyDays,
    #[serde(rename = "90_days")]
    NinetyDays,
    #[serde(rename = "exploratory")]
    Exploratory,
}

impl DecisionTimeline {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionTimeline::Immediate => "immediate",
            DecisionTimeline::ThirtyDays => "30_days",
            DecisionTimeline::NinetyDays => "90_days",
            DecisionTimeline::Exploratory => "exploratory",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    Brief,
    Detailed,
    Questioning,
}

impl CommunicationStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            CommunicationStyle::Brief => "brief",
            CommunicationStyle::Detailed => "detailed",
            CommunicationStyle::Questioning => "questioning",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestArea {
    AiAutomation,
    SalesPipeline,
    WorkflowOptimization,
    Consulting,
    Training,
}

impl InterestArea {
    pub fn as_str(self) -> &'static str {
        match self {
            InterestArea::AiAutomation => "ai_automation",
            InterestArea::SalesPipeline => "sales_pipeline",
            InterestArea::WorkflowOptimization => "workflow_optimization",
            InterestArea::Consulting => "consulting",
            InterestArea::Training => "training",
        }
    }
}

/// The six question groups of the target's diagnostic assessment, in the
/// order the assessment asks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    BusinessChallenges,
    TechStack,
    AutomationNeeds,
    AiReadiness,
    BudgetTimeline,
    DecisionMaking,
}

impl DiagnosticCategory {
    pub const ALL: [DiagnosticCategory; 6] = [
        DiagnosticCategory::BusinessChallenges,
        DiagnosticCategory::TechStack,
        DiagnosticCategory::AutomationNeeds,
        DiagnosticCategory::AiReadiness,
        DiagnosticCategory::BudgetTimeline,
        DiagnosticCategory::DecisionMaking,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticCategory::BusinessChallenges => "business_challenges",
            DiagnosticCategory::TechStack => "tech_stack",
            DiagnosticCategory::AutomationNeeds => "automation_needs",
            DiagnosticCategory::AiReadiness => "ai_readiness",
            DiagnosticCategory::BudgetTimeline => "budget_timeline",
            DiagnosticCategory::DecisionMaking => "decision_making",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            DiagnosticCategory::BusinessChallenges => "Business Challenges",
            DiagnosticCategory::TechStack => "Tech Stack",
            DiagnosticCategory::AutomationNeeds => "Automation Needs",
            DiagnosticCategory::AiReadiness => "AI Readiness",
            DiagnosticCategory::BudgetTimeline => "Budget & Timeline",
            DiagnosticCategory::DecisionMaking => "Decision Making",
        }
    }
}

impl std::str::FromStr for DiagnosticCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        DiagnosticCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("invalid diagnostic category '{normalized}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub company: String,
    pub role: PersonaRole,
    pub urgency: Urgency,
    pub budget: BudgetRange,
    /// 1 to 10.
    pub tech_savvy: u8,
    pub decision_timeline: DecisionTimeline,
    pub pain_points: Vec<String>,
    pub interest_areas: Vec<InterestArea>,
    pub communication_style: CommunicationStyle,
    /// 0.0 to 1.0.
    pub objection_probability: f64,
    pub common_objections: Vec<String>,
    #[serde(default)]
    pub diagnostic_responses: BTreeMap<DiagnosticCategory, serde_json::Value>,
}

impl Persona {
    pub fn is_skeptical(&self) -> bool {
        self.objection_probability > 0.5
    }

    pub fn diagnostic_answer(&self, category: DiagnosticCategory) -> Option<&serde_json::Value> {
        self.diagnostic_responses.get(&category)
    }
}

/// A persona stamped with a per-run contact identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaInstance {
    pub persona: Persona,
    pub email: String,
}

impl PersonaInstance {
    pub fn id(&self) -> &str {
        &self.persona.id
    }

    pub fn name(&self) -> &str {
        &self.persona.name
    }
}

pub fn generate_test_email(persona_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "test-{persona_id}-{}@test.amadutown.com",
        at.timestamp_millis()
    )
}

pub fn create_persona_instance(persona_id: &str) -> Result<PersonaInstance, CatalogError> {
    let persona = persona(persona_id).ok_or_else(|| CatalogError::UnknownPersona {
        id: persona_id.to_string(),
    })?;
    Ok(PersonaInstance {
        email: generate_test_email(&persona.id, Utc::now()),
        persona: persona.clone(),
    })
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

pub fn all_personas() -> &'static [Persona] {
    static PERSONAS: OnceLock<Vec<Persona>> = OnceLock::new();
    PERSONAS.get_or_init(|| {
        vec![
            startup_sarah(),
            enterprise_eric(),
            skeptical_sam(),
            ready_rachel(),
            technical_tom(),
            browsing_brenda(),
        ]
    })
}

pub fn persona(id: &str) -> Option<&'static Persona> {
    all_personas().iter().find(|persona| persona.id == id)
}

pub fn personas_by_urgency(urgency: Urgency) -> Vec<&'static Persona> {
    all_personas()
        .iter()
        .filter(|persona| persona.urgency == urgency)
        .collect()
}

pub fn personas_by_budget(budget: BudgetRange) -> Vec<&'static Persona> {
    all_personas()
        .iter()
        .filter(|persona| persona.budget == budget)
        .collect()
}

pub fn personas_by_role(role: PersonaRole) -> Vec<&'static Persona> {
    all_personas()
        .iter()
        .filter(|persona| persona.role == role)
        .collect()
}

/// Decision makers holding a budget of at least $15K.
pub fn high_value_personas() -> Vec<&'static Persona> {
    all_personas()
        .iter()
        .filter(|persona| {
            persona.role == PersonaRole::DecisionMaker
                && matches!(persona.budget, BudgetRange::UpTo50k | BudgetRange::Over50k)
        })
        .collect()
}

/// Personas named by `ids`, or every persona when `ids` is empty.
pub fn resolve_personas(ids: &[String]) -> Result<Vec<&'static Persona>, CatalogError> {
    if ids.is_empty() {
        return Ok(all_personas().iter().collect());
    }
    ids.iter()
        .map(|id| {
            persona(id).ok_or_else(|| CatalogError::UnknownPersona { id: id.clone() })
        })
        .collect()
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn diagnostics(
    entries: [(DiagnosticCategory, serde_json::Value); 6],
) -> BTreeMap<DiagnosticCategory, serde_json::Value> {
    entries.into_iter().collect()
}

fn startup_sarah() -> Persona {
    use DiagnosticCategory::*;
    Persona {
        id: "startup_sarah".to_string(),
        name: "Sarah Mitchell".to_string(),
        company: "TechFlow Solutions".to_string(),
        role: PersonaRole::DecisionMaker,
        urgency: Urgency::High,
        budget: BudgetRange::UpTo15k,
        tech_savvy: 7,
        decision_timeline: DecisionTimeline::ThirtyDays,
        pain_points: strings(&[
            "Manual lead follow-up taking too long",
            "Inconsistent sales messaging",
            "No visibility into pipeline health",
            "Losing deals due to slow response times",
        ]),
        interest_areas: vec![
            InterestArea::AiAutomation,
            InterestArea::SalesPipeline,
            InterestArea::WorkflowOptimization,
        ],
        communication_style: CommunicationStyle::Questioning,
        objection_probability: 0.3,
        common_objections: strings(&[
            "How quickly can this be implemented?",
            "What kind of ROI can I expect?",
            "Do you have case studies from similar companies?",
        ]),
        diagnostic_responses: diagnostics([
            (
                BusinessChallenges,
                json!({
                    "primary_challenges": ["Manual lead follow-up", "Inconsistent messaging", "Pipeline visibility"],
                    "pain_points": ["Slow response times", "Admin tasks consuming 60% of time"],
                    "current_impact": "Estimated $200K in lost revenue due to slow follow-up",
                    "attempted_solutions": ["Hired more sales reps", "Tried Zapier but hit limitations"]
                }),
            ),
            (
                TechStack,
                json!({
                    "crm": "HubSpot",
                    "email": "Google Workspace",
                    "marketing": "Mailchimp",
                    "analytics": "Google Analytics",
                    "other_tools": ["Slack", "Notion", "Calendly"],
                    "integration_readiness": "High - all tools have APIs"
                }),
            ),
            (
                AutomationNeeds,
                json!({
                    "priority_areas": ["Lead scoring and routing", "Automated follow-up sequences", "Pipeline reporting"],
                    "desired_outcomes": ["Respond to leads within 5 minutes", "Personalized outreach at scale"],
                    "complexity_tolerance": "Medium - want results fast but willing to invest in setup"
                }),
            ),
            (
                AiReadiness,
                json!({
                    "data_quality": "Good - clean CRM data",
                    "team_readiness": "Excited about AI tools",
                    "previous_ai_experience": "Used ChatGPT for email templates",
                    "concerns": ["Data privacy", "Cost"],
                    "readiness_score": 7
                }),
            ),
            (
                BudgetTimeline,
                json!({
                    "budget_range": "$5,000-$15,000",
                    "timeline": "Want to start within 30 days",
                    "decision_timeline": "Can decide within 2 weeks",
                    "budget_flexibility": "Could increase for proven ROI"
                }),
            ),
            (
                DecisionMaking,
                json!({
                    "decision_maker": true,
                    "stakeholders": ["CEO", "Sales Manager"],
                    "approval_process": "Sarah has final say for tools under $20K",
                    "previous_vendor_experience": "Good - currently using 3 SaaS tools"
                }),
            ),
        ]),
    }
}

fn enterprise_eric() -> Persona {
    use DiagnosticCategory::*;
    Persona {
        id: "enterprise_eric".to_string(),
        name: "Eric Thompson".to_string(),
        company: "GlobalTech Industries".to_string(),
        role: PersonaRole::Researcher,
        urgency: Urgency::Low,
        budget: BudgetRange::Over50k,
        tech_savvy: 8,
        decision_timeline: DecisionTimeline::NinetyDays,
        pain_points: strings(&[
            "Complex approval processes slow everything down",
            "Need to integrate with legacy systems",
            "Security and compliance requirements",
            "Scaling solutions across multiple departments",
        ]),
        interest_areas: vec![
            InterestArea::AiAutomation,
            InterestArea::Consulting,
            InterestArea::Training,
        ],
        communication_style: CommunicationStyle::Detailed,
        objection_probability: 0.5,
        common_objections: strings(&[
            "We need to see detailed documentation and security certifications",
            "How does this integrate with our existing enterprise systems?",
            "What is your SLA and support structure?",
            "We require a formal RFP process",
        ]),
        diagnostic_responses: diagnostics([
            (
                BusinessChallenges,
                json!({
                    "primary_challenges": ["Legacy system integration", "Multi-department coordination", "Compliance requirements"],
                    "pain_points": ["Slow procurement process", "Siloed data across departments"],
                    "current_impact": "Inefficiencies costing approximately $500K annually",
                    "attempted_solutions": ["Internal IT projects", "Multiple vendor POCs"]
                }),
            ),
            (
                TechStack,
                json!({
                    "crm": "Salesforce Enterprise",
                    "email": "Microsoft 365",
                    "erp": "SAP",
                    "analytics": "Tableau",
                    "other_tools": ["ServiceNow", "Jira", "Confluence"],
                    "integration_readiness": "Complex - requires security review"
                }),
            ),
            (
                AutomationNeeds,
                json!({
                    "priority_areas": ["Cross-department workflow automation", "AI-powered analytics", "Compliance reporting"],
                    "desired_outcomes": ["Unified data platform", "Reduced manual reporting", "Better forecasting"],
                    "complexity_tolerance": "High - willing to invest in comprehensive solution"
                }),
            ),
            (
                AiReadiness,
                json!({
                    "data_quality": "Mixed - needs data governance improvement",
                    "team_readiness": "Varies by department",
                    "previous_ai_experience": "Some ML models in production",
                    "concerns": ["Data governance", "Model explainability", "Vendor lock-in"],
                    "readiness_score": 6
                }),
            ),
            (
                BudgetTimeline,
                json!({
                    "budget_range": "$50,000+",
                    "timeline": "Q3 implementation target",
                    "decision_timeline": "90-day evaluation process",
                    "budget_flexibility": "Budget approved, needs business case"
                }),
            ),
            (
                DecisionMaking,
                json!({
                    "decision_maker": false,
                    "stakeholders": ["CTO", "VP of Operations", "Security Team", "Procurement"],
                    "approval_process": "Requires steering committee approval",
                    "previous_vendor_experience": "Formal vendor management process"
                }),
            ),
        ]),
    }
}

fn skeptical_sam() -> Persona {
    use DiagnosticCategory::*;
    Persona {
        id: "skeptical_sam".to_string(),
        name: "Sam Rodriguez".to_string(),
        company: "Rodriguez Consulting".to_string(),
        role: PersonaRole::BudgetHolder,
        urgency: Urgency::Medium,
        budget: BudgetRange::UpTo5k,
        tech_savvy: 5,
        decision_timeline: DecisionTimeline::Exploratory,
        pain_points: strings(&[
            "Have been burned by overpromising vendors before",
            "Tight budget constraints",
            "Not sure if automation is worth the investment",
            "Concerned about learning curve",
        ]),
        interest_areas: vec![InterestArea::WorkflowOptimization],
        communication_style: CommunicationStyle::Questioning,
        objection_probability: 0.8,
        common_objections: strings(&[
            "This seems expensive for what it does",
            "We tried something similar before and it did not work",
            "I do not have time to learn a new system",
            "Can you prove this will actually save us money?",
            "What happens if we want to cancel?",
        ]),
        diagnostic_responses: diagnostics([
            (
                BusinessChallenges,
                json!({
                    "primary_challenges": ["Manual processes", "Limited staff", "Tight margins"],
                    "pain_points": ["Spending too much time on admin work", "Difficult to scale"],
                    "current_impact": "Owner working 60+ hours/week on operational tasks",
                    "attempted_solutions": ["Excel spreadsheets", "Tried a CRM but abandoned it"]
                }),
            ),
            (
                TechStack,
                json!({
                    "crm": "None currently",
                    "email": "Gmail",
                    "accounting": "QuickBooks",
                    "other_tools": ["Excel", "Google Docs"],
                    "integration_readiness": "Low - basic tools only"
                }),
            ),
            (
                AutomationNeeds,
                json!({
                    "priority_areas": ["Client communication", "Invoice reminders", "Basic reporting"],
                    "desired_outcomes": ["Save 10 hours per week", "Fewer missed follow-ups"],
                    "complexity_tolerance": "Low - needs to be simple and proven"
                }),
            ),
            (
                AiReadiness,
                json!({
                    "data_quality": "Poor - mostly in spreadsheets",
                    "team_readiness": "Skeptical but open",
                    "previous_ai_experience": "None",
                    "concerns": ["Cost", "Complexity", "Time investment"],
                    "readiness_score": 3
                }),
            ),
            (
                BudgetTimeline,
                json!({
                    "budget_range": "$1,000-$5,000",
                    "timeline": "Only if ROI is clear",
                    "decision_timeline": "Need to see proof first",
                    "budget_flexibility": "Very limited"
                }),
            ),
            (
                DecisionMaking,
                json!({
                    "decision_maker": true,
                    "stakeholders": ["Just me"],
                    "approval_process": "I make all decisions",
                    "previous_vendor_experience": "Mixed - some bad experiences"
                }),
            ),
        ]),
    }
}

fn ready_rachel() -> Persona {
    use DiagnosticCategory::*;
    Persona {
        id: "ready_rachel".to_string(),
        name: "Rachel Chen".to_string(),
        company: "InnovateTech Co".to_string(),
        role: PersonaRole::DecisionMaker,
        urgency: Urgency::High,
        budget: BudgetRange::UpTo50k,
        tech_savvy: 8,
        decision_timeline: DecisionTimeline::Immediate,
        pain_points: strings(&[
            "Current system is failing and need replacement ASAP",
            "Growth is outpacing our processes",
            "Team is frustrated with manual workarounds",
        ]),
        interest_areas: vec![
            InterestArea::AiAutomation,
            InterestArea::SalesPipeline,
            InterestArea::Consulting,
        ],
        communication_style: CommunicationStyle::Brief,
        objection_probability: 0.1,
        common_objections: strings(&[
            "When can we start?",
            "What is the fastest implementation timeline?",
        ]),
        diagnostic_responses: diagnostics([
            (
                BusinessChallenges,
                json!({
                    "primary_challenges": ["System failure", "Rapid growth", "Process bottlenecks"],
                    "pain_points": ["Current tool is EOL", "Manual workarounds everywhere"],
                    "current_impact": "Critical - current system failing",
                    "attempted_solutions": ["Tried to extend current system", "Evaluated 3 other vendors"]
                }),
            ),
            (
                TechStack,
                json!({
                    "crm": "Legacy system (being replaced)",
                    "email": "Google Workspace",
                    "marketing": "HubSpot Marketing",
                    "analytics": "Mixpanel",
                    "other_tools": ["Slack", "Asana", "Figma"],
                    "integration_readiness": "High - modern stack except CRM"
                }),
            ),
            (
                AutomationNeeds,
                json!({
                    "priority_areas": ["Complete CRM replacement", "Sales automation", "Customer success workflows"],
                    "desired_outcomes": ["Unified customer view", "Automated lifecycle campaigns", "Self-service reporting"],
                    "complexity_tolerance": "High - ready for comprehensive solution"
                }),
            ),
            (
                AiReadiness,
                json!({
                    "data_quality": "Good - well structured",
                    "team_readiness": "Very ready - championing the change",
                    "previous_ai_experience": "Using AI for content and support",
                    "concerns": ["Migration from legacy system"],
                    "readiness_score": 9
                }),
            ),
            (
                BudgetTimeline,
                json!({
                    "budget_range": "$15,000-$50,000",
                    "timeline": "Need to start this month",
                    "decision_timeline": "Can sign this week",
                    "budget_flexibility": "Approved and available"
                }),
            ),
            (
                DecisionMaking,
                json!({
                    "decision_maker": true,
                    "stakeholders": ["CEO already aligned"],
                    "approval_process": "Rachel has authority",
                    "previous_vendor_experience": "Excellent - long-term partnerships"
                }),
            ),
        ]),
    }
}

fn technical_tom() -> Persona {
    use DiagnosticCategory::*;
    Persona {
        id: "technical_tom".to_string(),
        name: "Tom Anderson".to_string(),
        company: "DevOps Masters".to_string(),
        role: PersonaRole::Technical,
        urgency: Urgency::Medium,
        budget: BudgetRange::UpTo15k,
        tech_savvy: 10,
        decision_timeline: DecisionTimeline::ThirtyDays,
        pain_points: strings(&[
            "Need to understand API capabilities",
            "Integration complexity with existing systems",
            "Worried about vendor lock-in",
            "Need robust error handling and monitoring",
        ]),
        interest_areas: vec![
            InterestArea::AiAutomation,
            InterestArea::WorkflowOptimization,
        ],
        communication_style: CommunicationStyle::Detailed,
        objection_probability: 0.4,
        common_objections: strings(&[
            "What APIs and webhooks do you support?",
            "How do you handle rate limiting and retries?",
            "What is your uptime SLA?",
            "Can we access our data if we leave?",
        ]),
        diagnostic_responses: diagnostics([
            (
                BusinessChallenges,
                json!({
                    "primary_challenges": ["Integration complexity", "System reliability", "Technical debt"],
                    "pain_points": ["Manual data syncing", "Inconsistent APIs across tools"],
                    "current_impact": "Dev team spending 30% time on maintenance",
                    "attempted_solutions": ["Built internal tools", "Using multiple point solutions"]
                }),
            ),
            (
                TechStack,
                json!({
                    "crm": "Custom built on PostgreSQL",
                    "email": "SendGrid API",
                    "infrastructure": "AWS + Kubernetes",
                    "analytics": "Custom + Datadog",
                    "other_tools": ["GitHub", "CircleCI", "PagerDuty", "Terraform"],
                    "integration_readiness": "Very high - API-first approach"
                }),
            ),
            (
                AutomationNeeds,
                json!({
                    "priority_areas": ["API orchestration", "Event-driven workflows", "Monitoring integration"],
                    "desired_outcomes": ["Reduce custom code", "Better observability", "Faster iteration"],
                    "complexity_tolerance": "Very high - prefer flexibility over simplicity"
                }),
            ),
            (
                AiReadiness,
                json!({
                    "data_quality": "Excellent - well-structured databases",
                    "team_readiness": "Enthusiastic about AI/ML",
                    "previous_ai_experience": "Running ML models in production",
                    "concerns": ["Model versioning", "Inference latency", "Cost at scale"],
                    "readiness_score": 9
                }),
            ),
            (
                BudgetTimeline,
                json!({
                    "budget_range": "$5,000-$15,000 initially",
                    "timeline": "After technical evaluation",
                    "decision_timeline": "Need POC first",
                    "budget_flexibility": "Can increase based on technical fit"
                }),
            ),
            (
                DecisionMaking,
                json!({
                    "decision_maker": false,
                    "stakeholders": ["CTO", "Engineering Lead"],
                    "approval_process": "Tom evaluates, CTO decides",
                    "previous_vendor_experience": "Prefer open source when possible"
                }),
            ),
        ]),
    }
}

fn browsing_brenda() -> Persona {
    use DiagnosticCategory::*;
    Persona {
        id: "browsing_brenda".to_string(),
        name: "Brenda Williams".to_string(),
        company: "Williams & Associates".to_string(),
        role: PersonaRole::Researcher,
        urgency: Urgency::Low,
        budget: BudgetRange::UpTo5k,
        tech_savvy: 4,
        decision_timeline: DecisionTimeline::Exploratory,
        pain_points: strings(&[
            "Not sure what I need yet",
            "Just researching options",
            "Curious about AI but not committed",
        ]),
        interest_areas: vec![InterestArea::Training],
        communication_style: CommunicationStyle::Brief,
        objection_probability: 0.6,
        common_objections: strings(&[
            "I am just looking for now",
            "Can you send me some information to read later?",
            "I need to think about it",
            "Not ready to make any decisions yet",
        ]),
        diagnostic_responses: diagnostics([
            (
                BusinessChallenges,
                json!({
                    "primary_challenges": ["Not sure yet", "General inefficiencies"],
                    "pain_points": ["Things could be better but not urgent"],
                    "current_impact": "Unknown - have not quantified",
                    "attempted_solutions": ["Nothing specific"]
                }),
            ),
            (
                TechStack,
                json!({
                    "crm": "Maybe HubSpot free tier",
                    "email": "Gmail",
                    "other_tools": ["Not sure what we use"],
                    "integration_readiness": "Unknown"
                }),
            ),
            (
                AutomationNeeds,
                json!({
                    "priority_areas": ["Not sure yet"],
                    "desired_outcomes": ["General improvement"],
                    "complexity_tolerance": "Low - needs to be easy"
                }),
            ),
            (
                AiReadiness,
                json!({
                    "data_quality": "Unknown",
                    "team_readiness": "Curious but cautious",
                    "previous_ai_experience": "Used ChatGPT occasionally",
                    "concerns": ["Everything - very new to this"],
                    "readiness_score": 2
                }),
            ),
            (
                BudgetTimeline,
                json!({
                    "budget_range": "Not sure",
                    "timeline": "No timeline",
                    "decision_timeline": "Not looking to decide anytime soon",
                    "budget_flexibility": "Would need to be very cheap"
                }),
            ),
            (
                DecisionMaking,
                json!({
                    "decision_maker": true,
                    "stakeholders": ["Just me"],
                    "approval_process": "I decide but not ready",
                    "previous_vendor_experience": "Limited"
                }),
            ),
        ]),
    }
}
