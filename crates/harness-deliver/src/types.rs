use harness_core::types::{
    CodeFix, ErrorContext, ErrorId, ErrorType, OutputTarget, Priority, RemediationAnalysis,
    RemediationOptions, RemediationRequestId,
};
use serde::{Deserialize, Serialize};

/// The slice of an [`ErrorContext`] a delivery target gets to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDigest {
    pub error_id: ErrorId,
    pub error_type: ErrorType,
    pub message: String,
    pub scenario_id: String,
    pub step_index: usize,
    pub step_type: String,
    pub expected: Option<serde_json::Value>,
    pub actual: Option<serde_json::Value>,
}

impl From<&ErrorContext> for ErrorDigest {
    fn from(error: &ErrorContext) -> Self {
        Self {
            error_id: error.error_id.clone(),
            error_type: error.error_type,
            message: error.message.clone(),
            scenario_id: error.scenario_id.clone(),
            step_index: error.step_index,
            step_type: error.step_type.clone(),
            expected: error.expected.clone(),
            actual: error.actual.clone(),
        }
    }
}

/// Everything a backend needs to hand a remediation to its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPackage {
    pub request_id: RemediationRequestId,
    pub priority: Priority,
    pub options: RemediationOptions,
    pub errors: Vec<ErrorDigest>,
    pub analysis: RemediationAnalysis,
    pub fixes: Vec<CodeFix>,
    pub task_prompt: String,
}

impl DeliveryPackage {
    pub fn title(&self) -> String {
        match self.errors.as_slice() {
            [] => "Fix E2E test failure".to_string(),
            [only] => format!(
                "Fix {} in {} ({})",
                only.error_type, only.scenario_id, only.step_type
            ),
            [first, rest @ ..] => format!(
                "Fix {} in {} and {} more",
                first.error_type,
                first.scenario_id,
                rest.len()
            ),
        }
    }
}

/// Identifier handed back by a delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub target: OutputTarget,
    /// PR URL, task id or workflow execution id.
    pub reference: String,
    #[serde(default)]
    pub location: Option<String>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::{digest, package};
    use super::DeliveryReceipt;
    use harness_core::types::{ErrorType, OutputTarget};

    #[test]
    fn title_names_single_error() {
        let package = package(OutputTarget::CursorTask);
        assert_eq!(
            package.title(),
            "Fix chat_timeout in chat_to_diagnostic (chat)"
        );
    }

    #[test]
    fn title_counts_additional_errors() {
        let mut package = package(OutputTarget::CursorTask);
        package
            .errors
            .push(digest("err_2", ErrorType::Timeout, "full_funnel"));
        package
            .errors
            .push(digest("err_3", ErrorType::Timeout, "full_funnel"));
        assert_eq!(
            package.title(),
            "Fix chat_timeout in chat_to_diagnostic and 2 more"
        );
    }

    #[test]
    fn receipt_serializes_target_in_snake_case() {
        let receipt = DeliveryReceipt {
            target: OutputTarget::N8nWorkflow,
            reference: "exec-9".to_string(),
            location: None,
        };
        let value = serde_json::to_value(&receipt).expect("serialize receipt");
        assert_eq!(value["target"], "n8n_workflow");
    }
}
