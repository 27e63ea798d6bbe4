//! Workflow-automation delivery through an n8n webhook.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use harness_core::types::OutputTarget;
use serde_json::{json, Value};

use crate::backend::DeliveryBackend;
use crate::error::DeliverError;
use crate::types::{DeliveryPackage, DeliveryReceipt};

const BACKEND: &str = "n8n_workflow";

#[derive(Debug, Clone)]
pub struct N8nWorkflowBackend {
    client: reqwest::Client,
    webhook_url: Option<String>,
    callback_base_url: String,
}

impl N8nWorkflowBackend {
    pub fn new(
        webhook_url: Option<String>,
        callback_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            webhook_url: webhook_url.filter(|url| !url.trim().is_empty()),
            callback_base_url: callback_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

pub fn build_payload(package: &DeliveryPackage, callback_base_url: &str) -> Value {
    let errors: Vec<Value> = package
        .errors
        .iter()
        .map(|error| {
            json!({
                "errorId": error.error_id,
                "type": error.error_type,
                "message": error.message,
                "scenario": error.scenario_id,
                "step": error.step_type,
            })
        })
        .collect();
    let fixes: Vec<Value> = package
        .fixes
        .iter()
        .map(|fix| json!({ "file": fix.file, "explanation": fix.explanation }))
        .collect();

    json!({
        "action": "remediate_test_failure",
        "requestId": package.request_id,
        "priority": package.priority,
        "errors": errors,
        "analysis": package.analysis,
        "fixes": fixes,
        "callbackUrl": format!("{callback_base_url}/api/testing/remediation/callback"),
    })
}

#[async_trait]
impl DeliveryBackend for N8nWorkflowBackend {
    fn target(&self) -> OutputTarget {
        OutputTarget::N8nWorkflow
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn deliver(&self, package: &DeliveryPackage) -> Result<DeliveryReceipt, DeliverError> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| DeliverError::NotConfigured {
                backend: BACKEND.to_string(),
                reason: "n8n_webhook_url not configured".to_string(),
            })?;

        let response = self
            .client
            .post(url)
            .json(&build_payload(package, &self.callback_base_url))
            .send()
            .await
            .map_err(|err| DeliverError::Transport {
                backend: BACKEND.to_string(),
                message: err.to_string(),
            })?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DeliverError::Rejected {
                backend: BACKEND.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        // Workflows that answer before starting an execution return no id.
        let execution_id = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| {
                body.get("executionId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("n8n_{}", Utc::now().timestamp_millis()));

        Ok(DeliveryReceipt {
            target: OutputTarget::N8nWorkflow,
            reference: execution_id,
            location: Some(url.to_string()),
        })
    }
}
