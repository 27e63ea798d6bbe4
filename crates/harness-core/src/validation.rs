//! Validation for harness configuration and run requests.

use serde::{Deserialize, Serialize};

use crate::config::{HarnessConfig, LlmProvider};
use crate::persona::persona;
use crate::scenario::{preset, scenario};
use crate::types::RunConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

impl Validate for HarnessConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if !is_http_url(&self.target.base_url) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "target.base_url.invalid",
                message: format!(
                    "target base_url '{}' must start with http:// or https://",
                    self.target.base_url
                ),
            });
        }

        if self.target.request_timeout_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "target.request_timeout.zero",
                message: "request_timeout_ms must be greater than zero".to_string(),
            });
        }

        if self.target.database_path.is_none() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "target.database_path.missing",
                message: "no target database configured; data validation and cleanup will fail"
                    .to_string(),
            });
        }

        if self.orchestrator.max_concurrent_clients == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "orchestrator.max_concurrent_clients.zero",
                message: "max_concurrent_clients must be greater than zero".to_string(),
            });
        }

        if self.orchestrator.recent_errors_capacity == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "orchestrator.recent_errors_capacity.zero",
                message: "recent errors ring is disabled".to_string(),
            });
        }

        if self.polling.default_interval_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "polling.interval.zero",
                message: "default poll interval cannot be 0".to_string(),
            });
        }

        if self.polling.default_interval_ms > self.polling.default_timeout_ms {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "polling.interval.exceeds_timeout",
                message: "default poll interval is longer than the default timeout".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "llm.temperature.range",
                message: format!(
                    "temperature {} is outside 0.0..=2.0",
                    self.llm.temperature
                ),
            });
        }

        if self.llm.provider != LlmProvider::Mock && self.llm.model.trim().is_empty() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "llm.model.empty",
                message: format!("provider {} needs a model name", self.llm.provider.as_str()),
            });
        }

        if self.llm.max_turns == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "llm.max_turns.zero",
                message: "max_turns is 0; every chat ends after the opening message".to_string(),
            });
        }

        if let Some(repo) = &self.remediation.github_repo {
            if repo.split('/').filter(|part| !part.is_empty()).count() != 2 {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "remediation.github_repo.invalid",
                    message: format!("github_repo '{repo}' must look like owner/name"),
                });
            }
        }

        if let Some(url) = &self.remediation.n8n_webhook_url {
            if !is_http_url(url) {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Warning,
                    code: "remediation.n8n_webhook_url.invalid",
                    message: "n8n webhook URL should start with http:// or https://".to_string(),
                });
            }
        }

        if self.remediation.max_attempts == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "remediation.max_attempts.zero",
                message: "delivery max_attempts must be at least 1".to_string(),
            });
        }

        issues
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.max_concurrent_clients == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "run.max_concurrent_clients.zero",
                message: "maxConcurrentClients must be greater than zero".to_string(),
            });
        }

        if self.max_clients == Some(0) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Error,
                code: "run.max_clients.zero",
                message: "maxClients of 0 would never spawn a client".to_string(),
            });
        }

        if self.run_duration_ms > 0 && self.spawn_interval_ms == 0 {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "run.spawn_interval.zero",
                message: "spawn interval of 0 tops up the pool continuously".to_string(),
            });
        }

        for id in &self.scenario_ids {
            if scenario(id).is_none() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "run.scenario.unknown",
                    message: format!("unknown scenario '{id}'"),
                });
            }
        }

        if self.scenario_ids.is_empty() {
            if let Some(name) = &self.scenario_preset {
                if let Err(err) = preset(name) {
                    issues.push(ValidationIssue {
                        level: ValidationLevel::Error,
                        code: "run.preset.unknown",
                        message: err.to_string(),
                    });
                }
            }
        } else if self.scenario_preset.is_some() {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "run.preset.ignored",
                message: "scenario ids were given; the preset is ignored".to_string(),
            });
        }

        for id in &self.persona_ids {
            if persona(id).is_none() {
                issues.push(ValidationIssue {
                    level: ValidationLevel::Error,
                    code: "run.persona.unknown",
                    message: format!("unknown persona '{id}'"),
                });
            }
        }

        if !self.scenario_weights.is_empty() && self.scenario_weights.values().all(|w| *w == 0) {
            issues.push(ValidationIssue {
                level: ValidationLevel::Warning,
                code: "run.weights.all_zero",
                message: "all scenario weights are 0; scenarios are picked uniformly".to_string(),
            });
        }

        issues
    }
}
