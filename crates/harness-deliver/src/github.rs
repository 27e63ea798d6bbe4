//! Pull-request delivery through the GitHub REST API.
//!
//! The task description is committed as a markdown file on a fresh branch
//! using the git data endpoints, then a pull request is opened against the
//! requested target branch.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use harness_core::config::RemediationConfig;
use harness_core::types::OutputTarget;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::DeliveryBackend;
use crate::error::DeliverError;
use crate::types::{DeliveryPackage, DeliveryReceipt};

const BACKEND: &str = "github_pr";

#[derive(Debug, Clone)]
pub struct GithubPrBackend {
    client: reqwest::Client,
    api_base: String,
    repo: Option<String>,
    token: Option<String>,
}

impl GithubPrBackend {
    pub fn new(
        api_base: impl Into<String>,
        repo: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            repo,
            token,
        }
    }

    /// Reads the token from the configured environment variable.
    pub fn from_config(config: &RemediationConfig, timeout: Duration) -> Self {
        let token = std::env::var(&config.github_token_env)
            .ok()
            .filter(|token| !token.trim().is_empty());
        Self::new(
            config.github_api_base.clone(),
            config.github_repo.clone(),
            token,
            timeout,
        )
    }

    fn credentials(&self) -> Result<(&str, &str), DeliverError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| DeliverError::NotConfigured {
                backend: BACKEND.to_string(),
                reason: "GitHub token not configured".to_string(),
            })?;
        let repo = self
            .repo
            .as_deref()
            .ok_or_else(|| DeliverError::NotConfigured {
                backend: BACKEND.to_string(),
                reason: "github_repo not configured".to_string(),
            })?;
        Ok((token, repo))
    }

    async fn call(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DeliverError> {
        let url = format!("{}{}", self.api_base, path);
        debug!(%method, %url, "github request");
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "harness-remediation")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|err| DeliverError::Transport {
            backend: BACKEND.to_string(),
            message: err.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|err| DeliverError::Transport {
            backend: BACKEND.to_string(),
            message: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(DeliverError::Rejected {
                backend: BACKEND.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| DeliverError::Malformed {
            backend: BACKEND.to_string(),
            message: err.to_string(),
        })
    }
}

fn string_at<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, DeliverError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| DeliverError::Malformed {
            backend: BACKEND.to_string(),
            message: format!("missing {pointer}"),
        })
}

pub fn branch_name(millis: i64) -> String {
    format!("fix/test-error-{millis}")
}

pub fn task_file_path(package: &DeliveryPackage) -> String {
    format!(".harness/remediation/{}.md", package.request_id)
}

#[async_trait]
impl DeliveryBackend for GithubPrBackend {
    fn target(&self) -> OutputTarget {
        OutputTarget::GithubPr
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    async fn deliver(&self, package: &DeliveryPackage) -> Result<DeliveryReceipt, DeliverError> {
        let (token, repo) = self.credentials()?;
        let base = &package.options.target_branch;
        let branch = branch_name(Utc::now().timestamp_millis());
        let title = package.title();

        let base_ref = self
            .call(
                token,
                Method::GET,
                &format!("/repos/{repo}/git/ref/heads/{base}"),
                None,
            )
            .await?;
        let base_sha = string_at(&base_ref, "/object/sha")?.to_string();

        let base_commit = self
            .call(
                token,
                Method::GET,
                &format!("/repos/{repo}/git/commits/{base_sha}"),
                None,
            )
            .await?;
        let base_tree = string_at(&base_commit, "/tree/sha")?.to_string();

        let tree = self
            .call(
                token,
                Method::POST,
                &format!("/repos/{repo}/git/trees"),
                Some(json!({
                    "base_tree": base_tree,
                    "tree": [{
                        "path": task_file_path(package),
                        "mode": "100644",
                        "type": "blob",
                        "content": package.task_prompt,
                    }],
                })),
            )
            .await?;
        let tree_sha = string_at(&tree, "/sha")?.to_string();

        let commit = self
            .call(
                token,
                Method::POST,
                &format!("/repos/{repo}/git/commits"),
                Some(json!({
                    "message": title,
                    "tree": tree_sha,
                    "parents": [base_sha],
                })),
            )
            .await?;
        let commit_sha = string_at(&commit, "/sha")?.to_string();

        self.call(
            token,
            Method::POST,
            &format!("/repos/{repo}/git/refs"),
            Some(json!({ "ref": format!("refs/heads/{branch}"), "sha": commit_sha })),
        )
        .await?;

        let pull = self
            .call(
                token,
                Method::POST,
                &format!("/repos/{repo}/pulls"),
                Some(json!({
                    "title": title,
                    "head": branch,
                    "base": base,
                    "body": package.task_prompt,
                })),
            )
            .await?;
        let url = string_at(&pull, "/html_url")?.to_string();

        if !package.options.assignees.is_empty() {
            if let Some(number) = pull.get("number").and_then(Value::as_u64) {
                self.call(
                    token,
                    Method::POST,
                    &format!("/repos/{repo}/issues/{number}/assignees"),
                    Some(json!({ "assignees": package.options.assignees })),
                )
                .await?;
            }
        }

        Ok(DeliveryReceipt {
            target: OutputTarget::GithubPr,
            reference: url,
            location: Some(branch),
        })
    }
}
