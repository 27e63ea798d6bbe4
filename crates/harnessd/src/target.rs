//! HTTP boundary to the application under test.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use harness_core::config::TargetConfig;
use harness_core::scenario::HttpMethod;
use harness_core::types::{RequestSnapshot, ResponseSnapshot};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("{method} {path} timed out after {timeout_ms}ms")]
    Timeout {
        method: &'static str,
        path: String,
        timeout_ms: u64,
    },
    #[error("{method} {path} failed: {message}")]
    Transport {
        method: &'static str,
        path: String,
        message: String,
    },
}

impl TargetError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TargetError::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRequest {
    pub method: HttpMethod,
    /// Path relative to the target's base URL, e.g. `/api/chat`.
    pub path: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub bearer: Option<String>,
    /// Overrides the client-wide timeout.
    pub timeout: Option<Duration>,
}

impl TargetRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: BTreeMap::new(),
            bearer: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_bearer(mut self, token: Option<&str>) -> Self {
        self.bearer = token.map(str::to_string);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn snapshot(&self, base_url: &str) -> RequestSnapshot {
        RequestSnapshot {
            method: self.method.as_str().to_string(),
            url: format!("{base_url}{}", self.path),
            body: self.body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResponse {
    pub status: u16,
    pub text: String,
}

impl TargetResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.text).ok()
    }

    /// JSON body when it parses, the raw text otherwise.
    pub fn body_value(&self) -> Value {
        self.json().unwrap_or_else(|| Value::String(self.text.clone()))
    }

    pub fn snapshot(&self) -> ResponseSnapshot {
        ResponseSnapshot {
            status: self.status,
            body: Some(self.body_value()),
        }
    }
}

#[async_trait]
pub trait TargetApp: Send + Sync {
    fn base_url(&self) -> &str;

    async fn send(&self, request: &TargetRequest) -> Result<TargetResponse, TargetError>;
}

#[derive(Debug, Clone)]
pub struct HttpTarget {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTarget {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &TargetConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl TargetApp for HttpTarget {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: &TargetRequest) -> Result<TargetResponse, TargetError> {
        let url = format!("{}{}", self.base_url, request.path);
        let timeout = request.timeout.unwrap_or(self.timeout);
        let method = request.method.as_str();
        debug!(method, %url, "target request");

        let mut builder = self
            .client
            .request(reqwest_method(request.method), &url)
            .timeout(timeout)
            .header("User-Agent", "harness-e2e-client");
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let classify = |err: reqwest::Error| {
            if err.is_timeout() {
                TargetError::Timeout {
                    method,
                    path: request.path.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                TargetError::Transport {
                    method,
                    path: request.path.clone(),
                    message: err.to_string(),
                }
            }
        };
        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(classify)?;
        Ok(TargetResponse { status, text })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{TargetApp, TargetError, TargetRequest, TargetResponse};

    type Handler = Box<dyn Fn(&TargetRequest) -> Result<TargetResponse, TargetError> + Send + Sync>;

    /// Target whose responses come from a closure; records every request.
    pub(crate) struct ScriptedTarget {
        handler: Handler,
        pub(crate) seen: Mutex<Vec<TargetRequest>>,
    }

    impl ScriptedTarget {
        pub(crate) fn new(
            handler: impl Fn(&TargetRequest) -> Result<TargetResponse, TargetError>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn paths(&self) -> Vec<String> {
            self.seen
                .lock()
                .expect("seen lock")
                .iter()
                .map(|request| format!("{} {}", request.method.as_str(), request.path))
                .collect()
        }
    }

    pub(crate) fn ok(body: &str) -> Result<TargetResponse, TargetError> {
        Ok(TargetResponse {
            status: 200,
            text: body.to_string(),
        })
    }

    pub(crate) fn status(code: u16, body: &str) -> Result<TargetResponse, TargetError> {
        Ok(TargetResponse {
            status: code,
            text: body.to_string(),
        })
    }

    #[async_trait]
    impl TargetApp for ScriptedTarget {
        fn base_url(&self) -> &str {
            "http://target.test"
        }

        async fn send(&self, request: &TargetRequest) -> Result<TargetResponse, TargetError> {
            self.seen.lock().expect("seen lock").push(request.clone());
            (self.handler)(request)
        }
    }
}
