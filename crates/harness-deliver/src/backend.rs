use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use harness_core::types::OutputTarget;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::DeliverError;
use crate::types::{DeliveryPackage, DeliveryReceipt};

#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    fn target(&self) -> OutputTarget;

    /// Whether the backend has what it needs to attempt a delivery.
    fn is_configured(&self) -> bool {
        true
    }

    async fn deliver(&self, package: &DeliveryPackage) -> Result<DeliveryReceipt, DeliverError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub request_id: String,
    pub target: OutputTarget,
    pub last_error: String,
    pub attempts: u32,
    pub failed_at: String,
}

#[derive(Debug, Clone)]
pub struct DeadLetterQueue {
    entries: Vec<DeadLetterEntry>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
        }
    }

    pub fn push(&mut self, entry: DeadLetterEntry) {
        if self.max_size == 0 {
            return;
        }

        if self.entries.len() >= self.max_size {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[DeadLetterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(100)
    }
}

pub fn exponential_backoff_delay_ms(config: &RetryConfig, attempt: u32) -> u64 {
    if attempt <= 1 {
        return config.initial_delay_ms;
    }

    let mut delay = config.initial_delay_ms;
    for _ in 1..attempt {
        delay = delay.saturating_mul(config.backoff_multiplier);
    }
    delay
}

/// Delivers with exponential backoff between retryable failures.
///
/// Returns the last error together with the number of attempts made.
pub async fn deliver_with_retry(
    backend: &dyn DeliveryBackend,
    package: &DeliveryPackage,
    config: &RetryConfig,
) -> Result<DeliveryReceipt, (DeliverError, u32)> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match backend.deliver(package).await {
            Ok(receipt) => return Ok(receipt),
            Err(err) => {
                if attempt >= max_attempts || !err.is_retryable() {
                    return Err((err, attempt));
                }

                let delay_ms = exponential_backoff_delay_ms(config, attempt);
                warn!(
                    request_id = %package.request_id,
                    target = %backend.target(),
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms,
                    error = %err,
                    "retrying delivery"
                );
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Routes packages to the backend registered for their output target.
pub struct Deliverer {
    backends: HashMap<OutputTarget, Arc<dyn DeliveryBackend>>,
    retry_config: RetryConfig,
    dead_letters: Mutex<DeadLetterQueue>,
}

impl Deliverer {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self {
            backends: HashMap::new(),
            retry_config,
            dead_letters: Mutex::new(DeadLetterQueue::default()),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn DeliveryBackend>) -> Self {
        self.backends.insert(backend.target(), backend);
        self
    }

    pub fn is_configured(&self, target: OutputTarget) -> bool {
        self.backends
            .get(&target)
            .is_some_and(|backend| backend.is_configured())
    }

    pub async fn deliver(&self, package: &DeliveryPackage) -> Result<DeliveryReceipt, DeliverError> {
        let target = package.options.output;
        let backend = self
            .backends
            .get(&target)
            .cloned()
            .ok_or_else(|| DeliverError::NotConfigured {
                backend: target.as_str().to_string(),
                reason: "no backend registered".to_string(),
            })?;

        match deliver_with_retry(backend.as_ref(), package, &self.retry_config).await {
            Ok(receipt) => {
                info!(
                    request_id = %package.request_id,
                    target = %target,
                    reference = %receipt.reference,
                    "remediation delivered"
                );
                Ok(receipt)
            }
            Err((err, attempts)) => {
                if let Ok(mut queue) = self.dead_letters.lock() {
                    queue.push(DeadLetterEntry {
                        request_id: package.request_id.0.clone(),
                        target,
                        last_error: err.to_string(),
                        attempts,
                        failed_at: Utc::now().to_rfc3339(),
                    });
                }
                Err(err)
            }
        }
    }

    pub fn failed_deliveries(&self) -> Vec<DeadLetterEntry> {
        self.dead_letters
            .lock()
            .map(|queue| queue.entries().to_vec())
            .unwrap_or_default()
    }
}
