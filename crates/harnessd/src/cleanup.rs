//! Scoped deletion of the synthetic rows one client created in the target.

use std::time::Duration;

use harness_core::types::CreatedResources;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::target_data::{Filter, TargetDataStore};

/// One delete statement of a cleanup plan.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupTarget {
    pub table: &'static str,
    pub filter: Filter,
}

/// Deletes for `resources`, children before parents.
pub fn cleanup_plan(resources: &CreatedResources) -> Vec<CleanupTarget> {
    let mut plan = Vec::new();
    if let Some(session) = &resources.chat_session_id {
        plan.push(CleanupTarget {
            table: "chat_messages",
            filter: Filter::eq("session_id", session.as_str()),
        });
        plan.push(CleanupTarget {
            table: "chat_sessions",
            filter: Filter::eq("session_id", session.as_str()),
        });
    }
    if let Some(diagnostic) = &resources.diagnostic_id {
        plan.push(CleanupTarget {
            table: "diagnostic_audits",
            filter: Filter::eq("id", diagnostic.as_str()),
        });
    }
    if let Some(contact) = resources.contact_id {
        plan.push(CleanupTarget {
            table: "contact_submissions",
            filter: Filter::eq("id", contact),
        });
    }
    if let Some(order) = &resources.order_id {
        plan.push(CleanupTarget {
            table: "order_items",
            filter: Filter::eq("order_id", order.as_str()),
        });
        plan.push(CleanupTarget {
            table: "orders",
            filter: Filter::eq("id", order.as_str()),
        });
    }
    plan
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: usize,
    /// Tables whose delete still failed after every attempt.
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.deleted += other.deleted;
        self.failures.extend(other.failures);
    }
}

/// Runs the cleanup plan, retrying only the deletes that failed.
///
/// A failed delete stops the pass so no parent row is removed while its
/// children remain.
pub async fn cleanup_resources(
    store: &dyn TargetDataStore,
    resources: &CreatedResources,
    max_attempts: u32,
    retry_delay: Duration,
) -> CleanupReport {
    let mut pending = cleanup_plan(resources);
    let mut report = CleanupReport::default();
    let mut last_errors = Vec::new();

    for attempt in 1..=max_attempts.max(1) {
        if pending.is_empty() {
            break;
        }
        if attempt > 1 {
            tokio::time::sleep(retry_delay).await;
        }
        last_errors.clear();
        let mut done = 0;
        for target in &pending {
            match store.delete(target.table, std::slice::from_ref(&target.filter)).await {
                Ok(deleted) => {
                    debug!(table = target.table, deleted, "cleanup delete");
                    report.deleted += deleted;
                    done += 1;
                }
                Err(err) => {
                    warn!(table = target.table, attempt, error = %err, "cleanup delete failed");
                    last_errors.push(format!("{}: {err}", target.table));
                    break;
                }
            }
        }
        pending.drain(..done);
    }

    report.failures = last_errors;
    report
}
