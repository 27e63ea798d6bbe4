use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{ClientStatus, RemediationStatus, RunStatus};
use crate::types::{ClientId, ErrorId, ErrorType, RemediationRequestId, RunId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventKind {
    RunStarted {
        run_id: RunId,
    },
    ClientFinished {
        run_id: RunId,
        client_id: ClientId,
        scenario_id: String,
        status: ClientStatus,
    },
    ErrorRecorded {
        run_id: RunId,
        error_id: ErrorId,
        error_type: ErrorType,
    },
    RunFinished {
        run_id: RunId,
        status: RunStatus,
    },
    RemediationUpdated {
        request_id: RemediationRequestId,
        status: RemediationStatus,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RunStarted { .. } => "run_started",
            EventKind::ClientFinished { .. } => "client_finished",
            EventKind::ErrorRecorded { .. } => "error_recorded",
            EventKind::RunFinished { .. } => "run_finished",
            EventKind::RemediationUpdated { .. } => "remediation_updated",
        }
    }

    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            EventKind::RunStarted { run_id }
            | EventKind::ClientFinished { run_id, .. }
            | EventKind::ErrorRecorded { run_id, .. }
            | EventKind::RunFinished { run_id, .. } => Some(run_id),
            EventKind::RemediationUpdated { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

impl HarnessEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventKind, HarnessEvent};
    use crate::state::{ClientStatus, RemediationStatus};
    use crate::types::{ClientId, RemediationRequestId, RunId};
    use chrono::{TimeZone, Utc};

    #[test]
    fn event_kind_serializes_with_snake_case_type_tag() {
        let kind = EventKind::ClientFinished {
            run_id: RunId::new("e2e_run"),
            client_id: ClientId::new("e2e_run_client_1"),
            scenario_id: "quick_browse".to_string(),
            status: ClientStatus::Completed,
        };
        let value = serde_json::to_value(&kind).expect("serialize event kind");
        assert_eq!(value["type"], "client_finished");
        assert_eq!(value["status"], "completed");
        assert_eq!(kind.name(), "client_finished");
    }

    #[test]
    fn event_roundtrip_preserves_timestamp_and_payload() {
        let event = HarnessEvent {
            at: Utc
                .with_ymd_and_hms(2026, 2, 8, 12, 30, 45)
                .single()
                .expect("valid timestamp"),
            kind: EventKind::RemediationUpdated {
                request_id: RemediationRequestId::new("req-1"),
                status: RemediationStatus::ReviewRequired,
            },
        };

        let encoded = serde_json::to_string(&event).expect("serialize event");
        assert!(encoded.contains("review_required"));
        let decoded: HarnessEvent = serde_json::from_str(&encoded).expect("deserialize event");
        assert_eq!(decoded, event);
    }
}
