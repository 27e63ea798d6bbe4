//! Status vocabularies shared by runs, clients, errors and remediation
//! requests, together with the transition rules each one obeys.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid {machine} transition: {from} -> {to}")]
    Invalid {
        machine: &'static str,
        from: String,
        to: String,
    },
    #[error("unknown {machine} status '{value}'")]
    Unknown { machine: &'static str, value: String },
}

/// Lifecycle of one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Pending | RunStatus::Running, RunStatus::Cancelled) => true,
            (RunStatus::Running, RunStatus::Completed | RunStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(TransitionError::Unknown {
                machine: "run",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of one simulated client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ClientStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Created => "created",
            ClientStatus::Running => "running",
            ClientStatus::Completed => "completed",
            ClientStatus::Failed => "failed",
            ClientStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClientStatus::Completed | ClientStatus::Failed | ClientStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: ClientStatus) -> bool {
        match (self, next) {
            (ClientStatus::Created, ClientStatus::Running) => true,
            (ClientStatus::Created, ClientStatus::Cancelled) => true,
            (ClientStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClientStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "created" => Ok(ClientStatus::Created),
            "running" => Ok(ClientStatus::Running),
            "completed" => Ok(ClientStatus::Completed),
            "failed" => Ok(ClientStatus::Failed),
            "cancelled" => Ok(ClientStatus::Cancelled),
            other => Err(TransitionError::Unknown {
                machine: "client",
                value: other.to_string(),
            }),
        }
    }
}

/// Coarse status surfaced in the live-activity view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Running,
    Completing,
    Error,
}

/// Per-error remediation marker, independent of any request's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRemediationStatus {
    #[default]
    Pending,
    InProgress,
    Fixed,
    Ignored,
    WontFix,
}

impl ErrorRemediationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorRemediationStatus::Pending => "pending",
            ErrorRemediationStatus::InProgress => "in_progress",
            ErrorRemediationStatus::Fixed => "fixed",
            ErrorRemediationStatus::Ignored => "ignored",
            ErrorRemediationStatus::WontFix => "wont_fix",
        }
    }

    /// Statuses accepted by the request-level bulk reconciliation.
    pub fn is_resolution(self) -> bool {
        matches!(
            self,
            ErrorRemediationStatus::Fixed | ErrorRemediationStatus::WontFix
        )
    }
}

impl std::fmt::Display for ErrorRemediationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorRemediationStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(ErrorRemediationStatus::Pending),
            "in_progress" => Ok(ErrorRemediationStatus::InProgress),
            "fixed" => Ok(ErrorRemediationStatus::Fixed),
            "ignored" => Ok(ErrorRemediationStatus::Ignored),
            "wont_fix" => Ok(ErrorRemediationStatus::WontFix),
            other => Err(TransitionError::Unknown {
                machine: "error remediation",
                value: other.to_string(),
            }),
        }
    }
}

/// Lifecycle of a remediation request.
///
/// The forward chain is `pending -> analyzing -> generating_fix ->
/// review_required -> applied`. `generating_fix` may jump straight to
/// `applied` when an automated delivery target succeeds. `failed` is
/// reachable from `analyzing` and `generating_fix`; `rejected` from any
/// non-terminal state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    #[default]
    Pending,
    Analyzing,
    GeneratingFix,
    ReviewRequired,
    Applied,
    Failed,
    Rejected,
}

impl RemediationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationStatus::Pending => "pending",
            RemediationStatus::Analyzing => "analyzing",
            RemediationStatus::GeneratingFix => "generating_fix",
            RemediationStatus::ReviewRequired => "review_required",
            RemediationStatus::Applied => "applied",
            RemediationStatus::Failed => "failed",
            RemediationStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RemediationStatus::Applied | RemediationStatus::Failed | RemediationStatus::Rejected
        )
    }

    /// Whether the pipeline is still working on the request.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            RemediationStatus::Pending | RemediationStatus::Analyzing | RemediationStatus::GeneratingFix
        )
    }

    pub fn can_transition_to(self, next: RemediationStatus) -> bool {
        use RemediationStatus::*;
        match (self, next) {
            (from, Rejected) => !from.is_terminal(),
            (Pending, Analyzing) => true,
            (Analyzing, GeneratingFix | Failed) => true,
            (GeneratingFix, ReviewRequired | Applied | Failed) => true,
            (ReviewRequired, Applied) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: RemediationStatus) -> Result<RemediationStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Invalid {
                machine: "remediation",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RemediationStatus {
    type Err = TransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(RemediationStatus::Pending),
            "analyzing" => Ok(RemediationStatus::Analyzing),
            "generating_fix" => Ok(RemediationStatus::GeneratingFix),
            "review_required" => Ok(RemediationStatus::ReviewRequired),
            "applied" => Ok(RemediationStatus::Applied),
            "failed" => Ok(RemediationStatus::Failed),
            "rejected" => Ok(RemediationStatus::Rejected),
            other => Err(TransitionError::Unknown {
                machine: "remediation",
                value: other.to_string(),
            }),
        }
    }
}
