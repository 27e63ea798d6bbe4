//! Wiring of the harness: one store, one event bus, and the orchestrator and
//! remediation engine built on top of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use harness_core::config::HarnessConfig;
use harness_core::types::{ErrorContext, ErrorId, RunId};
use harness_core::validation::{has_errors, Validate, ValidationLevel};
use harness_deliver::{
    CursorTaskBackend, Deliverer, GithubPrBackend, N8nWorkflowBackend, RetryConfig,
};
use tracing::{info, warn};

use crate::chat_agent::{backend_from_config, AgentSettings, ChatAgent, LlmBackend};
use crate::client::{ClientEnv, ClientSettings};
use crate::event_bus::EventBus;
use crate::event_log::{EventLogError, JsonlEventLog};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::persistence::{PersistenceError, SqliteStore};
use crate::remediation::{RemediationEngine, RemediationSettings};
use crate::target::HttpTarget;
use crate::target_data::{SqliteTargetData, TargetDataError, TargetDataStore, UnconfiguredTargetData};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error(transparent)]
    TargetData(#[from] TargetDataError),
}

pub struct HarnessService {
    pub config: HarnessConfig,
    pub store: Arc<SqliteStore>,
    pub events: EventBus,
    pub event_log: JsonlEventLog,
    pub orchestrator: Orchestrator,
    pub remediation: RemediationEngine,
}

impl HarnessService {
    /// Validates `config`, prepares the on-disk layout and builds every
    /// component from it.
    pub fn open(config: HarnessConfig) -> Result<Self, ServiceError> {
        check_config(&config)?;
        if let Some(parent) = config.store.sqlite_path.parent() {
            create_dir(parent)?;
        }
        let store = SqliteStore::open(&config.store.sqlite_path)?;
        let event_log = JsonlEventLog::new(&config.store.event_log_dir);

        let data: Arc<dyn TargetDataStore> = match &config.target.database_path {
            Some(path) => Arc::new(SqliteTargetData::open(path)?),
            None => {
                warn!("target.database_path is not set; data validation and cleanup are disabled");
                Arc::new(UnconfiguredTargetData)
            }
        };
        let llm = backend_from_config(&config.llm);
        let env = ClientEnv {
            target: Arc::new(HttpTarget::from_config(&config.target)),
            data,
            agent: ChatAgent::new(llm.clone(), AgentSettings::from_config(&config.llm)),
            settings: ClientSettings::from_config(&config),
        };
        let deliverer = deliverer_from_config(&config);

        let service = Self::from_parts(
            config,
            Arc::new(store),
            event_log,
            Arc::new(env),
            llm,
            Arc::new(deliverer),
        );
        service.bootstrap()?;
        info!(
            store = %service.config.store.sqlite_path.display(),
            provider = service.config.llm.provider.as_str(),
            "harness service ready"
        );
        Ok(service)
    }

    /// Assembles a service from prebuilt collaborators. Does not touch disk
    /// beyond what `bootstrap` does.
    pub fn from_parts(
        config: HarnessConfig,
        store: Arc<SqliteStore>,
        event_log: JsonlEventLog,
        env: Arc<ClientEnv>,
        llm: Arc<dyn LlmBackend>,
        deliverer: Arc<Deliverer>,
    ) -> Self {
        let events = EventBus::new().with_log(event_log.clone());
        let orchestrator = Orchestrator::new(
            store.clone(),
            env,
            events.clone(),
            OrchestratorSettings {
                recent_errors_capacity: config.orchestrator.recent_errors_capacity,
                stop_grace: Duration::from_millis(config.orchestrator.stop_grace_ms),
            },
        );
        let remediation = RemediationEngine::new(
            store.clone(),
            llm,
            deliverer,
            events.clone(),
            RemediationSettings::from_config(&config),
        );
        Self {
            config,
            store,
            events,
            event_log,
            orchestrator,
            remediation,
        }
    }

    pub fn bootstrap(&self) -> Result<(), ServiceError> {
        self.store.migrate()?;
        self.event_log.ensure_layout()?;
        Ok(())
    }

    pub fn errors_for_run(&self, run_id: &RunId) -> Result<Vec<ErrorContext>, ServiceError> {
        Ok(self.store.list_errors_for_run(run_id)?)
    }

    pub fn error(&self, error_id: &ErrorId) -> Result<Option<ErrorContext>, ServiceError> {
        Ok(self.store.load_error(error_id)?)
    }
}

fn check_config(config: &HarnessConfig) -> Result<(), ServiceError> {
    let issues = config.validate();
    for issue in issues.iter().filter(|i| i.level == ValidationLevel::Warning) {
        warn!(code = issue.code, "{}", issue.message);
    }
    if has_errors(&issues) {
        let messages: Vec<_> = issues
            .iter()
            .filter(|issue| issue.level == ValidationLevel::Error)
            .map(|issue| issue.message.as_str())
            .collect();
        return Err(ServiceError::InvalidConfig(messages.join("; ")));
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), ServiceError> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|source| ServiceError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Registers every delivery backend; unconfigured ones report themselves so.
pub fn deliverer_from_config(config: &HarnessConfig) -> Deliverer {
    let remediation = &config.remediation;
    let timeout = Duration::from_millis(config.target.request_timeout_ms);
    let callback_base = remediation
        .callback_base_url
        .clone()
        .unwrap_or_else(|| config.target.base_url.clone());
    Deliverer::new(RetryConfig {
        max_attempts: remediation.max_attempts,
        initial_delay_ms: remediation.initial_backoff_ms,
        backoff_multiplier: remediation.backoff_multiplier,
    })
    .with_backend(Arc::new(GithubPrBackend::from_config(remediation, timeout)))
    .with_backend(Arc::new(CursorTaskBackend::new(&remediation.task_dir)))
    .with_backend(Arc::new(N8nWorkflowBackend::new(
        remediation.n8n_webhook_url.clone(),
        callback_base,
        timeout,
    )))
}

#[cfg(test)]
mod tests {
    use harness_core::config::HarnessConfig;
    use harness_core::types::{OutputTarget, RunId};
    use tempfile::TempDir;

    use super::{deliverer_from_config, HarnessService, ServiceError};

    fn config_in(dir: &TempDir) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.store.sqlite_path = dir.path().join("state/harness.sqlite");
        config.store.event_log_dir = dir.path().join("events");
        config.remediation.task_dir = dir.path().join("tasks");
        config
    }

    #[test]
    fn open_prepares_store_and_event_log() {
        let dir = TempDir::new().expect("tempdir");
        let service = HarnessService::open(config_in(&dir)).expect("open service");

        assert!(dir.path().join("state/harness.sqlite").exists());
        assert!(dir.path().join("events/runs").is_dir());
        assert!(service.orchestrator.list(10).expect("list runs").is_empty());
        assert!(service
            .errors_for_run(&RunId::new("missing"))
            .expect("errors")
            .is_empty());
    }

    #[test]
    fn open_rejects_invalid_configuration() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = config_in(&dir);
        config.target.base_url = "localhost".to_string();

        let err = HarnessService::open(config).err().expect("invalid config");
        assert!(matches!(err, ServiceError::InvalidConfig(_)));
        assert!(!dir.path().join("state").exists());
    }

    #[test]
    fn only_the_task_queue_is_configured_by_default() {
        let dir = TempDir::new().expect("tempdir");
        let deliverer = deliverer_from_config(&config_in(&dir));

        assert!(deliverer.is_configured(OutputTarget::CursorTask));
        assert!(!deliverer.is_configured(OutputTarget::N8nWorkflow));
    }
}
