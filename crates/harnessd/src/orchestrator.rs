//! Run lifecycle: spawns simulated clients under a concurrency bound, tracks
//! live progress and persists every outcome.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use harness_core::events::EventKind;
use harness_core::persona::{generate_test_email, resolve_personas, Persona, PersonaInstance};
use harness_core::scenario::{resolve_selection, weighted_choice, CatalogError, Scenario};
use harness_core::state::{ClientStatus, RunStatus};
use harness_core::types::{
    ClientId, ClientSession, CreatedResources, ErrorContext, ErrorType, LiveActivity, Run,
    RunConfig, RunId, ScenarioBreakdown,
};
use harness_core::validation::{has_errors, Validate, ValidationLevel};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::{cleanup_resources, CleanupReport};
use crate::client::{ClientEnv, ClientOutcome, ProgressSink, SimulatedClient};
use crate::event_bus::EventBus;
use crate::persistence::{PersistenceError, PurgeReport, SqliteStore};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },
    #[error("run {run_id} is still {status}")]
    RunNotTerminal { run_id: String, status: RunStatus },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("orchestrator state lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub recent_errors_capacity: usize,
    /// How long a stopped run waits for in-flight clients before abandoning them.
    pub stop_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            recent_errors_capacity: 10,
            stop_grace: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusView {
    pub run: Run,
    pub active: bool,
    pub clients_running: usize,
    pub live_activity: Vec<LiveActivity>,
    /// Newest first.
    pub recent_errors: Vec<ErrorContext>,
    pub average_duration_ms: Option<i64>,
    pub scenario_breakdown: BTreeMap<String, ScenarioBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run: Run,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Completed share of finished clients, 0.0 to 1.0.
    pub success_rate: f64,
    pub unique_error_types: Vec<ErrorType>,
    pub total_duration_ms: i64,
    pub average_duration_by_scenario: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub run: Run,
    pub sessions: Vec<ClientSession>,
    pub errors: Vec<ErrorContext>,
    pub metrics: RunMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub success: bool,
    pub deleted_count: usize,
    pub failures: Vec<String>,
}

// ---------------------------------------------------------------------------
// Live state of one executing run
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LiveState {
    activity: BTreeMap<ClientId, LiveActivity>,
    /// Snapshot of every client that has not reported its outcome yet.
    sessions: BTreeMap<ClientId, ClientSession>,
    recent_errors: VecDeque<ErrorContext>,
}

struct ActiveRun {
    run_id: RunId,
    cancel: CancellationToken,
    state: Mutex<LiveState>,
    done: watch::Sender<bool>,
}

impl ActiveRun {
    fn state(&self) -> Result<MutexGuard<'_, LiveState>, OrchestratorError> {
        self.state.lock().map_err(|_| OrchestratorError::Poisoned)
    }
}

struct RunProgress(Arc<ActiveRun>);

impl ProgressSink for RunProgress {
    fn report(&self, activity: LiveActivity) {
        let Ok(mut state) = self.0.state() else {
            warn!(run_id = %self.0.run_id, "live state unavailable; dropping progress");
            return;
        };
        if let Some(session) = state.sessions.get_mut(&activity.client_id) {
            session.current_step_index = activity.current_step_index;
        }
        state.activity.insert(activity.client_id.clone(), activity);
    }

    fn resources(&self, client_id: &ClientId, resources: &CreatedResources) {
        let Ok(mut state) = self.0.state() else {
            warn!(run_id = %self.0.run_id, client_id = %client_id, "live state unavailable; dropping resources");
            return;
        };
        if let Some(session) = state.sessions.get_mut(client_id) {
            session.created_resources = resources.clone();
        }
    }
}

fn passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Inner {
    store: Arc<SqliteStore>,
    env: Arc<ClientEnv>,
    events: EventBus,
    settings: OrchestratorSettings,
    active: Mutex<HashMap<RunId, Arc<ActiveRun>>>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SqliteStore>,
        env: Arc<ClientEnv>,
        events: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                env,
                events,
                settings,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn active_runs(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<RunId, Arc<ActiveRun>>>, OrchestratorError> {
        self.inner
            .active
            .lock()
            .map_err(|_| OrchestratorError::Poisoned)
    }

    fn active_run(&self, run_id: &RunId) -> Result<Option<Arc<ActiveRun>>, OrchestratorError> {
        Ok(self.active_runs()?.get(run_id).cloned())
    }

    fn load_run(&self, run_id: &RunId) -> Result<Run, OrchestratorError> {
        self.inner
            .store
            .load_run(run_id)?
            .ok_or_else(|| OrchestratorError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    /// Validates `config`, records the run and starts spawning clients.
    pub fn start(&self, config: RunConfig) -> Result<Run, OrchestratorError> {
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
            return Err(OrchestratorError::InvalidConfig(messages.join("; ")));
        }
        let scenarios = resolve_selection(&config.selection())?;
        let personas = resolve_personas(&config.persona_ids)?;

        let now = Utc::now();
        // Ids are millisecond-based; step forward past any collision.
        let mut run_id = RunId::generate(now);
        let mut offset = 1;
        while self.inner.store.load_run(&run_id)?.is_some() {
            run_id = RunId::generate(now + chrono::Duration::milliseconds(offset));
            offset += 1;
        }
        let run = Run::new(run_id, config, now);
        self.inner.store.upsert_run(&run)?;

        let (done, _) = watch::channel(false);
        let active = Arc::new(ActiveRun {
            run_id: run.id.clone(),
            cancel: CancellationToken::new(),
            state: Mutex::new(LiveState::default()),
            done,
        });
        self.active_runs()?.insert(run.id.clone(), active.clone());
        self.inner.events.publish(EventKind::RunStarted {
            run_id: run.id.clone(),
        });
        info!(
            run_id = %run.id,
            scenarios = scenarios.len(),
            personas = personas.len(),
            max_concurrent = run.config.max_concurrent_clients,
            duration_ms = run.config.run_duration_ms,
            "run started"
        );

        let this = self.clone();
        let config = run.config.clone();
        tokio::spawn(async move {
            let result = this.drive(&active, &config, scenarios, personas).await;
            this.finish_run(&active, result);
        });
        Ok(run)
    }

    async fn drive(
        &self,
        active: &Arc<ActiveRun>,
        config: &RunConfig,
        scenarios: Vec<&'static Scenario>,
        personas: Vec<&'static Persona>,
    ) -> Result<(), OrchestratorError> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_clients));
        let deadline = (config.run_duration_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(config.run_duration_ms));
        let cap = config.spawn_cap();
        let pacing = (config.run_duration_ms > 0 && config.spawn_interval_ms > 0)
            .then(|| Duration::from_millis(config.spawn_interval_ms));
        let pool: Vec<(&'static Scenario, u32)> = scenarios
            .iter()
            .map(|scenario| (*scenario, config.weight_of(&scenario.id)))
            .collect();

        let mut clients = JoinSet::new();
        let mut spawned: usize = 0;
        let mut failure = None;
        loop {
            if cap.is_some_and(|cap| spawned >= cap) || passed(deadline) {
                break;
            }
            // Stop and deadline win over a slot that frees up at the same instant.
            let permit = tokio::select! {
                biased;
                _ = active.cancel.cancelled() => break,
                _ = until(deadline) => break,
                Some(_) = clients.join_next(), if !clients.is_empty() => continue,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let scenario = weighted_choice(&pool, &mut rand::thread_rng()).copied();
            let persona = personas.choose(&mut rand::thread_rng()).copied();
            let (Some(scenario), Some(persona)) = (scenario, persona) else {
                break;
            };
            spawned += 1;
            let instance = PersonaInstance {
                email: generate_test_email(&persona.id, Utc::now()),
                persona: persona.clone(),
            };
            let client = SimulatedClient::new(
                self.inner.env.clone(),
                active.run_id.clone(),
                spawned as u32,
                instance,
                scenario.clone(),
                active.cancel.child_token(),
            )
            .with_progress(Arc::new(RunProgress(active.clone())))
            .with_cleanup(config.cleanup_after);

            if let Err(err) = self.register_client(active, &client) {
                error!(run_id = %active.run_id, error = %err, "failed to register client");
                failure = Some(err);
                active.cancel.cancel();
                break;
            }
            debug!(
                run_id = %active.run_id,
                client_id = %client.client_id(),
                scenario = %scenario.id,
                persona = %persona.id,
                "client spawned"
            );

            let this = self.clone();
            let run = active.clone();
            clients.spawn(async move {
                let outcome = client.run().await;
                this.finish_client(&run, outcome);
                drop(permit);
            });

            if let Some(interval) = pacing {
                tokio::select! {
                    biased;
                    _ = active.cancel.cancelled() => break,
                    _ = until(deadline) => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        // In-flight clients finish on their own unless the run is stopped.
        if !active.cancel.is_cancelled() {
            loop {
                tokio::select! {
                    biased;
                    _ = active.cancel.cancelled() => break,
                    next = clients.join_next() => if next.is_none() { break },
                }
            }
        }

        if active.cancel.is_cancelled() {
            let grace = tokio::time::sleep(self.inner.settings.stop_grace);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    _ = &mut grace => break,
                    next = clients.join_next() => if next.is_none() { break },
                }
            }
            if !clients.is_empty() {
                warn!(
                    run_id = %active.run_id,
                    remaining = clients.len(),
                    "stop grace elapsed; abandoning clients"
                );
            }
            clients.shutdown().await;
            self.abandon_remaining(active);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Makes a spawned client visible in live state and in the store.
    fn register_client(
        &self,
        active: &ActiveRun,
        client: &SimulatedClient,
    ) -> Result<(), OrchestratorError> {
        {
            let mut state = active.state()?;
            state.activity.insert(client.client_id().clone(), client.live_activity());
            state
                .sessions
                .insert(client.client_id().clone(), client.session().clone());
        }
        self.inner.store.upsert_client_session(client.session())?;
        self.inner.store.increment_clients_spawned(&active.run_id)?;
        Ok(())
    }

    /// Persists one client's outcome; runs on the client's task.
    fn finish_client(&self, active: &ActiveRun, outcome: ClientOutcome) {
        let store = &self.inner.store;
        let session = &outcome.session;
        let mut recorded = Vec::with_capacity(outcome.errors.len());
        for error in &outcome.errors {
            if let Err(err) = store.insert_error(error) {
                error!(error_id = %error.error_id, error = %err, "failed to persist error");
                continue;
            }
            self.inner.events.publish(EventKind::ErrorRecorded {
                run_id: error.run_id.clone(),
                error_id: error.error_id.clone(),
                error_type: error.error_type,
            });
            recorded.push(error);
        }
        if let Err(err) = store.upsert_client_session(session) {
            error!(client_id = %session.client_id, error = %err, "failed to persist session");
        }
        if let Err(err) = store.record_client_outcome(&session.run_id, session.status) {
            error!(client_id = %session.client_id, error = %err, "failed to count client outcome");
        }

        match active.state() {
            Ok(mut state) => {
                let capacity = self.inner.settings.recent_errors_capacity;
                state.activity.remove(&session.client_id);
                state.sessions.remove(&session.client_id);
                for error in recorded {
                    state.recent_errors.push_front(error.clone());
                }
                state.recent_errors.truncate(capacity);
            }
            Err(err) => error!(client_id = %session.client_id, error = %err, "failed to update live state"),
        }
        self.inner.events.publish(EventKind::ClientFinished {
            run_id: session.run_id.clone(),
            client_id: session.client_id.clone(),
            scenario_id: session.scenario_id.clone(),
            status: session.status,
        });
    }

    /// Marks clients that never reported back as cancelled, keeping the
    /// resources they had created so a later cleanup can find them.
    fn abandon_remaining(&self, active: &ActiveRun) {
        let abandoned: Vec<ClientSession> = match active.state() {
            Ok(mut state) => {
                state.activity.clear();
                std::mem::take(&mut state.sessions).into_values().collect()
            }
            Err(err) => {
                error!(run_id = %active.run_id, error = %err, "abandoned sessions lost");
                return;
            }
        };
        let now = Utc::now();
        for mut session in abandoned {
            session.status = ClientStatus::Cancelled;
            session.completed_at = Some(now);
            if let Err(err) = self.inner.store.upsert_client_session(&session) {
                error!(client_id = %session.client_id, error = %err, "failed to persist abandoned session");
            }
        }
    }

    fn finish_run(&self, active: &ActiveRun, result: Result<(), OrchestratorError>) {
        let run_id = &active.run_id;
        let status = match (&result, self.inner.store.load_run(run_id)) {
            (Err(err), _) => {
                error!(run_id = %run_id, error = %err, "run aborted");
                RunStatus::Failed
            }
            (Ok(()), Ok(Some(run))) if run.clients_failed > 0 => RunStatus::Failed,
            (Ok(()), Ok(_)) => RunStatus::Completed,
            (Ok(()), Err(err)) => {
                error!(run_id = %run_id, error = %err, "failed to reload run");
                RunStatus::Failed
            }
        };
        match self.inner.store.finish_run(run_id, status, Utc::now()) {
            Ok(true) => {
                info!(run_id = %run_id, status = %status, "run finished");
                self.inner.events.publish(EventKind::RunFinished {
                    run_id: run_id.clone(),
                    status,
                });
            }
            Ok(false) => debug!(run_id = %run_id, "run already terminal"),
            Err(err) => error!(run_id = %run_id, error = %err, "failed to finish run"),
        }
        match self.active_runs() {
            Ok(mut runs) => {
                runs.remove(run_id);
            }
            Err(err) => error!(run_id = %run_id, error = %err, "failed to release run"),
        }
        let _ = active.done.send(true);
    }

    /// Cancels a non-terminal run. Returns false when it was already terminal.
    pub fn stop(&self, run_id: &RunId) -> Result<bool, OrchestratorError> {
        let run = self.load_run(run_id)?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        let changed = self
            .inner
            .store
            .finish_run(run_id, RunStatus::Cancelled, Utc::now())?;
        if let Some(active) = self.active_run(run_id)? {
            active.cancel.cancel();
        }
        if changed {
            info!(run_id = %run_id, "run stopped");
            self.inner.events.publish(EventKind::RunFinished {
                run_id: run_id.clone(),
                status: RunStatus::Cancelled,
            });
        }
        Ok(changed)
    }

    /// Cancels every executing run.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<RunId> = match self.active_runs() {
            Ok(runs) => runs.keys().cloned().collect(),
            Err(err) => {
                error!(error = %err, "cannot list active runs");
                return 0;
            }
        };
        ids.iter()
            .filter(|run_id| matches!(self.stop(run_id), Ok(true)))
            .count()
    }

    /// Resolves once the run's scheduler and clients have all finished.
    pub async fn wait(&self, run_id: &RunId) -> Result<Run, OrchestratorError> {
        if let Some(active) = self.active_run(run_id)? {
            let mut done = active.done.subscribe();
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.load_run(run_id)
    }

    pub fn is_active(&self, run_id: &RunId) -> Result<bool, OrchestratorError> {
        Ok(self.active_runs()?.contains_key(run_id))
    }

    pub fn status(&self, run_id: &RunId) -> Result<RunStatusView, OrchestratorError> {
        let run = self.load_run(run_id)?;
        let sessions = self.inner.store.list_client_sessions(run_id)?;
        let capacity = self.inner.settings.recent_errors_capacity;

        let (active, live_activity, recent_errors) = match self.active_run(run_id)? {
            Some(active) => {
                let state = active.state()?;
                (
                    true,
                    state.activity.values().cloned().collect::<Vec<_>>(),
                    state.recent_errors.iter().cloned().collect::<Vec<_>>(),
                )
            }
            None => {
                let mut errors = self.inner.store.list_errors_for_run(run_id)?;
                errors.reverse();
                errors.truncate(capacity);
                (false, Vec::new(), errors)
            }
        };

        let mut breakdown: BTreeMap<String, ScenarioBreakdown> = BTreeMap::new();
        let mut durations = Vec::new();
        let mut running = 0;
        for session in &sessions {
            let entry = breakdown.entry(session.scenario_id.clone()).or_default();
            entry.total += 1;
            match session.status {
                ClientStatus::Completed => entry.passed += 1,
                ClientStatus::Failed => entry.failed += 1,
                ClientStatus::Created | ClientStatus::Running => {
                    entry.running += 1;
                    running += 1;
                }
                ClientStatus::Cancelled => {}
            }
            if let Some(duration) = session.duration_ms() {
                durations.push(duration);
            }
        }
        let average_duration_ms = (!durations.is_empty())
            .then(|| durations.iter().sum::<i64>() / durations.len() as i64);

        Ok(RunStatusView {
            run,
            active,
            clients_running: if active { live_activity.len() } else { running },
            live_activity,
            recent_errors,
            average_duration_ms,
            scenario_breakdown: breakdown,
        })
    }

    pub fn list(&self, limit: usize) -> Result<Vec<RunSummary>, OrchestratorError> {
        let runs = self.inner.store.list_runs(limit)?;
        let active = self.active_runs()?;
        Ok(runs
            .into_iter()
            .map(|run| RunSummary {
                active: active.contains_key(&run.id),
                run,
            })
            .collect())
    }

    pub fn results(&self, run_id: &RunId) -> Result<RunResults, OrchestratorError> {
        let run = self.load_run(run_id)?;
        let sessions = self.inner.store.list_client_sessions(run_id)?;
        let errors = self.inner.store.list_errors_for_run(run_id)?;

        let finished = run.clients_finished();
        let success_rate = if finished == 0 {
            0.0
        } else {
            f64::from(run.clients_completed) / f64::from(finished)
        };
        let unique_error_types: BTreeSet<ErrorType> =
            errors.iter().map(|error| error.error_type).collect();

        let mut per_scenario: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for session in &sessions {
            if let Some(duration) = session.duration_ms() {
                per_scenario
                    .entry(session.scenario_id.clone())
                    .or_default()
                    .push(duration);
            }
        }
        let average_duration_by_scenario = per_scenario
            .into_iter()
            .map(|(scenario, durations)| {
                let average = durations.iter().sum::<i64>() / durations.len() as i64;
                (scenario, average)
            })
            .collect();

        Ok(RunResults {
            metrics: RunMetrics {
                success_rate,
                unique_error_types: unique_error_types.into_iter().collect(),
                total_duration_ms: run.duration_ms(Utc::now()),
                average_duration_by_scenario,
            },
            run,
            sessions,
            errors,
        })
    }

    /// Deletes every synthetic row the run's clients created. Only terminal
    /// runs are eligible.
    pub async fn cleanup(&self, run_id: &RunId) -> Result<CleanupOutcome, OrchestratorError> {
        let run = self.load_run(run_id)?;
        if !run.status.is_terminal() || self.is_active(run_id)? {
            return Err(OrchestratorError::RunNotTerminal {
                run_id: run_id.0.clone(),
                status: run.status,
            });
        }
        let settings = &self.inner.env.settings;
        let mut report = CleanupReport::default();
        for session in self.inner.store.list_client_sessions(run_id)? {
            let partial = cleanup_resources(
                self.inner.env.data.as_ref(),
                &session.created_resources,
                settings.cleanup_attempts,
                settings.cleanup_retry_delay,
            )
            .await;
            report.merge(partial);
        }
        self.inner.store.mark_run_cleaned(run_id, Utc::now())?;
        info!(
            run_id = %run_id,
            deleted = report.deleted,
            failures = report.failures.len(),
            "run cleanup finished"
        );
        Ok(CleanupOutcome {
            success: report.is_complete(),
            deleted_count: report.deleted,
            failures: report.failures,
        })
    }

    /// Removes harness records of terminal runs older than `days`.
    pub fn purge_older_than(&self, days: u32) -> Result<PurgeReport, OrchestratorError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let report = self.inner.store.purge_runs_older_than(cutoff)?;
        info!(days, runs = report.runs, total = report.total(), "purged old runs");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use harness_core::events::EventKind;
    use harness_core::state::{ClientStatus, RunStatus};
    use harness_core::types::{ErrorType, RunConfig, RunId};
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;

    use super::{ActiveRun, LiveState, Orchestrator, OrchestratorError, OrchestratorSettings};
    use crate::client::fixtures::env;
    use crate::client::ClientOutcome;
    use crate::event_bus::EventBus;
    use crate::persistence::fixtures::error;
    use crate::persistence::SqliteStore;
    use crate::target::fixtures::{ok, status, ScriptedTarget};
    use crate::target::{TargetApp, TargetError, TargetRequest, TargetResponse};
    use crate::target_data::fixtures::target_store;
    use crate::target_data::{SqliteTargetData, TargetDataStore};

    fn store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().expect("open store");
        store.migrate().expect("migrate");
        Arc::new(store)
    }

    fn orchestrator(target: Arc<ScriptedTarget>) -> (Orchestrator, Arc<SqliteStore>, EventBus) {
        orchestrator_with(target, Arc::new(target_store()))
    }

    fn orchestrator_with(
        target: Arc<dyn TargetApp>,
        data: Arc<SqliteTargetData>,
    ) -> (Orchestrator, Arc<SqliteStore>, EventBus) {
        let store = store();
        let events = EventBus::new();
        let orchestrator = Orchestrator::new(
            store.clone(),
            env(target, data),
            events.clone(),
            OrchestratorSettings {
                recent_errors_capacity: 3,
                stop_grace: Duration::from_secs(2),
            },
        );
        (orchestrator, store, events)
    }

    fn pages_ok() -> Arc<ScriptedTarget> {
        Arc::new(ScriptedTarget::new(|_| ok("<html></html>")))
    }

    fn pages_missing() -> Arc<ScriptedTarget> {
        Arc::new(ScriptedTarget::new(|_| status(404, "not found")))
    }

    fn wave(clients: usize) -> RunConfig {
        RunConfig {
            scenario_ids: vec!["quick_browse".to_string()],
            max_concurrent_clients: clients,
            run_duration_ms: 0,
            cleanup_after: false,
            ..RunConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wave_run_completes_every_client() {
        let (orchestrator, store, events) = orchestrator(pages_ok());
        let mut rx = events.subscribe();

        let run = orchestrator.start(wave(2)).expect("start");
        assert_eq!(run.status, RunStatus::Running);
        let run = orchestrator.wait(&run.id).await.expect("wait");

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.clients_spawned, 2);
        assert_eq!(run.clients_completed, 2);
        assert_eq!(run.clients_failed, 0);
        assert!(run.completed_at.is_some());
        assert!(!orchestrator.is_active(&run.id).expect("active runs"));

        let sessions = store.list_client_sessions(&run.id).expect("sessions");
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.status == ClientStatus::Completed
            && s.current_step_index == s.total_steps));

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.kind.name());
        }
        assert_eq!(names.first(), Some(&"run_started"));
        assert_eq!(names.last(), Some(&"run_finished"));
        assert_eq!(names.iter().filter(|n| **n == "client_finished").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_clients_fail_the_run_and_surface_errors() {
        let (orchestrator, store, _) = orchestrator(pages_missing());
        let run = orchestrator.start(wave(3)).expect("start");
        let run = orchestrator.wait(&run.id).await.expect("wait");

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.clients_failed, 3);
        assert!(run.clients_finished() <= run.clients_spawned);

        let errors = store.list_errors_for_run(&run.id).expect("errors");
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().all(|e| e.error_type == ErrorType::NavigationError));

        let view = orchestrator.status(&run.id).expect("status");
        assert!(!view.active);
        assert_eq!(view.recent_errors.len(), 3);
        assert_eq!(view.scenario_breakdown["quick_browse"].failed, 3);

        let results = orchestrator.results(&run.id).expect("results");
        assert_eq!(results.metrics.success_rate, 0.0);
        assert_eq!(results.metrics.unique_error_types, vec![ErrorType::NavigationError]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_run_respects_max_clients() {
        let (orchestrator, _, _) = orchestrator(pages_ok());
        let config = RunConfig {
            scenario_ids: vec!["quick_browse".to_string()],
            max_concurrent_clients: 2,
            spawn_interval_ms: 100,
            run_duration_ms: 60_000,
            max_clients: Some(3),
            cleanup_after: false,
            ..RunConfig::default()
        };
        let run = orchestrator.start(config).expect("start");
        let run = orchestrator.wait(&run.id).await.expect("wait");
        assert_eq!(run.clients_spawned, 3);
        assert_eq!(run.clients_completed, 3);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_weight_scenarios_are_never_picked() {
        let (orchestrator, store, _) = orchestrator(pages_ok());
        let config = RunConfig {
            scenario_ids: vec!["quick_browse".to_string(), "browse_and_buy".to_string()],
            scenario_weights: BTreeMap::from([("browse_and_buy".to_string(), 0)]),
            ..wave(3)
        };
        let run = orchestrator.start(config).expect("start");
        let run = orchestrator.wait(&run.id).await.expect("wait");
        let sessions = store.list_client_sessions(&run.id).expect("sessions");
        assert!(sessions.iter().all(|s| s.scenario_id == "quick_browse"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_run_once() {
        let (orchestrator, store, events) = orchestrator(pages_ok());
        let mut rx = events.subscribe();
        let config = RunConfig {
            scenario_ids: vec!["quick_browse".to_string()],
            max_concurrent_clients: 2,
            spawn_interval_ms: 1_000,
            run_duration_ms: 600_000,
            cleanup_after: false,
            ..RunConfig::default()
        };
        let run = orchestrator.start(config).expect("start");
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(orchestrator.stop(&run.id).expect("stop"));
        assert!(!orchestrator.stop(&run.id).expect("second stop"));
        let run = orchestrator.wait(&run.id).await.expect("wait");

        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.clients_spawned >= 1);
        assert!(run.clients_finished() <= run.clients_spawned);
        let sessions = store.list_client_sessions(&run.id).expect("sessions");
        assert!(sessions
            .iter()
            .all(|s| s.status != ClientStatus::Running && s.status != ClientStatus::Created));
        assert!(sessions.iter().any(|s| s.status == ClientStatus::Cancelled));
        let errors = store.list_errors_for_run(&run.id).expect("errors");
        assert!(errors.iter().all(|e| e.error_type != ErrorType::Cancelled));
        assert_eq!(errors.len(), run.clients_failed as usize);

        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if let EventKind::RunFinished { status, .. } = event.kind {
                assert_eq!(status, RunStatus::Cancelled);
                finished += 1;
            }
        }
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn invalid_configs_are_rejected_before_a_run_exists() {
        let (orchestrator, store, _) = orchestrator(pages_ok());
        let err = orchestrator
            .start(RunConfig {
                max_concurrent_clients: 0,
                ..wave(1)
            })
            .expect_err("zero concurrency");
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));

        let err = orchestrator
            .start(RunConfig {
                scenario_ids: vec!["nope".to_string()],
                ..wave(1)
            })
            .expect_err("unknown scenario");
        assert!(err.to_string().contains("nope"));
        assert!(store.list_runs(10).expect("runs").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_requires_a_terminal_run() {
        let (orchestrator, _, _) = orchestrator(pages_ok());
        let config = RunConfig {
            run_duration_ms: 600_000,
            spawn_interval_ms: 1_000,
            ..wave(1)
        };
        let run = orchestrator.start(config).expect("start");
        let err = orchestrator.cleanup(&run.id).await.expect_err("still running");
        assert!(matches!(err, OrchestratorError::RunNotTerminal { .. }));

        orchestrator.stop(&run.id).expect("stop");
        orchestrator.wait(&run.id).await.expect("wait");
        let outcome = orchestrator.cleanup(&run.id).await.expect("cleanup");
        assert!(outcome.success);
        assert_eq!(outcome.deleted_count, 0);

        let missing = orchestrator.cleanup(&RunId::new("missing")).await;
        assert!(matches!(missing, Err(OrchestratorError::RunNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn list_marks_active_runs() {
        let (orchestrator, _, _) = orchestrator(pages_ok());
        let finished = orchestrator.start(wave(1)).expect("start");
        orchestrator.wait(&finished.id).await.expect("wait");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let running = orchestrator
            .start(RunConfig {
                run_duration_ms: 600_000,
                ..wave(1)
            })
            .expect("start");

        let summaries = orchestrator.list(10).expect("list");
        let active: Vec<_> = summaries
            .iter()
            .filter(|s| s.active)
            .map(|s| s.run.id.clone())
            .collect();
        assert_eq!(active, vec![running.id.clone()]);
        assert_eq!(orchestrator.stop_all(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_client_is_spawned_once_the_deadline_passes() {
        let (orchestrator, store, _) = orchestrator(pages_ok());
        for _ in 0..20 {
            let config = RunConfig {
                scenario_ids: vec!["quick_browse".to_string()],
                max_concurrent_clients: 1,
                spawn_interval_ms: 5_000,
                run_duration_ms: 5_000,
                cleanup_after: false,
                ..RunConfig::default()
            };
            let run = orchestrator.start(config).expect("start");
            let run = orchestrator.wait(&run.id).await.expect("wait");
            assert_eq!(run.clients_spawned, 1, "run {}", run.id);
            assert_eq!(store.list_client_sessions(&run.id).expect("sessions").len(), 1);
        }
    }

    /// Target that answers after a delay and tracks concurrent requests.
    #[derive(Default)]
    struct SlowPages {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TargetApp for SlowPages {
        fn base_url(&self) -> &str {
            "http://target.test"
        }

        async fn send(&self, _request: &TargetRequest) -> Result<TargetResponse, TargetError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ok("<html></html>")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_the_ceiling() {
        let target = Arc::new(SlowPages::default());
        let (orchestrator, _, _) = orchestrator_with(target.clone(), Arc::new(target_store()));
        let config = RunConfig {
            scenario_ids: vec!["quick_browse".to_string()],
            max_concurrent_clients: 3,
            spawn_interval_ms: 10,
            run_duration_ms: 60_000,
            max_clients: Some(9),
            cleanup_after: false,
            ..RunConfig::default()
        };
        let run = orchestrator.start(config).expect("start");

        let mut peak_running = 0;
        loop {
            let view = orchestrator.status(&run.id).expect("status");
            if !view.active {
                break;
            }
            peak_running = peak_running.max(view.clients_running);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let run = orchestrator.wait(&run.id).await.expect("wait");

        assert_eq!(run.clients_spawned, 9);
        assert!(peak_running <= 3, "saw {peak_running} live clients");
        assert_eq!(peak_running, 3);
        assert!(target.peak.load(Ordering::SeqCst) <= 3);
    }

    /// Target backed by `data`: contact submissions insert a row with a fresh id.
    fn contact_rows(data: Arc<SqliteTargetData>) -> Arc<ScriptedTarget> {
        let next_id = AtomicI64::new(1);
        Arc::new(ScriptedTarget::new(move |request| {
            if request.path == "/api/contact" {
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                data.execute_batch(&format!(
                    "INSERT INTO contact_submissions (id, name, email, lead_score) VALUES ({id}, 'Visitor', 'visitor@test', 90)"
                ))
                .expect("insert contact");
                ok(&format!(r#"{{"id":{id}}}"#))
            } else {
                ok("<html></html>")
            }
        }))
    }

    async fn contact_ids(data: &SqliteTargetData) -> Vec<i64> {
        let mut ids: Vec<i64> = data
            .select("contact_submissions", &[], None)
            .await
            .expect("select")
            .iter()
            .filter_map(|row| row.get("id").and_then(|id| id.as_i64()))
            .collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_only_touches_the_runs_own_rows() {
        let data = Arc::new(target_store());
        let (orchestrator, _, _) = orchestrator_with(contact_rows(data.clone()), data.clone());
        let inquiry = RunConfig {
            scenario_ids: vec!["service_inquiry".to_string()],
            ..wave(1)
        };

        let first = orchestrator.start(inquiry.clone()).expect("start first");
        let first = orchestrator.wait(&first.id).await.expect("wait first");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = orchestrator.start(inquiry).expect("start second");
        let second = orchestrator.wait(&second.id).await.expect("wait second");
        assert_eq!(contact_ids(&data).await, vec![1, 2]);

        let outcome = orchestrator.cleanup(&first.id).await.expect("cleanup");
        assert!(outcome.success);
        assert_eq!(outcome.deleted_count, 1);
        assert_eq!(contact_ids(&data).await, vec![2]);

        let again = orchestrator.cleanup(&first.id).await.expect("cleanup again");
        assert!(again.success);
        assert_eq!(again.deleted_count, 0);

        let outcome = orchestrator.cleanup(&second.id).await.expect("cleanup second");
        assert_eq!(outcome.deleted_count, 1);
        assert!(contact_ids(&data).await.is_empty());
    }

    /// Accepts the contact form, then never answers again.
    struct StallAfterContact {
        data: Arc<SqliteTargetData>,
        contacted: AtomicBool,
    }

    #[async_trait]
    impl TargetApp for StallAfterContact {
        fn base_url(&self) -> &str {
            "http://target.test"
        }

        async fn send(&self, request: &TargetRequest) -> Result<TargetResponse, TargetError> {
            if self.contacted.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if request.path == "/api/contact" {
                self.data
                    .execute_batch(
                        "INSERT INTO contact_submissions (id, name, email) VALUES (7, 'Visitor', 'visitor@test')",
                    )
                    .expect("insert contact");
                self.contacted.store(true, Ordering::SeqCst);
                return ok(r#"{"id":7}"#);
            }
            ok("<html></html>")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_clients_keep_their_rows_for_cleanup() {
        let data = Arc::new(target_store());
        let target = Arc::new(StallAfterContact {
            data: data.clone(),
            contacted: AtomicBool::new(false),
        });
        let (orchestrator, store, _) = orchestrator_with(target.clone(), data.clone());
        let run = orchestrator
            .start(RunConfig {
                scenario_ids: vec!["service_inquiry".to_string()],
                ..wave(1)
            })
            .expect("start");
        while !target.contacted.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(orchestrator.stop(&run.id).expect("stop"));
        let run = orchestrator.wait(&run.id).await.expect("wait");
        assert_eq!(run.status, RunStatus::Cancelled);

        let sessions = store.list_client_sessions(&run.id).expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, ClientStatus::Cancelled);
        assert_eq!(sessions[0].created_resources.contact_id, Some(7));

        let outcome = orchestrator.cleanup(&run.id).await.expect("cleanup");
        assert_eq!(outcome.deleted_count, 1);
        assert!(contact_ids(&data).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unpersisted_errors_stay_out_of_recent_errors() {
        let (orchestrator, store, events) = orchestrator(pages_missing());
        let run = orchestrator.start(wave(1)).expect("start");
        let run = orchestrator.wait(&run.id).await.expect("wait");
        let existing = store.list_errors_for_run(&run.id).expect("errors");
        assert_eq!(existing.len(), 1);

        let session = store.list_client_sessions(&run.id).expect("sessions").remove(0);
        let fresh = error("err_fresh", &run.id.0, ErrorType::ApiError, Utc::now());
        let outcome = ClientOutcome {
            session,
            errors: vec![existing[0].clone(), fresh.clone()],
            screenshots: Vec::new(),
            cleanup: None,
        };
        let (done, _) = watch::channel(false);
        let active = ActiveRun {
            run_id: run.id.clone(),
            cancel: CancellationToken::new(),
            state: Mutex::new(LiveState::default()),
            done,
        };
        let mut rx = events.subscribe();
        orchestrator.finish_client(&active, outcome);

        let ring: Vec<_> = active
            .state()
            .expect("live state")
            .recent_errors
            .iter()
            .map(|e| e.error_id.clone())
            .collect();
        assert_eq!(ring, vec![fresh.error_id.clone()]);

        let mut recorded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EventKind::ErrorRecorded { error_id, .. } = event.kind {
                recorded.push(error_id);
            }
        }
        assert_eq!(recorded, vec![fresh.error_id]);
        assert_eq!(store.list_errors_for_run(&run.id).expect("errors").len(), 2);
    }

    #[test]
    fn poisoned_live_state_is_an_error() {
        let (done, _) = watch::channel(false);
        let active = Arc::new(ActiveRun {
            run_id: RunId::new("e2e_poisoned"),
            cancel: CancellationToken::new(),
            state: Mutex::new(LiveState::default()),
            done,
        });
        let holder = active.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.state.lock().expect("lock");
            panic!("poison the live state");
        })
        .join();
        assert!(matches!(active.state(), Err(OrchestratorError::Poisoned)));
    }
}
