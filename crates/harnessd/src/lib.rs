//! Harness daemon crate: simulated clients, the run orchestrator and the
//! remediation pipeline, all persisted in one SQLite store.

pub mod chat_agent;
pub mod cleanup;
pub mod client;
pub mod event_bus;
pub mod event_log;
pub mod orchestrator;
pub mod persistence;
pub mod remediation;
pub mod service;
pub mod target;
pub mod target_data;
pub mod telemetry;

pub use chat_agent::{backend_from_config, ChatAgent, LlmBackend, LlmError, MockLlm};
pub use client::{ClientEnv, ClientSettings, SimulatedClient};
pub use event_bus::EventBus;
pub use event_log::*;
pub use orchestrator::*;
pub use persistence::*;
pub use remediation::{
    RemediationAction, RemediationDetail, RemediationEngine, RemediationError, NewRemediation,
    MarkOutcome,
};
pub use service::*;
pub use target::{HttpTarget, TargetApp};
pub use target_data::{SqliteTargetData, TargetDataStore};
