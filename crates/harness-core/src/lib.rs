pub mod config;
pub mod events;
pub mod persona;
pub mod scenario;
pub mod state;
pub mod types;
pub mod validation;

pub use config::*;
pub use events::*;
pub use persona::*;
pub use scenario::*;
pub use state::*;
pub use types::*;
pub use validation::*;

#[cfg(test)]
mod tests {
    use super::{parse_harness_config, ErrorType, RemediationStatus, RunId, Step, Validate};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_core_types() {
        let _ = TypeId::of::<RunId>();
        let _ = TypeId::of::<RemediationStatus>();
        let _ = TypeId::of::<ErrorType>();
        let _ = TypeId::of::<Step>();
    }

    #[test]
    fn crate_root_reexports_parse_and_validate_helpers() {
        let mut config = parse_harness_config(
            r#"
[target]
base_url = "http://localhost:3000"
database_path = "/tmp/target.sqlite"

[orchestrator]
max_concurrent_clients = 2
"#,
        )
        .expect("parse config");

        assert!(config.validate().is_empty());

        config.orchestrator.max_concurrent_clients = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|issue| issue.code == "orchestrator.max_concurrent_clients.zero"));
    }
}
