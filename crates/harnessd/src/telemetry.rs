//! Tracing setup shared by the `harness` and `harness-web` binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// An explicit level wins over `RUST_LOG`, which wins over `info`.
pub fn env_filter(level: Option<&str>) -> Result<EnvFilter, TelemetryError> {
    match level {
        Some(filter) => EnvFilter::try_new(filter).map_err(|source| TelemetryError::Filter {
            filter: filter.to_string(),
            source,
        }),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))),
    }
}

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays machine readable.
pub fn init_tracing(level: Option<&str>, json: bool) -> Result<(), TelemetryError> {
    let filter = env_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{env_filter, TelemetryError};

    #[test]
    fn explicit_filters_are_parsed() {
        let filter = env_filter(Some("harnessd=debug,info")).expect("valid filter");
        assert!(filter.to_string().contains("harnessd=debug"));
    }

    #[test]
    fn invalid_levels_are_rejected() {
        let err = env_filter(Some("harnessd=loud")).expect_err("invalid level");
        assert!(matches!(err, TelemetryError::Filter { ref filter, .. } if filter == "harnessd=loud"));
    }
}
