use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DeliverError {
    #[error("delivery backend {backend} is not configured: {reason}")]
    NotConfigured { backend: String, reason: String },
    #[error("{backend} request failed: {message}")]
    Transport { backend: String, message: String },
    #[error("{backend} returned status {status}: {body}")]
    Rejected {
        backend: String,
        status: u16,
        body: String,
    },
    #[error("{backend} response was malformed: {message}")]
    Malformed { backend: String, message: String },
    #[error("failed to write task file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeliverError {
    /// Transport failures, throttling and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliverError::Transport { .. } => true,
            DeliverError::Rejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DeliverError;

    #[test]
    fn not_configured_formats_backend_and_reason() {
        let err = DeliverError::NotConfigured {
            backend: "github_pr".to_string(),
            reason: "no token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "delivery backend github_pr is not configured: no token"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        let rejected = |status| DeliverError::Rejected {
            backend: "n8n_workflow".to_string(),
            status,
            body: String::new(),
        };
        assert!(rejected(502).is_retryable());
        assert!(rejected(429).is_retryable());
        assert!(!rejected(422).is_retryable());
        assert!(DeliverError::Transport {
            backend: "n8n_workflow".to_string(),
            message: "connection refused".to_string(),
        }
        .is_retryable());
    }
}
