//! IDE task delivery: the task prompt is written to a task directory the
//! editor agent picks up from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use harness_core::types::OutputTarget;

use crate::backend::DeliveryBackend;
use crate::error::DeliverError;
use crate::types::{DeliveryPackage, DeliveryReceipt};

#[derive(Debug, Clone)]
pub struct CursorTaskBackend {
    task_dir: PathBuf,
}

impl CursorTaskBackend {
    pub fn new(task_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_dir: task_dir.into(),
        }
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }
}

pub fn cursor_task_id(millis: i64) -> String {
    format!("cursor_{millis}")
}

#[async_trait]
impl DeliveryBackend for CursorTaskBackend {
    fn target(&self) -> OutputTarget {
        OutputTarget::CursorTask
    }

    async fn deliver(&self, package: &DeliveryPackage) -> Result<DeliveryReceipt, DeliverError> {
        tokio::fs::create_dir_all(&self.task_dir)
            .await
            .map_err(|source| DeliverError::Io {
                path: self.task_dir.clone(),
                source,
            })?;

        let id = cursor_task_id(Utc::now().timestamp_millis());
        let path = self.task_dir.join(format!("{id}.md"));
        let body = format!(
            "<!-- remediation request {} | priority {} -->\n{}",
            package.request_id, package.priority, package.task_prompt
        );
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| DeliverError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(DeliveryReceipt {
            target: OutputTarget::CursorTask,
            reference: id,
            location: Some(path.display().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::CursorTaskBackend;
    use crate::backend::DeliveryBackend;
    use crate::types::fixtures::package;
    use harness_core::types::OutputTarget;

    #[tokio::test]
    async fn writes_prompt_into_task_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = CursorTaskBackend::new(dir.path().join("tasks"));

        let receipt = backend
            .deliver(&package(OutputTarget::CursorTask))
            .await
            .expect("task written");
        assert!(receipt.reference.starts_with("cursor_"));

        let path = backend.task_dir().join(format!("{}.md", receipt.reference));
        let body = std::fs::read_to_string(path).expect("read task file");
        assert!(body.contains("remediation request req-1 | priority high"));
        assert!(body.contains("## Task: Fix E2E Test Failure"));
    }
}
