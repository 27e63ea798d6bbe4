use harness_core::events::HarnessEvent;
use harness_core::types::RunId;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read log file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only JSONL record of harness events.
///
/// Every event lands in `global.jsonl`; run-scoped events are also written to
/// `runs/<run_id>.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlEventLog {
    pub root: PathBuf,
    pub global_file: PathBuf,
    pub run_dir: PathBuf,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_file = root.join("global.jsonl");
        let run_dir = root.join("runs");
        Self {
            root,
            global_file,
            run_dir,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        for dir in [&self.root, &self.run_dir] {
            fs::create_dir_all(dir).map_err(|source| EventLogError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn append(&self, event: &HarnessEvent) -> Result<(), EventLogError> {
        self.ensure_layout()?;
        append_json_line(&self.global_file, event)?;
        if let Some(run_id) = event.kind.run_id() {
            append_json_line(&self.run_log_path(run_id), event)?;
        }
        Ok(())
    }

    pub fn run_log_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir.join(format!("{run_id}.jsonl"))
    }

    /// Events recorded for one run, oldest first. Unparseable lines are skipped.
    pub fn read_run(&self, run_id: &RunId) -> Result<Vec<HarnessEvent>, EventLogError> {
        let path = self.run_log_path(run_id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(EventLogError::Read { path, source }),
        };
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

fn append_json_line(path: &Path, event: &HarnessEvent) -> Result<(), EventLogError> {
    let mut line =
        serde_json::to_string(event).map_err(|source| EventLogError::Serialize { source })?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(line.as_bytes())
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })
}
