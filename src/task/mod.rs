use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

mod scheduler;

pub use scheduler::Scheduler;

use crate::{
    classifier::Format,
    engine::ConversionAttempt,
    error::Error,
    input::RawInput,
    output::Settings as OutputSettings,
    pipeline::Processed,
    report::AttemptEvent,
};

pub type TaskId = Uuid;

/// Polled task state
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Progress,
    Success,
    Failure,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Result of a task that ran to completion.
/// A pipeline ending in error still completes its task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskResult {
    Success { result_file: String, records: usize },
    Error { message: String },
}

/// Read-only snapshot of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub filename: String,
    pub state: TaskState,
    /// Classified input format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
    /// Attempt events, in emission order
    pub events: Vec<AttemptEvent>,
    /// Attempts audit trail, available once the task is terminal
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<ConversionAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Worker failure, for [TaskState::Failure] only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStatus {
    fn pending(task_id: TaskId, filename: &str) -> Self {
        Self {
            task_id,
            filename: filename.to_string(),
            state: TaskState::Pending,
            format: None,
            events: Vec::new(),
            attempts: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// True when an artifact was produced
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Success
            && matches!(self.result, Some(TaskResult::Success { .. }))
    }

    fn fail(&mut self, error: &str) {
        self.state = TaskState::Failure;
        self.error = Some(error.to_string());
    }

    fn conclude(&mut self, processed: Processed) {
        self.format = processed.format;
        self.attempts = processed.attempts;

        match processed.result {
            Ok(artifact) => {
                self.state = TaskState::Success;
                self.result = Some(TaskResult::Success {
                    result_file: artifact.path.to_string_lossy().to_string(),
                    records: artifact.records,
                });
            },
            Err(e @ Error::Cancelled(_)) => self.fail(&e.to_string()),
            Err(e) => {
                self.state = TaskState::Success;
                self.result = Some(TaskResult::Error {
                    message: format!("processing failed: {}", e),
                });
            },
        }
    }
}

/// What a task converts
#[derive(Debug)]
pub enum TaskInput {
    /// Local file, optionally with a declared format
    Path {
        path: PathBuf,
        format: Option<Format>,
    },
    /// Uploaded content
    Upload(RawInput),
}

impl TaskInput {
    pub fn filename(&self) -> String {
        match self {
            Self::Path { path, .. } => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or(path.to_string_lossy().to_string()),
            Self::Upload(raw) => raw.filename().to_string(),
        }
    }

    /// Output settings for this input: artifacts of local files
    /// land next to them, unless a prefix was specified.
    fn output_settings(&self, settings: &OutputSettings) -> OutputSettings {
        let mut settings = settings.clone();

        if settings.prefix.is_none() {
            if let Self::Path { path, .. } = self {
                settings.prefix = path
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(|parent| parent.to_string_lossy().to_string());
            }
        }

        settings
    }

    /// Acquires the [RawInput]. This is blocking.
    pub fn load(self) -> Result<RawInput, Error> {
        match self {
            Self::Path { path, format } => RawInput::open(&path, format),
            Self::Upload(raw) => Ok(raw),
        }
    }
}
