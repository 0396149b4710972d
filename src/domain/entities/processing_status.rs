use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::entities::environment::Environment;
use crate::domain::entities::fetch_task::FetchTask;
use crate::domain::errors::{ReconError, ReconResult};

/// Lifecycle of a single fetch task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Downloading => "downloading",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-task outcome record. Moves pending -> downloading -> completed|failed,
/// never backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub legal_entity: String,
    pub source_system: String,
    pub environment: Environment,
    #[serde(rename = "status")]
    pub state: TaskState,
    pub records_count: usize,
    pub error_message: Option<String>,
}

impl ProcessingStatus {
    pub fn pending(task: &FetchTask) -> Self {
        Self {
            legal_entity: task.legal_entity.clone(),
            source_system: task.source_system.clone(),
            environment: task.environment,
            state: TaskState::Pending,
            records_count: 0,
            error_message: None,
        }
    }

    pub fn begin_download(&mut self) -> ReconResult<()> {
        self.transition(TaskState::Pending, TaskState::Downloading)
    }

    pub fn complete(&mut self, records_count: usize) -> ReconResult<()> {
        self.transition(TaskState::Downloading, TaskState::Completed)?;
        self.records_count = records_count;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> ReconResult<()> {
        self.transition(TaskState::Downloading, TaskState::Failed)?;
        self.error_message = Some(error.into());
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    fn transition(&mut self, expected: TaskState, next: TaskState) -> ReconResult<()> {
        if self.state != expected {
            return Err(ReconError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}
