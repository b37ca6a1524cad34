//! Work assigned to one virtual user.
use std::fmt;

use gb_wire::{Credentials, TaskMessage};
use serde::{Deserialize, Serialize};

/// Identifies a dispatched task. Summaries carry it back so the master knows
/// which outstanding slot they close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Immutable description of the work for one virtual user: issue `requests`
/// sequential requests against `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    target: String,
    requests: u64,
    credentials: Option<Credentials>,
    report_addr: Option<String>,
}

impl Task {
    /// Create a task without credentials or report address
    pub fn new(id: TaskId, target: impl Into<String>, requests: u64) -> Self {
        Self {
            id,
            target: target.into(),
            requests,
            credentials: None,
            report_addr: None,
        }
    }

    /// Attach basic-auth credentials
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Attach the `host:port` a remote worker should deliver its summary to
    pub fn with_report_addr(mut self, report_addr: Option<String>) -> Self {
        self.report_addr = report_addr;
        self
    }

    /// task id
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// endpoint under test
    pub fn target(&self) -> &str {
        &self.target
    }

    /// number of requests to perform
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// credentials, if any
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// summary return address, if any
    pub fn report_addr(&self) -> Option<&str> {
        self.report_addr.as_deref()
    }
}

impl From<Task> for TaskMessage {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id.0,
            target: task.target,
            requests: task.requests,
            credentials: task.credentials,
            report_addr: task.report_addr,
        }
    }
}

impl From<TaskMessage> for Task {
    fn from(msg: TaskMessage) -> Self {
        Self {
            id: TaskId(msg.task_id),
            target: msg.target,
            requests: msg.requests,
            credentials: msg.credentials,
            report_addr: msg.report_addr,
        }
    }
}
