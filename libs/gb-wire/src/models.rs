//! Typed frames carried between master and remote workers.
//!
//! Latencies are expressed in milliseconds as `f64` throughout.

use std::fmt;

use serde::{Deserialize, Serialize};

/// HTTP basic-auth pair forwarded to the target.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// user name
    pub username: String,
    /// password, never logged
    pub password: String,
}

impl Credentials {
    /// Create a new credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Work for one virtual user, sent master -> worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Identifier echoed back in the matching [`SummaryMessage`].
    pub task_id: u64,
    /// Endpoint every request is issued against.
    pub target: String,
    /// Number of sequential requests to perform.
    pub requests: u64,
    /// Optional basic-auth credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// `host:port` of the master's result endpoint. When absent the worker
    /// answers on the connection the task arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_addr: Option<String>,
}

/// Outcome of one task, sent worker -> master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMessage {
    /// The task this summary answers.
    pub task_id: u64,
    /// Requests that completed successfully.
    pub success_count: u64,
    /// Requests that failed.
    pub error_count: u64,
    /// Mean latency over successful requests, 0 when there were none.
    pub avg_ms: f64,
    /// Fastest successful request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ms: Option<f64>,
    /// Slowest successful request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<f64>,
    /// Set when the worker stopped before finishing; the counts above are
    /// then partial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Envelope for everything on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// master -> worker
    Task(TaskMessage),
    /// worker -> master
    Summary(SummaryMessage),
}

impl Frame {
    /// short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Task(_) => "task",
            Frame::Summary(_) => "summary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_frame_json_shape() {
        let frame = Frame::Task(TaskMessage {
            task_id: 7,
            target: "http://localhost:8089".into(),
            requests: 10,
            credentials: None,
            report_addr: Some("10.0.0.1:1978".into()),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "task");
        assert_eq!(value["task_id"], 7);
        assert_eq!(value["report_addr"], "10.0.0.1:1978");
        assert!(value.get("credentials").is_none());
    }

    #[test]
    fn test_summary_optional_fields_default() {
        let raw = r#"{"type":"summary","task_id":3,"success_count":0,"error_count":4,"avg_ms":0.0}"#;
        let frame: Frame = serde_json::from_str(raw).unwrap();
        match frame {
            Frame::Summary(summary) => {
                assert_eq!(summary.error_count, 4);
                assert_eq!(summary.min_ms, None);
                assert_eq!(summary.max_ms, None);
                assert_eq!(summary.fault, None);
            }
            other => panic!("expected summary, got {}", other.kind()),
        }
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let dbg = format!("{creds:?}");
        assert!(dbg.contains("admin"));
        assert!(!dbg.contains("hunter2"));
    }
}
