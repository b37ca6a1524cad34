//! The final benchmark report.
use std::{fmt::Write, time::Duration};

use serde::{Serialize, Serializer};

use crate::{summary::to_millis, task::TaskId, worker::WorkerId};

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// every expected summary arrived
    Complete,
    /// the deadline passed with summaries still missing
    Degraded,
}

/// A task whose summary never arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostWorker {
    /// task that went missing
    pub task_id: TaskId,
    /// worker it was dispatched to
    pub worker: WorkerId,
}

/// A task whose worker stopped early; its partial counts are included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultedWorker {
    /// task that faulted
    pub task_id: TaskId,
    /// worker it was dispatched to
    pub worker: WorkerId,
    /// reason given by the worker
    pub reason: String,
}

/// Aggregate over every summary received in one run.
///
/// A lost worker contributes no successes and one error, so
/// `total_failed` includes `lost_workers.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    /// complete or degraded
    pub status: RunStatus,
    /// tasks dispatched
    pub expected: usize,
    /// summaries folded in
    pub received: usize,
    /// successful requests over all workers
    pub total_succeeded: u64,
    /// failed requests over all workers, plus one per lost worker
    pub total_failed: u64,
    /// mean latency weighted by each worker's success count
    #[serde(rename = "avg_latency_ms", serialize_with = "ser_millis")]
    pub avg_latency: Duration,
    /// fastest request seen by any worker
    #[serde(rename = "min_latency_ms", serialize_with = "ser_opt_millis")]
    pub min_latency: Option<Duration>,
    /// slowest request seen by any worker
    #[serde(rename = "max_latency_ms", serialize_with = "ser_opt_millis")]
    pub max_latency: Option<Duration>,
    /// dispatch start to last summary (or deadline)
    #[serde(rename = "wall_clock_ms", serialize_with = "ser_millis")]
    pub wall_clock: Duration,
    /// tasks that never reported
    pub lost_workers: Vec<LostWorker>,
    /// tasks that reported a fault
    pub faulted_workers: Vec<FaultedWorker>,
}

impl AggregateReport {
    /// true when some expected summaries never arrived
    pub fn is_degraded(&self) -> bool {
        self.status == RunStatus::Degraded
    }

    /// requests accounted for, successes and failures
    pub fn total_requests(&self) -> u64 {
        self.total_succeeded + self.total_failed
    }

    /// Multi-line report meant for a terminal
    pub fn human_summary(&self) -> String {
        let mut out = String::new();
        out.push_str("gb benchmark report\n");
        let _ = writeln!(
            out,
            "status: {}",
            match self.status {
                RunStatus::Complete => "COMPLETE",
                RunStatus::Degraded => "DEGRADED",
            }
        );
        let _ = writeln!(
            out,
            "summaries: received={}, expected={}",
            self.received, self.expected
        );
        let _ = writeln!(
            out,
            "total benchmark time: {} milliseconds",
            self.wall_clock.as_millis()
        );
        let _ = writeln!(
            out,
            "{} requests performed. Average response time {:.2} milliseconds",
            self.total_succeeded,
            to_millis(self.avg_latency)
        );
        let _ = writeln!(
            out,
            "min response time: {} | max response time: {}",
            fmt_opt_millis(self.min_latency),
            fmt_opt_millis(self.max_latency)
        );
        let _ = writeln!(out, "{} requests lost", self.total_failed);
        for lost in &self.lost_workers {
            let _ = writeln!(out, "lost [{}] on {}", lost.task_id, lost.worker);
        }
        for faulted in &self.faulted_workers {
            let _ = writeln!(
                out,
                "fault [{}] on {}: {}",
                faulted.task_id, faulted.worker, faulted.reason
            );
        }
        out
    }
}

fn fmt_opt_millis(value: Option<Duration>) -> String {
    value.map_or_else(|| "n/a".to_owned(), |d| format!("{:.2}ms", to_millis(d)))
}

fn ser_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(to_millis(*value))
}

fn ser_opt_millis<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&to_millis(*d)),
        None => serializer.serialize_none(),
    }
}
