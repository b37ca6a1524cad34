//! Per-task results produced by workers.
use std::time::Duration;

use gb_wire::SummaryMessage;

use crate::task::TaskId;

/// Aggregated outcome of one task.
///
/// `success_count + error_count` equals the task's request count unless the
/// worker faulted part way (then the summary travels inside
/// [`WorkerOutcome::Faulted`]). `min_latency`/`max_latency` are `None` when no
/// request succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// the task this summary answers
    pub task_id: TaskId,
    /// successful requests
    pub success_count: u64,
    /// failed requests
    pub error_count: u64,
    /// mean latency over successful requests
    pub avg_latency: Duration,
    /// fastest successful request
    pub min_latency: Option<Duration>,
    /// slowest successful request
    pub max_latency: Option<Duration>,
}

impl Summary {
    /// A summary for a task that did no work at all
    pub fn empty(task_id: TaskId) -> Self {
        RunningStats::default().into_summary(task_id)
    }

    /// requests attempted
    pub fn attempts(&self) -> u64 {
        self.success_count + self.error_count
    }
}

/// Counters a worker keeps while executing one task. Owned by that worker
/// alone until turned into a [`Summary`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningStats {
    success: u64,
    errors: u64,
    total_latency: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl RunningStats {
    /// count a successful request
    pub fn record_success(&mut self, elapsed: Duration) {
        self.success += 1;
        self.total_latency += elapsed;
        self.min = Some(self.min.map_or(elapsed, |min| min.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |max| max.max(elapsed)));
    }

    /// count a failed request
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// requests recorded so far
    pub fn attempts(&self) -> u64 {
        self.success + self.errors
    }

    /// freeze the counters
    pub fn into_summary(self, task_id: TaskId) -> Summary {
        let avg_latency = if self.success == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_latency.as_nanos() / u128::from(self.success);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        Summary {
            task_id,
            success_count: self.success,
            error_count: self.errors,
            avg_latency,
            min_latency: self.min,
            max_latency: self.max,
        }
    }
}

/// What a worker hands to the result channel for each task: either the full
/// summary or, when it stopped early, the partial summary and the reason.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// every request was attempted
    Completed(Summary),
    /// the worker stopped before finishing
    Faulted {
        /// work done before the fault
        partial: Summary,
        /// why it stopped
        reason: String,
    },
}

impl WorkerOutcome {
    /// the summary, complete or partial
    pub fn summary(&self) -> &Summary {
        match self {
            WorkerOutcome::Completed(summary) => summary,
            WorkerOutcome::Faulted { partial, .. } => partial,
        }
    }

    /// task this outcome answers
    pub fn task_id(&self) -> TaskId {
        self.summary().task_id
    }

    /// fault reason, if any
    pub fn fault(&self) -> Option<&str> {
        match self {
            WorkerOutcome::Completed(_) => None,
            WorkerOutcome::Faulted { reason, .. } => Some(reason),
        }
    }
}

impl From<WorkerOutcome> for SummaryMessage {
    fn from(outcome: WorkerOutcome) -> Self {
        let (summary, fault) = match outcome {
            WorkerOutcome::Completed(summary) => (summary, None),
            WorkerOutcome::Faulted { partial, reason } => (partial, Some(reason)),
        };
        Self {
            task_id: summary.task_id.0,
            success_count: summary.success_count,
            error_count: summary.error_count,
            avg_ms: to_millis(summary.avg_latency),
            min_ms: summary.min_latency.map(to_millis),
            max_ms: summary.max_latency.map(to_millis),
            fault,
        }
    }
}

impl From<SummaryMessage> for WorkerOutcome {
    fn from(msg: SummaryMessage) -> Self {
        let summary = Summary {
            task_id: TaskId(msg.task_id),
            success_count: msg.success_count,
            error_count: msg.error_count,
            avg_latency: from_millis(msg.avg_ms),
            min_latency: msg.min_ms.map(from_millis),
            max_latency: msg.max_ms.map(from_millis),
        };
        match msg.fault {
            Some(reason) => WorkerOutcome::Faulted {
                partial: summary,
                reason,
            },
            None => WorkerOutcome::Completed(summary),
        }
    }
}

/// duration as fractional milliseconds
pub fn to_millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Fractional milliseconds from the wire. Negative, NaN or absurdly large
/// values collapse to zero.
pub fn from_millis(ms: f64) -> Duration {
    let nanos = (ms * 1_000_000.0).round();
    if nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64 {
        Duration::from_nanos(nanos as u64)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        stats.record_success(Duration::from_millis(30));
        stats.record_error();
        stats.record_success(Duration::from_millis(10));
        stats.record_success(Duration::from_millis(20));
        assert_eq!(stats.attempts(), 4);

        let summary = stats.into_summary(TaskId(1));
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.avg_latency, Duration::from_millis(20));
        assert_eq!(summary.min_latency, Some(Duration::from_millis(10)));
        assert_eq!(summary.max_latency, Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_all_errors_leaves_latency_unset() {
        let mut stats = RunningStats::default();
        stats.record_error();
        stats.record_error();

        let summary = stats.into_summary(TaskId(2));
        assert_eq!(summary.attempts(), 2);
        assert_eq!(summary.avg_latency, Duration::ZERO);
        assert_eq!(summary.min_latency, None);
        assert_eq!(summary.max_latency, None);
    }

    #[test]
    fn test_fault_survives_the_wire() {
        let outcome = WorkerOutcome::Faulted {
            partial: Summary::empty(TaskId(5)),
            reason: "invalid endpoint".into(),
        };
        let msg = SummaryMessage::from(outcome.clone());
        assert_eq!(msg.fault.as_deref(), Some("invalid endpoint"));
        assert_eq!(WorkerOutcome::from(msg), outcome);
    }

    #[test]
    fn test_from_millis_rejects_garbage() {
        assert_eq!(from_millis(-5.0), Duration::ZERO);
        assert_eq!(from_millis(f64::NAN), Duration::ZERO);
        assert_eq!(from_millis(1.5), Duration::from_micros(1_500));
    }
}
