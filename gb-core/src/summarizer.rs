//! Folds worker outcomes into the final report.
//!
//! The summarizer is `Awaiting` until every dispatched task has reported and
//! `Done` afterwards. When the run deadline passes first it stops waiting,
//! counts each missing task as a lost worker and still produces a report.
use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    channel::{Recv, ResultReceiver},
    metrics,
    report::{AggregateReport, FaultedWorker, LostWorker, RunStatus},
    summary::{Summary, WorkerOutcome, to_millis},
    task::TaskId,
    worker::WorkerId,
};

/// Where the summarizer is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizerState {
    /// fewer summaries than tasks so far
    Awaiting,
    /// every task reported
    Done,
}

/// Running totals over the summaries folded so far.
///
/// The mean is weighted by each summary's success count, so the result does
/// not depend on the order summaries arrive in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    /// successful requests
    pub succeeded: u64,
    /// failed requests
    pub failed: u64,
    /// success-weighted mean latency
    pub avg_latency: Duration,
    /// fastest request, `None` until some request succeeded
    pub min_latency: Option<Duration>,
    /// slowest request, `None` until some request succeeded
    pub max_latency: Option<Duration>,
}

impl Aggregate {
    /// Fold one summary in
    pub fn fold(&mut self, summary: &Summary) {
        let total = self.succeeded.saturating_add(summary.success_count);
        if total > 0 {
            let weighted = self.avg_latency.as_nanos() as f64 * self.succeeded as f64
                + summary.avg_latency.as_nanos() as f64 * summary.success_count as f64;
            self.avg_latency = Duration::from_nanos((weighted / total as f64).round() as u64);
        }
        self.succeeded = total;
        self.failed = self.failed.saturating_add(summary.error_count);
        self.min_latency = merge(self.min_latency, summary.min_latency, Duration::min);
        self.max_latency = merge(self.max_latency, summary.max_latency, Duration::max);
    }
}

/// Combine two optional values, a missing side never wins.
fn merge<F>(a: Option<Duration>, b: Option<Duration>, pick: F) -> Option<Duration>
where
    F: FnOnce(Duration, Duration) -> Duration,
{
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Who runs a dispatched task and how many requests it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// worker the task went to
    pub worker: WorkerId,
    /// requests the task carries, an upper bound on what its summary reports
    pub requests: u64,
}

impl Assignment {
    /// `requests` requests handed to `worker`
    pub fn new(worker: WorkerId, requests: u64) -> Self {
        Self { worker, requests }
    }
}

/// Consumes the result channel for one run.
#[derive(Debug)]
pub struct Summarizer {
    outstanding: HashMap<TaskId, Assignment>,
    expected: usize,
    received: usize,
    aggregate: Aggregate,
    faulted: Vec<FaultedWorker>,
    started: Instant,
}

impl Summarizer {
    /// `outstanding` maps every dispatched task to its assignment;
    /// `started` is when dispatch began.
    pub fn new(outstanding: HashMap<TaskId, Assignment>, started: Instant) -> Self {
        Self {
            expected: outstanding.len(),
            outstanding,
            received: 0,
            aggregate: Aggregate::default(),
            faulted: Vec::new(),
            started,
        }
    }

    /// summaries expected in total
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// summaries folded so far
    pub fn received(&self) -> usize {
        self.received
    }

    /// current totals
    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// current state
    pub fn state(&self) -> SummarizerState {
        if self.outstanding.is_empty() {
            SummarizerState::Done
        } else {
            SummarizerState::Awaiting
        }
    }

    /// Fold one outcome. Outcomes for tasks that are not outstanding (already
    /// reported, or never dispatched) are ignored, and so are summaries
    /// claiming more attempts than the task carried. The task stays
    /// outstanding in that case.
    pub fn accept(&mut self, outcome: WorkerOutcome) -> SummarizerState {
        let task_id = outcome.task_id();
        let Some(assigned) = self.outstanding.get(&task_id) else {
            warn!(%task_id, "summary for unknown or already reported task, ignoring");
            metrics::SUMMARIES_IGNORED.inc();
            return self.state();
        };
        let summary = outcome.summary();
        let within_quota = summary
            .success_count
            .checked_add(summary.error_count)
            .is_some_and(|attempts| attempts <= assigned.requests);
        if !within_quota {
            warn!(
                %task_id,
                worker = %assigned.worker,
                success = summary.success_count,
                errors = summary.error_count,
                requests = assigned.requests,
                "summary reports more attempts than the task carried, ignoring"
            );
            metrics::SUMMARIES_IGNORED.inc();
            return self.state();
        }
        let Some(Assignment { worker, .. }) = self.outstanding.remove(&task_id) else {
            return self.state();
        };
        self.received += 1;
        metrics::SUMMARIES_RECEIVED.inc();

        if let Some(reason) = outcome.fault() {
            warn!(%task_id, %worker, reason, "worker faulted, folding partial summary");
            metrics::FAULTED_WORKERS.inc();
            self.faulted.push(FaultedWorker {
                task_id,
                worker: worker.clone(),
                reason: reason.to_owned(),
            });
        }
        self.aggregate.fold(summary);
        debug!(
            %task_id,
            %worker,
            success = summary.success_count,
            errors = summary.error_count,
            received = self.received,
            expected = self.expected,
            "summary folded"
        );
        self.state()
    }

    /// Drain `results` until every task reported, the channel closed, or
    /// `deadline` passed, then build the report.
    pub async fn run(mut self, results: &mut ResultReceiver, deadline: Instant) -> AggregateReport {
        while self.state() == SummarizerState::Awaiting {
            match results.recv_until(deadline).await {
                Recv::Outcome(outcome) => {
                    self.accept(outcome);
                }
                Recv::TimedOut => {
                    warn!(
                        missing = self.outstanding.len(),
                        "deadline reached before every worker reported"
                    );
                    break;
                }
                Recv::Closed => {
                    warn!(
                        missing = self.outstanding.len(),
                        "result channel closed before every worker reported"
                    );
                    break;
                }
            }
        }
        self.finish()
    }

    /// Stop the clock and build the report. Anything still outstanding is
    /// a lost worker: zero successes, one error.
    pub fn finish(self) -> AggregateReport {
        let wall_clock = self.started.elapsed();
        let mut lost_workers = self
            .outstanding
            .into_iter()
            .map(|(task_id, assigned)| LostWorker {
                task_id,
                worker: assigned.worker,
            })
            .collect::<Vec<_>>();
        lost_workers.sort_by_key(|lost| lost.task_id);
        for lost in &lost_workers {
            warn!(task_id = %lost.task_id, worker = %lost.worker, "worker lost");
        }
        metrics::LOST_WORKERS.inc_by(lost_workers.len() as u64);

        let status = if lost_workers.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Degraded
        };
        let Aggregate {
            succeeded,
            failed,
            avg_latency,
            min_latency,
            max_latency,
        } = self.aggregate;
        let total_failed = failed.saturating_add(lost_workers.len() as u64);

        info!("Total benchmark time {} milliseconds", wall_clock.as_millis());
        info!(
            "{succeeded} requests performed. Average response time {:.2} milliseconds",
            to_millis(avg_latency)
        );
        if let (Some(min), Some(max)) = (min_latency, max_latency) {
            info!(
                "Min response time {:.2} ms, max response time {:.2} ms",
                to_millis(min),
                to_millis(max)
            );
        }
        info!("{total_failed} requests lost");

        AggregateReport {
            status,
            expected: self.expected,
            received: self.received,
            total_succeeded: succeeded,
            total_failed,
            avg_latency,
            min_latency,
            max_latency,
            wall_clock,
            lost_workers,
            faulted_workers: self.faulted,
        }
    }
}
