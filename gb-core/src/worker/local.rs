//! Workers that run inside the master process.
use std::{any::Any, fmt, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, warn};
use tracing_futures::Instrument;

use crate::{
    channel::ResultSender,
    executor::{Executor, RequestError},
    metrics,
    summary::{RunningStats, WorkerOutcome},
    task::Task,
    worker::WorkerId,
};

/// Run `task` to completion: exactly `task.requests()` sequential attempts,
/// failures counted and never retried.
///
/// Stops early, returning [`WorkerOutcome::Faulted`] with the counts so far,
/// when the executor reports a fatal error, panics, or `shutdown` fires.
pub async fn execute_task(
    executor: &dyn Executor,
    task: &Task,
    shutdown: &CancellationToken,
) -> WorkerOutcome {
    let mut stats = RunningStats::default();
    trace!(task_id = %task.id(), requests = task.requests(), "starting requests");

    for _ in 0..task.requests() {
        let attempt =
            AssertUnwindSafe(executor.execute(task.target(), task.credentials())).catch_unwind();
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                return faulted(stats, task, "cancelled before completion".to_owned());
            }
            result = attempt => result,
        };

        match result {
            Ok(Ok(elapsed)) => {
                stats.record_success(elapsed);
                metrics::request_succeeded();
            }
            Ok(Err(RequestError::Failed(reason))) => {
                trace!(task_id = %task.id(), reason = reason.as_str(), "request failed");
                stats.record_error();
                metrics::request_failed();
            }
            Ok(Err(err)) => {
                stats.record_error();
                metrics::request_failed();
                return faulted(stats, task, err.to_string());
            }
            Err(panic) => {
                stats.record_error();
                metrics::request_failed();
                return faulted(
                    stats,
                    task,
                    format!("executor panicked: {}", panic_message(&*panic)),
                );
            }
        }
    }

    WorkerOutcome::Completed(stats.into_summary(task.id()))
}

fn faulted(stats: RunningStats, task: &Task, reason: String) -> WorkerOutcome {
    warn!(
        task_id = %task.id(),
        attempted = stats.attempts(),
        requests = task.requests(),
        reason = reason.as_str(),
        "worker stopped early"
    );
    WorkerOutcome::Faulted {
        partial: stats.into_summary(task.id()),
        reason,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Runs every task it is given on its own tokio task and hands the outcome
/// straight to the result channel.
pub struct LocalWorker {
    index: usize,
    executor: Arc<dyn Executor>,
    results: ResultSender,
    shutdown: CancellationToken,
    running: JoinSet<()>,
}

impl fmt::Debug for LocalWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWorker")
            .field("index", &self.index)
            .field("running", &self.running.len())
            .finish()
    }
}

impl LocalWorker {
    /// `index` is the worker's position in the pool. Cancelling `shutdown`
    /// stops every task this worker runs.
    pub fn new(
        index: usize,
        executor: Arc<dyn Executor>,
        results: ResultSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            index,
            executor,
            results,
            shutdown,
            running: JoinSet::new(),
        }
    }

    /// identity of this worker
    pub fn id(&self) -> WorkerId {
        WorkerId::Local(self.index)
    }

    /// Start running `task` in the background.
    pub fn dispatch(&mut self, task: Task) {
        let executor = Arc::clone(&self.executor);
        let results = self.results.clone();
        let shutdown = self.shutdown.clone();
        let span = info_span!("local_worker", worker = self.index, task_id = %task.id());
        self.running.spawn(
            async move {
                let outcome = execute_task(executor.as_ref(), &task, &shutdown).await;
                debug!(fault = ?outcome.fault(), "task finished");
                results.send(outcome).await;
            }
            .instrument(span),
        );
    }

    /// Cancel running tasks and wait for them to wind down.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        while let Some(joined) = self.running.join_next().await {
            if let Err(err) = joined {
                error!(worker = self.index, ?err, "local worker task failed");
            }
        }
    }
}
