//! The master: builds the worker pool, hands out tasks and waits for the
//! summaries to come back.
use std::{collections::HashMap, fmt, sync::Arc};

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    channel::{ResultEndpoint, ResultSender, result_channel},
    config::{RunConfig, RunMode},
    error::{ConfigError, RunError, TransportError},
    executor::Executor,
    metrics,
    partition::partition,
    report::AggregateReport,
    summarizer::{Assignment, Summarizer},
    task::{Task, TaskId},
    worker::{LocalWorker, ProxyWorker, Worker},
};

/// Lifecycle of a [`Master`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// built, nothing started
    Configuring,
    /// pool ready, tasks going out
    Dispatching,
    /// every task dispatched, waiting for summaries
    Running,
    /// a report was produced (complete or degraded)
    Complete,
    /// the run aborted before producing a report
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Configuring => "CONFIGURING",
            RunState::Dispatching => "DISPATCHING",
            RunState::Running => "RUNNING",
            RunState::Complete => "COMPLETE",
            RunState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Drives one benchmark run from configuration to [`AggregateReport`].
pub struct Master {
    config: RunConfig,
    executor: Arc<dyn Executor>,
    state: RunState,
    shutdown: CancellationToken,
}

impl fmt::Debug for Master {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Master")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Everything that lives for the duration of a run.
struct Pool {
    workers: Vec<Worker>,
    /// kept alive so remote summaries can arrive
    endpoint: Option<ResultEndpoint>,
    /// address remote workers report to
    report_addr: Option<String>,
}

impl Master {
    /// Create a master. `executor` performs requests for local workers.
    pub fn new(config: RunConfig, executor: Arc<dyn Executor>) -> Self {
        info!(mode = %config.mode, "Starting Master...");
        Self {
            config,
            executor,
            state: RunState::Configuring,
            shutdown: CancellationToken::new(),
        }
    }

    /// current lifecycle state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Cancelling this token stops local workers early. Anything they did
    /// not finish is reported as faulted or lost.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "master state change");
        self.state = next;
    }

    /// Run the benchmark once.
    ///
    /// Returns the report, which is degraded when some workers never
    /// reported before the deadline. Errors mean the run failed outright:
    /// bad configuration, no usable workers, or a task that could not be
    /// handed over.
    pub async fn run(&mut self) -> Result<AggregateReport, RunError> {
        if self.state != RunState::Configuring {
            let reason = format!("master already ran, state is {}", self.state);
            return Err(ConfigError::Invalid(reason).into());
        }
        match self.execute().await {
            Ok(report) => {
                self.transition(RunState::Complete);
                Ok(report)
            }
            Err(err) => {
                error!(?err, "run failed");
                self.transition(RunState::Failed);
                Err(err)
            }
        }
    }

    async fn execute(&mut self) -> Result<AggregateReport, RunError> {
        let (results, mut receiver) = result_channel(self.config.channel_size);
        let mut pool = self.build_pool(results).await?;
        self.transition(RunState::Dispatching);

        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let outstanding = match self.dispatch(&mut pool, deadline).await {
            Ok(outstanding) => outstanding,
            Err(err) => {
                shutdown_pool(&mut pool).await;
                return Err(err.into());
            }
        };
        info!("Tasks distributed. Waiting for summaries...");
        self.transition(RunState::Running);

        let report = Summarizer::new(outstanding, started)
            .run(&mut receiver, deadline)
            .await;
        receiver.close();
        shutdown_pool(&mut pool).await;
        Ok(report)
    }

    async fn build_pool(&self, results: ResultSender) -> Result<Pool, RunError> {
        let pool = match self.config.mode {
            RunMode::Standalone => {
                let workers = (0..self.config.concurrency)
                    .map(|index| {
                        Worker::Local(LocalWorker::new(
                            index,
                            self.executor.clone(),
                            results.clone(),
                            self.shutdown.child_token(),
                        ))
                    })
                    .collect();
                Pool {
                    workers,
                    endpoint: None,
                    report_addr: None,
                }
            }
            RunMode::Master => {
                let endpoint = ResultEndpoint::bind(&self.config.host_addr, results.clone()).await?;
                let report_addr = advertised_addr(&self.config.host_addr, &endpoint);
                debug!(%report_addr, "remote workers will report here");
                let mut workers = Vec::with_capacity(self.config.workers.len());
                for addr in &self.config.workers {
                    let worker = ProxyWorker::connect(addr, results.clone()).await?;
                    workers.push(Worker::Proxy(worker));
                }
                Pool {
                    workers,
                    endpoint: Some(endpoint),
                    report_addr: Some(report_addr),
                }
            }
            mode @ RunMode::Proxy => return Err(ConfigError::InvalidMode { mode }.into()),
        };

        let Some(first) = pool.workers.first() else {
            return Err(ConfigError::NoWorkers {
                mode: self.config.mode,
            }
            .into());
        };
        info!(
            "{} {}Worker(s) may be used by gb",
            pool.workers.len(),
            first.kind()
        );
        Ok(pool)
    }

    /// Send one task per virtual user. Returns the assignment of every task.
    ///
    /// Handing tasks over is bounded by `deadline` as well: a worker that
    /// stops reading can't hold the run here. Tasks not handed over by then
    /// stay in the returned set and end up as lost workers.
    async fn dispatch(
        &self,
        pool: &mut Pool,
        deadline: Instant,
    ) -> Result<HashMap<TaskId, Assignment>, TransportError> {
        let slots = partition(self.config.concurrency, pool.workers.len());
        let mut plan = Vec::with_capacity(self.config.concurrency);
        let mut outstanding = HashMap::with_capacity(self.config.concurrency);
        for (index, (worker, slots)) in pool.workers.iter().zip(slots).enumerate() {
            for _ in 0..slots {
                let task_id = TaskId(plan.len() as u64);
                outstanding.insert(task_id, Assignment::new(worker.id(), self.config.requests));
                plan.push((index, task_id));
            }
        }

        let mut sent = 0;
        for (index, task_id) in plan {
            let task = Task::new(task_id, &self.config.target, self.config.requests)
                .with_credentials(self.config.credentials.clone())
                .with_report_addr(pool.report_addr.clone());
            let worker = &mut pool.workers[index];
            trace!(%task_id, worker = %worker.id(), "dispatching");
            match time::timeout_at(deadline, worker.dispatch(task)).await {
                Ok(res) => res?,
                Err(_) => {
                    warn!(
                        %task_id,
                        worker = %worker.id(),
                        sent,
                        undelivered = outstanding.len() - sent,
                        "deadline reached while dispatching"
                    );
                    break;
                }
            }
            sent += 1;
            metrics::TASKS_DISPATCHED.inc();
        }
        debug!(sent, tasks = outstanding.len(), "dispatch finished");
        Ok(outstanding)
    }
}

/// Address remote workers should report to. A wildcard port is replaced by
/// the one actually bound.
fn advertised_addr(configured: &str, endpoint: &ResultEndpoint) -> String {
    match configured.rsplit_once(':') {
        Some((host, "0")) if !host.is_empty() => format!("{host}:{}", endpoint.local_addr().port()),
        Some(_) => configured.to_owned(),
        None => endpoint.local_addr().to_string(),
    }
}

async fn shutdown_pool(pool: &mut Pool) {
    for worker in &mut pool.workers {
        worker.shutdown().await;
    }
    if pool.endpoint.take().is_some() {
        trace!("result endpoint closed");
    }
}
