//! The worker pool.
//!
//! A [`Worker`] is either a [`LocalWorker`] running tasks inside this process
//! or a [`ProxyWorker`] forwarding them to `gb --mode proxy` on another
//! machine. Both end up delivering one [`WorkerOutcome`] per task on the
//! result channel.
//!
//! [`WorkerOutcome`]: crate::WorkerOutcome
use std::fmt;

use serde::Serialize;

use crate::{error::TransportError, task::Task};

pub mod local;
pub mod proxy;

pub use local::{LocalWorker, execute_task};
pub use proxy::ProxyWorker;

/// Identity of a pool member, used to name lost or faulted workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerId {
    /// position in the local pool
    Local(usize),
    /// remote worker address
    Remote(String),
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Local(index) => write!(f, "local-{index}"),
            WorkerId::Remote(addr) => write!(f, "remote {addr}"),
        }
    }
}

/// A member of the master's pool.
#[derive(Debug)]
pub enum Worker {
    /// runs in this process
    Local(LocalWorker),
    /// runs behind a TCP connection
    Proxy(ProxyWorker),
}

impl Worker {
    /// identity of this worker
    pub fn id(&self) -> WorkerId {
        match self {
            Worker::Local(worker) => worker.id(),
            Worker::Proxy(worker) => worker.id(),
        }
    }

    /// short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Worker::Local(_) => "Local",
            Worker::Proxy(_) => "Proxy",
        }
    }

    /// Hand a task over. Returns once the task is running (local) or written
    /// to the connection (proxy); the outcome arrives on the result channel.
    pub async fn dispatch(&mut self, task: Task) -> Result<(), TransportError> {
        match self {
            Worker::Local(worker) => {
                worker.dispatch(task);
                Ok(())
            }
            Worker::Proxy(worker) => worker.dispatch(task).await,
        }
    }

    /// Stop whatever is still running and release the worker's resources.
    pub async fn shutdown(&mut self) {
        match self {
            Worker::Local(worker) => worker.shutdown().await,
            Worker::Proxy(worker) => worker.shutdown().await,
        }
    }
}
