//! # gb
//!
//! Master/worker orchestration for a distributed HTTP load generator.
//!
//! A [`Master`] splits the requested number of virtual users across a pool of
//! [`Worker`]s, ships one [`Task`] per virtual user, and folds the resulting
//! [`Summary`]s into an [`AggregateReport`]. Workers either run inside the
//! master process or on another machine running `gb --mode proxy`; both feed
//! the same [`channel`], so aggregation never cares where a summary came from.
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
pub use anyhow;
pub use async_trait::async_trait;
pub use gb_wire::{self as wire, Credentials};
pub use tokio;
pub use tokio_util;
pub use tracing;

pub use crate::{
    config::RunConfig,
    executor::{Executor, HttpExecutor, RequestError},
    master::{Master, RunState},
    remote::WorkerService,
    report::{AggregateReport, RunStatus},
    summary::{Summary, WorkerOutcome},
    task::{Task, TaskId},
    worker::{Worker, WorkerId},
};

pub mod channel;
pub mod config;
pub mod env;
pub mod error;
pub mod executor;
pub mod master;
pub mod metrics;
pub mod partition;
pub mod remote;
pub mod report;
pub mod summarizer;
pub mod summary;
pub mod task;
pub mod worker;
