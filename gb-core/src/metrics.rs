#![allow(missing_docs)] // macros dont play nicely with docstrings

//! # metrics
//!
//! process wide counters for a benchmark run
use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, TextEncoder, register_int_counter,
    register_int_counter_vec,
};

lazy_static! {
    /// When the process started
    pub static ref START_TIME: Instant = Instant::now();

    /// requests issued by local execution loops, by result
    pub static ref REQUESTS: IntCounterVec = register_int_counter_vec!(
        "gb_requests_total",
        "requests performed by this process",
        &["result"]
    )
    .unwrap();

    /// tasks handed to workers
    pub static ref TASKS_DISPATCHED: IntCounter = register_int_counter!("gb_tasks_dispatched", "tasks handed to workers").unwrap();

    /// summaries folded into the aggregate
    pub static ref SUMMARIES_RECEIVED: IntCounter = register_int_counter!("gb_summaries_received", "summaries folded into the report").unwrap();

    /// summaries dropped as duplicates or for unknown tasks
    pub static ref SUMMARIES_IGNORED: IntCounter = register_int_counter!("gb_summaries_ignored", "summaries for unknown or already closed tasks").unwrap();

    /// tasks whose summary never arrived before the deadline
    pub static ref LOST_WORKERS: IntCounter = register_int_counter!("gb_lost_workers", "tasks lost to the run deadline").unwrap();

    /// tasks whose worker stopped early
    pub static ref FAULTED_WORKERS: IntCounter = register_int_counter!("gb_faulted_workers", "tasks whose worker faulted").unwrap();
}

/// successful request
pub fn request_succeeded() {
    REQUESTS.with_label_values(&["success"]).inc();
}

/// failed request
pub fn request_failed() {
    REQUESTS.with_label_values(&["error"]).inc();
}

/// Render every registered metric in the prometheus text format
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        request_succeeded();
        TASKS_DISPATCHED.inc();
        let text = render().unwrap();
        assert!(text.contains("gb_requests_total"));
        assert!(text.contains("gb_tasks_dispatched"));
    }
}
