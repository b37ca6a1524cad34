#![allow(clippy::cognitive_complexity)]
use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result, anyhow};

use gb_core::{
    AggregateReport, HttpExecutor, Master, RunConfig, WorkerService,
    config::{
        RunMode,
        cli::{self, Parser},
        trace,
    },
    error::RunError,
    metrics,
    tokio::{self, runtime::Builder, signal},
    tracing::*,
};
use tracing_futures::Instrument;

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;
use tokio_util::sync::CancellationToken;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// process exit status for a run that reported every summary
const EXIT_COMPLETE: u8 = 0;
/// some workers were lost to the deadline
const EXIT_DEGRADED: u8 = 1;
/// bad configuration, or the run never got going
const EXIT_FAILED: u8 = 2;

fn main() -> Result<ExitCode> {
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.gb_log)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    let rt = builder.build()?;

    let code = rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => {
                error!(?err, "gb task panicked");
                EXIT_FAILED
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                EXIT_FAILED
            }
            Ok(Ok(code)) => {
                debug!(code, "exiting...");
                code
            }
        }
    });

    Ok(ExitCode::from(code))
}

async fn start(config: cli::Config) -> Result<u8> {
    let json = config.json;
    let print_metrics = config.metrics;

    if config.mode == RunMode::Proxy {
        return start_proxy(config).await.map(|_| EXIT_COMPLETE);
    }

    let run_config = match RunConfig::try_from(config) {
        Ok(run_config) => run_config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return Ok(EXIT_FAILED);
        }
    };
    let executor = Arc::new(HttpExecutor::new(run_config.request_timeout)?);
    let mut master = Master::new(run_config, executor);

    // ctrl-c stops local workers early, whatever they did still gets reported
    let token = master.shutdown_token();
    tokio::spawn(shutdown_signal(token).in_current_span());

    let code = match master.run().await {
        Ok(report) => {
            print_report(&report, json)?;
            if report.is_degraded() {
                warn!(
                    lost = report.lost_workers.len(),
                    "run degraded, some workers never reported"
                );
                EXIT_DEGRADED
            } else {
                EXIT_COMPLETE
            }
        }
        Err(err) => {
            report_failure(&err);
            EXIT_FAILED
        }
    };

    if print_metrics {
        println!("{}", metrics::render()?);
    }
    Ok(code)
}

/// Serve as a remote worker until ctrl-c.
async fn start_proxy(config: cli::Config) -> Result<()> {
    let executor = Arc::new(HttpExecutor::new(std::time::Duration::from_millis(
        config.request_timeout,
    ))?);
    let service = WorkerService::bind(&config.listen, executor)
        .await
        .with_context(|| format!("failed to start proxy worker on {}", config.listen))?;

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()).in_current_span());
    service
        .serve(token)
        .instrument(info_span!("proxy", listen = %config.listen))
        .await
        .map_err(|err| anyhow!(err))
}

fn print_report(report: &AggregateReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report.human_summary());
    }
    Ok(())
}

fn report_failure(err: &RunError) {
    if err.is_no_workers() {
        error!(%err, "No workers available, nothing was dispatched");
    } else {
        error!(%err, "run failed");
    }
}

async fn shutdown_signal(token: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => info!("interrupted, shutting down"),
        Err(err) => {
            error!(?err, "failed to listen for ctrl-c");
            return;
        }
    }
    token.cancel();
}
