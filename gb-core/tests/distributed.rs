//! Whole runs: a master driving proxy workers over loopback TCP.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use gb_core::{
    Credentials, Executor, Master, RequestError, RunConfig, RunStatus, WorkerId, WorkerService,
    async_trait,
    config::RunMode,
    tokio::{self, net::TcpListener},
    tokio_util::sync::CancellationToken,
};

/// Answers every request after a fixed latency without waiting for it.
#[derive(Debug)]
struct FixedExecutor {
    latency: Duration,
    calls: AtomicU64,
}

impl FixedExecutor {
    fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Executor for FixedExecutor {
    async fn execute(
        &self,
        endpoint: &str,
        _credentials: Option<&Credentials>,
    ) -> Result<Duration, RequestError> {
        assert_eq!(endpoint, "http://target.test/");
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.latency)
    }
}

async fn spawn_worker(executor: Arc<FixedExecutor>, token: &CancellationToken) -> SocketAddr {
    let service = WorkerService::bind("127.0.0.1:0", executor).await.unwrap();
    let addr = service.local_addr().unwrap();
    tokio::spawn(service.serve(token.child_token()));
    addr
}

fn master_config(concurrency: usize, requests: u64, workers: Vec<String>) -> RunConfig {
    RunConfig {
        mode: RunMode::Master,
        concurrency,
        requests,
        target: "http://target.test/".into(),
        workers,
        host_addr: "127.0.0.1:0".into(),
        deadline: Duration::from_secs(10),
        ..RunConfig::default()
    }
}

#[tokio::test]
async fn test_two_workers_share_the_load() {
    let token = CancellationToken::new();
    let exec = FixedExecutor::new(Duration::from_millis(100));
    let first = spawn_worker(exec.clone(), &token).await;
    let second = spawn_worker(exec.clone(), &token).await;

    let config = master_config(4, 10, vec![first.to_string(), second.to_string()]);
    let mut master = Master::new(config, FixedExecutor::new(Duration::ZERO));
    let report = master.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.expected, 4);
    assert_eq!(report.received, 4);
    assert_eq!(report.total_succeeded, 40);
    assert_eq!(report.total_failed, 0);
    assert_eq!(report.avg_latency, Duration::from_millis(100));
    assert_eq!(report.min_latency, Some(Duration::from_millis(100)));
    assert_eq!(report.max_latency, Some(Duration::from_millis(100)));
    assert!(report.lost_workers.is_empty());
    assert_eq!(exec.calls.load(Ordering::SeqCst), 40);
    token.cancel();
}

#[tokio::test]
async fn test_uneven_split_goes_to_first_worker() {
    let token = CancellationToken::new();
    let first_exec = FixedExecutor::new(Duration::from_millis(1));
    let second_exec = FixedExecutor::new(Duration::from_millis(1));
    let first = spawn_worker(first_exec.clone(), &token).await;
    let second = spawn_worker(second_exec.clone(), &token).await;

    let config = master_config(5, 2, vec![first.to_string(), second.to_string()]);
    let report = Master::new(config, FixedExecutor::new(Duration::ZERO))
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.total_succeeded, 10);
    // 3 users on the first worker, 2 on the second
    assert_eq!(first_exec.calls.load(Ordering::SeqCst), 6);
    assert_eq!(second_exec.calls.load(Ordering::SeqCst), 4);
    token.cancel();
}

#[tokio::test]
async fn test_silent_worker_degrades_the_run() {
    let token = CancellationToken::new();
    let exec = FixedExecutor::new(Duration::from_millis(2));
    let healthy = spawn_worker(exec, &token).await;

    // accepts tasks and never answers
    let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = silent.accept().await {
            held.push(stream);
        }
    });

    let config = RunConfig {
        deadline: Duration::from_millis(750),
        ..master_config(2, 3, vec![healthy.to_string(), silent_addr.clone()])
    };
    let report = Master::new(config, FixedExecutor::new(Duration::ZERO))
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Degraded);
    assert_eq!(report.expected, 2);
    assert_eq!(report.received, 1);
    assert_eq!(report.total_succeeded, 3);
    // one error per lost worker
    assert_eq!(report.total_failed, 1);
    assert_eq!(report.lost_workers.len(), 1);
    assert_eq!(report.lost_workers[0].worker, WorkerId::Remote(silent_addr));
    assert!(report.wall_clock >= Duration::from_millis(750));
    token.cancel();
}

#[tokio::test]
async fn test_unreachable_worker_fails_the_run() {
    let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gone_addr = gone.local_addr().unwrap().to_string();
    drop(gone);

    let mut master = Master::new(
        master_config(2, 1, vec![gone_addr]),
        FixedExecutor::new(Duration::ZERO),
    );
    let err = master.run().await.unwrap_err();
    assert!(err.is_no_workers());
    assert_eq!(master.state(), gb_core::RunState::Failed);
}

#[tokio::test]
async fn test_standalone_run_with_credentials() {
    let exec = FixedExecutor::new(Duration::from_millis(7));
    let config = RunConfig {
        concurrency: 3,
        requests: 5,
        target: "http://target.test/".into(),
        credentials: Some(Credentials::new("user", "pass")),
        ..RunConfig::default()
    };
    let report = Master::new(config, exec.clone()).run().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.total_requests(), 15);
    assert_eq!(report.avg_latency, Duration::from_millis(7));
    assert_eq!(exec.calls.load(Ordering::SeqCst), 15);
    assert!(!report.human_summary().is_empty());
}

#[tokio::test]
async fn test_workers_without_slots_get_no_task() {
    let token = CancellationToken::new();
    let execs = [
        FixedExecutor::new(Duration::from_millis(4)),
        FixedExecutor::new(Duration::from_millis(4)),
        FixedExecutor::new(Duration::from_millis(4)),
    ];
    let mut addrs = Vec::new();
    for exec in &execs {
        addrs.push(spawn_worker(exec.clone(), &token).await.to_string());
    }

    let report = Master::new(master_config(2, 3, addrs), FixedExecutor::new(Duration::ZERO))
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.expected, 2);
    assert_eq!(report.received, 2);
    assert_eq!(report.total_succeeded, 6);
    assert_eq!(execs[0].calls.load(Ordering::SeqCst), 3);
    assert_eq!(execs[1].calls.load(Ordering::SeqCst), 3);
    assert_eq!(execs[2].calls.load(Ordering::SeqCst), 0);
    token.cancel();
}

#[tokio::test]
async fn test_worker_that_stops_reading_cannot_stall_dispatch() {
    // accepts the connection and never reads from it, so the send buffer fills
    let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stalled_addr = stalled.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = stalled.accept().await {
            held.push(stream);
        }
    });

    let config = RunConfig {
        deadline: Duration::from_secs(1),
        ..master_config(300_000, 1, vec![stalled_addr])
    };
    let mut master = Master::new(config, FixedExecutor::new(Duration::ZERO));
    let report = tokio::time::timeout(Duration::from_secs(20), master.run())
        .await
        .expect("run must end shortly after the deadline")
        .unwrap();

    assert_eq!(master.state(), gb_core::RunState::Complete);
    assert_eq!(report.status, RunStatus::Degraded);
    assert_eq!(report.expected, 300_000);
    assert_eq!(report.received, 0);
    assert_eq!(report.lost_workers.len(), 300_000);
    assert_eq!(report.total_failed, 300_000);
}
