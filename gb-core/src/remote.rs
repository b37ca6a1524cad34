//! The proxy side of a distributed run: `gb --mode proxy`.
//!
//! A [`WorkerService`] accepts connections from masters, runs every task it
//! is sent with its own executor and reports one summary per task. Summaries
//! go to the `report_addr` named in the task. When that address is missing
//! or unreachable they are written back on the connection the task came in on.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use gb_wire::{Frame, SummaryMessage, TaskMessage, WireCodec};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinSet,
    time,
};
use tokio_util::{
    codec::{Framed, FramedWrite},
    sync::CancellationToken,
};
use tracing::{debug, error, info, info_span, trace, warn};
use tracing_futures::Instrument;

use crate::{
    error::TransportError,
    executor::Executor,
    task::Task,
    worker::{execute_task, proxy},
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);
/// room for summaries waiting to be written back inline
const REPLY_BUFFER: usize = 64;

/// A remote worker listening for tasks.
pub struct WorkerService {
    listener: TcpListener,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for WorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerService")
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl WorkerService {
    /// Listen on `addr`. Tasks will be executed with `executor`.
    pub async fn bind(addr: &str, executor: Arc<dyn Executor>) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        Ok(Self { listener, executor })
    }

    /// the bound address
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve masters until `shutdown` fires. Tasks still running at that
    /// point are cancelled and report what they managed so far.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), TransportError> {
        let local_addr = self.listener.local_addr()?;
        info!(%local_addr, "proxy worker waiting for tasks");
        let mut conns = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested, closing listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "master connected");
                        conns.spawn(
                            handle_master(stream, self.executor.clone(), shutdown.child_token())
                                .instrument(info_span!("master_conn", %peer)),
                        );
                    }
                    Err(err) => {
                        warn!(?err, "failed to accept master connection");
                        time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = conns.join_next(), if !conns.is_empty() => {
                    if let Err(err) = joined {
                        error!(?err, "master connection task failed");
                    }
                }
            }
        }
        // connections see the cancelled token and wind down on their own
        while conns.join_next().await.is_some() {}
        Ok(())
    }
}

async fn handle_master(stream: TcpStream, executor: Arc<dyn Executor>, shutdown: CancellationToken) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(?err, "failed to set TCP_NODELAY");
    }
    let (mut sink, mut frames) = Framed::new(stream, WireCodec::new()).split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Frame>(REPLY_BUFFER);
    let writer = tokio::spawn(
        async move {
            while let Some(frame) = reply_rx.recv().await {
                if let Err(err) = sink.send(frame).await {
                    warn!(?err, "failed to write summary back to master");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(Frame::Task(msg))) => {
                    let task_id = msg.task_id;
                    trace!(task_id, requests = msg.requests, "task received");
                    running.spawn(
                        run_remote_task(msg, executor.clone(), shutdown.clone(), reply_tx.clone())
                            .instrument(info_span!("remote_task", task_id)),
                    );
                }
                Some(Ok(other)) => {
                    warn!(kind = other.kind(), "unexpected frame from master, ignoring");
                }
                Some(Err(err)) => {
                    warn!(?err, "bad frame from master, closing connection");
                    break;
                }
                None => {
                    debug!("master closed the task stream");
                    break;
                }
            }
        }
    }

    while running.join_next().await.is_some() {}
    drop(reply_tx);
    if let Err(err) = writer.await {
        error!(?err, "summary writer failed");
    }
}

async fn run_remote_task(
    msg: TaskMessage,
    executor: Arc<dyn Executor>,
    shutdown: CancellationToken,
    inline: mpsc::Sender<Frame>,
) {
    let task = Task::from(msg);
    let outcome = execute_task(executor.as_ref(), &task, &shutdown).await;
    let frame = Frame::Summary(SummaryMessage::from(outcome));

    let frame = match task.report_addr() {
        Some(addr) => match report(addr, frame.clone()).await {
            Ok(()) => {
                debug!(%addr, "summary reported");
                return;
            }
            Err(err) => {
                warn!(%addr, ?err, "failed to reach result endpoint, replying inline");
                frame
            }
        },
        None => frame,
    };
    if inline.send(frame).await.is_err() {
        warn!(task_id = %task.id(), "master connection gone, summary dropped");
    }
}

async fn report(addr: &str, frame: Frame) -> Result<(), TransportError> {
    let stream = proxy::connect(addr).await?;
    let mut writer = FramedWrite::new(stream, WireCodec::new());
    writer.send(frame).await?;
    writer.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use gb_wire::Credentials;
    use tokio::time::Instant;
    use tokio_util::codec::Framed;

    use super::*;
    use crate::{
        channel::{Recv, ResultEndpoint, result_channel},
        executor::RequestError,
        task::TaskId,
    };

    #[derive(Debug)]
    struct Fixed(Duration);

    #[async_trait]
    impl Executor for Fixed {
        async fn execute(
            &self,
            _endpoint: &str,
            _credentials: Option<&Credentials>,
        ) -> Result<Duration, RequestError> {
            Ok(self.0)
        }
    }

    async fn start_service() -> (SocketAddr, CancellationToken) {
        let service = WorkerService::bind("127.0.0.1:0", Arc::new(Fixed(Duration::from_millis(3))))
            .await
            .unwrap();
        let addr = service.local_addr().unwrap();
        let token = CancellationToken::new();
        tokio::spawn(service.serve(token.clone()));
        (addr, token)
    }

    fn task_msg(task_id: u64, report_addr: Option<String>) -> TaskMessage {
        TaskMessage {
            task_id,
            target: "http://localhost/".into(),
            requests: 4,
            credentials: None,
            report_addr,
        }
    }

    #[tokio::test]
    async fn test_summary_goes_to_report_addr() {
        let (tx, mut rx) = result_channel(4);
        let endpoint = ResultEndpoint::bind("127.0.0.1:0", tx).await.unwrap();
        let (addr, token) = start_service().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut master = Framed::new(stream, WireCodec::new());
        master
            .send(Frame::Task(task_msg(5, Some(endpoint.local_addr().to_string()))))
            .await
            .unwrap();

        match rx.recv_until(Instant::now() + Duration::from_secs(5)).await {
            Recv::Outcome(outcome) => {
                assert_eq!(outcome.task_id(), TaskId(5));
                assert_eq!(outcome.summary().success_count, 4);
                assert_eq!(outcome.summary().avg_latency, Duration::from_millis(3));
            }
            other => panic!("expected outcome, got {other:?}"),
        }
        token.cancel();
    }

    #[tokio::test]
    async fn test_summary_falls_back_to_inline_reply() {
        let (addr, token) = start_service().await;

        // nothing listens on this address any more
        let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gone_addr = gone.local_addr().unwrap().to_string();
        drop(gone);

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut master = Framed::new(stream, WireCodec::new());
        master.send(Frame::Task(task_msg(1, None))).await.unwrap();
        master
            .send(Frame::Task(task_msg(2, Some(gone_addr))))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for _ in 0..2 {
            match time::timeout(Duration::from_secs(10), master.next()).await {
                Ok(Some(Ok(Frame::Summary(msg)))) => {
                    assert_eq!(msg.success_count, 4);
                    assert_eq!(msg.error_count, 0);
                    ids.push(msg.task_id);
                }
                other => panic!("expected inline summary, got {other:?}"),
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
        token.cancel();
    }

    #[tokio::test]
    async fn test_serve_returns_on_shutdown() {
        let service = WorkerService::bind("127.0.0.1:0", Arc::new(Fixed(Duration::ZERO)))
            .await
            .unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(service.serve(token.clone()));
        token.cancel();
        time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
