//! The result channel: many workers produce [`WorkerOutcome`]s, the summarizer
//! consumes them.
//!
//! Local workers hand outcomes over in-process through a [`ResultSender`].
//! Remote workers connect to a [`ResultEndpoint`] (or answer on their dispatch
//! connection) and every summary frame they send is forwarded into the very
//! same channel, so the consumer never knows where an outcome came from.
use std::{net::SocketAddr, time::Duration};

use futures::{Stream, StreamExt};
use gb_wire::{Frame, WireCodec, WireError};
use tokio::{
    net::TcpListener,
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::{self, Instant},
};
use tokio_util::codec::FramedRead;
use tracing::{debug, info_span, trace, warn};
use tracing_futures::Instrument;

use crate::{error::TransportError, summary::WorkerOutcome};

/// pause after a failed `accept` so a persistent error can't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Create a result channel holding at most `capacity` undelivered outcomes.
pub fn result_channel(capacity: usize) -> (ResultSender, ResultReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (ResultSender { tx }, ResultReceiver { rx })
}

/// Producer half, cheap to clone. One per worker.
#[derive(Debug, Clone)]
pub struct ResultSender {
    tx: mpsc::Sender<WorkerOutcome>,
}

impl ResultSender {
    /// Deliver an outcome. Returns false when the summarizer has already
    /// finished and nobody is listening any more.
    pub async fn send(&self, outcome: WorkerOutcome) -> bool {
        let task_id = outcome.task_id();
        match self.tx.send(outcome).await {
            Ok(()) => true,
            Err(_) => {
                debug!(%task_id, "result channel closed, outcome dropped");
                false
            }
        }
    }
}

/// What a bounded receive produced.
#[derive(Debug)]
pub enum Recv {
    /// next outcome
    Outcome(WorkerOutcome),
    /// every producer is gone, nothing else can arrive
    Closed,
    /// the deadline passed first
    TimedOut,
}

/// Consumer half. Exactly one exists per run.
#[derive(Debug)]
pub struct ResultReceiver {
    rx: mpsc::Receiver<WorkerOutcome>,
}

impl ResultReceiver {
    /// Wait for the next outcome, but never past `deadline`.
    pub async fn recv_until(&mut self, deadline: Instant) -> Recv {
        match time::timeout_at(deadline, self.rx.recv()).await {
            Ok(Some(outcome)) => Recv::Outcome(outcome),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::TimedOut,
        }
    }

    /// Stop accepting new outcomes. Late producers get `false` from
    /// [`ResultSender::send`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// TCP endpoint remote workers deliver summaries to. Dropping it stops the
/// accept loop and every connection it spawned.
#[derive(Debug)]
pub struct ResultEndpoint {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ResultEndpoint {
    /// Listen on `addr` and forward every summary received into `results`.
    pub async fn bind(addr: &str, results: ResultSender) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "result endpoint listening");
        let task = tokio::spawn(
            accept_loop(listener, results).instrument(info_span!("result_endpoint", %local_addr)),
        );
        Ok(Self { local_addr, task })
    }

    /// the bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ResultEndpoint {
    fn drop(&mut self) {
        trace!("result endpoint dropped");
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, results: ResultSender) {
    // dropping the set on abort tears down live connections too
    let mut conns = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "worker connected");
                    let frames = FramedRead::new(stream, WireCodec::new());
                    let peer = peer.to_string();
                    conns.spawn(
                        forward_summaries(peer.clone(), frames, results.clone())
                            .instrument(info_span!("result_conn", %peer)),
                    );
                }
                Err(err) => {
                    warn!(?err, "failed to accept worker connection");
                    time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = conns.join_next(), if !conns.is_empty() => {}
        }
    }
}

/// Drain summary frames from `frames` into `results` until the peer hangs up.
/// Returns how many summaries were forwarded.
pub(crate) async fn forward_summaries<S>(peer: String, mut frames: S, results: ResultSender) -> usize
where
    S: Stream<Item = Result<Frame, WireError>> + Unpin,
{
    let mut forwarded = 0;
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Summary(msg)) => {
                trace!(%peer, task_id = msg.task_id, "summary received");
                if !results.send(WorkerOutcome::from(msg)).await {
                    break;
                }
                forwarded += 1;
            }
            Ok(other) => {
                warn!(%peer, kind = other.kind(), "unexpected frame on result channel, ignoring");
            }
            Err(err) if err.is_malformed() => {
                warn!(%peer, ?err, "malformed frame, closing connection");
                break;
            }
            Err(err) => {
                warn!(%peer, ?err, "connection dropped");
                break;
            }
        }
    }
    debug!(%peer, forwarded, "worker connection finished");
    forwarded
}
