//! Workers living in another process, reached over TCP.
use std::{fmt, io, time::Duration};

use futures::{SinkExt, StreamExt, stream::SplitSink};
use gb_wire::{Frame, WireCodec};
use tokio::{net::TcpStream, task::JoinHandle, time};
use tokio_util::codec::Framed;
use tracing::{debug, info, info_span, trace};
use tracing_futures::Instrument;

use crate::{
    channel::{ResultSender, forward_summaries},
    error::TransportError,
    task::Task,
    worker::WorkerId,
};

/// Give up on a worker that doesn't accept the connection within this window
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Flushing on shutdown gives up after this, a peer that stopped reading
/// would hold it forever
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Open a TCP connection to `addr`, bounded by [`CONNECT_TIMEOUT`].
pub(crate) async fn connect(addr: &str) -> Result<TcpStream, TransportError> {
    let stream = match time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(TransportError::Connect {
                addr: addr.to_owned(),
                source,
            });
        }
        Err(_) => {
            return Err(TransportError::Connect {
                addr: addr.to_owned(),
                source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
            });
        }
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Master-side handle on a remote worker.
///
/// Tasks go out over a persistent connection. Summaries come back either to
/// the master's result endpoint or inline on this same connection; inline
/// ones are forwarded into the result channel by a background reader.
pub struct ProxyWorker {
    addr: String,
    sink: SplitSink<Framed<TcpStream, WireCodec>, Frame>,
    reader: JoinHandle<usize>,
}

impl fmt::Debug for ProxyWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyWorker")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl ProxyWorker {
    /// Connect to the worker at `addr`. Failing here fails the whole run.
    pub async fn connect(addr: &str, results: ResultSender) -> Result<Self, TransportError> {
        let stream = connect(addr).await?;
        let (sink, frames) = Framed::new(stream, WireCodec::new()).split();
        let peer = addr.to_owned();
        let reader = tokio::spawn(
            forward_summaries(peer.clone(), frames, results)
                .instrument(info_span!("proxy_worker", %peer)),
        );
        info!(%addr, "connected to proxy worker");
        Ok(Self {
            addr: peer,
            sink,
            reader,
        })
    }

    /// identity of this worker
    pub fn id(&self) -> WorkerId {
        WorkerId::Remote(self.addr.clone())
    }

    /// Ship a task to the remote side.
    pub async fn dispatch(&mut self, task: Task) -> Result<(), TransportError> {
        trace!(addr = %self.addr, task_id = %task.id(), "sending task");
        self.sink.send(Frame::Task(task.into())).await?;
        Ok(())
    }

    /// Close the task direction and stop reading inline summaries.
    pub async fn shutdown(&mut self) {
        match time::timeout(CLOSE_TIMEOUT, self.sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(addr = %self.addr, ?err, "error closing proxy connection"),
            Err(_) => debug!(addr = %self.addr, "proxy worker not reading, dropping connection"),
        }
        self.reader.abort();
    }
}

impl Drop for ProxyWorker {
    fn drop(&mut self) {
        trace!(addr = %self.addr, "proxy worker dropped");
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gb_wire::SummaryMessage;
    use tokio::{net::TcpListener, time::Instant};

    use super::*;
    use crate::{
        channel::{Recv, result_channel},
        task::TaskId,
    };

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (tx, _rx) = result_channel(1);
        let err = ProxyWorker::connect(&addr, tx).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(err.to_string().contains(&addr));
    }

    #[tokio::test]
    async fn test_tasks_out_inline_summaries_in() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // remote side echoes every task back as an all-success summary
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, WireCodec::new());
            while let Some(Ok(Frame::Task(task))) = framed.next().await {
                framed
                    .send(Frame::Summary(SummaryMessage {
                        task_id: task.task_id,
                        success_count: task.requests,
                        error_count: 0,
                        avg_ms: 5.0,
                        min_ms: Some(5.0),
                        max_ms: Some(5.0),
                        fault: None,
                    }))
                    .await
                    .unwrap();
            }
        });

        let (tx, mut rx) = result_channel(4);
        let mut worker = ProxyWorker::connect(&addr, tx).await.unwrap();
        assert_eq!(worker.id(), WorkerId::Remote(addr.clone()));
        worker
            .dispatch(Task::new(TaskId(11), "http://x/", 7))
            .await
            .unwrap();

        match rx.recv_until(Instant::now() + Duration::from_secs(5)).await {
            Recv::Outcome(outcome) => {
                assert_eq!(outcome.task_id(), TaskId(11));
                assert_eq!(outcome.summary().success_count, 7);
            }
            other => panic!("expected outcome, got {other:?}"),
        }
        worker.shutdown().await;
    }
}
