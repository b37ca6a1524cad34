//! Performs a single request and measures how long it took.
//!
//! The execution loops only depend on the [`Executor`] trait; [`HttpExecutor`]
//! is the implementation the binary wires in.
use std::{fmt, time::Duration};

use async_trait::async_trait;
use gb_wire::Credentials;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::time::Instant;

/// Outcome of a request that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// This attempt failed, the next one may not. Counted as one error.
    #[error("request failed: {0}")]
    Failed(String),
    /// No attempt can ever succeed, stop the loop.
    #[error("unrecoverable executor error: {0}")]
    Fatal(String),
}

impl RequestError {
    /// true when the loop must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, RequestError::Fatal(_))
    }
}

/// Performs one request against `endpoint` and returns the elapsed time.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// issue one request
    async fn execute(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Duration, RequestError>;
}

/// `GET`s the endpoint over HTTP(S); non-2xx responses count as failures.
#[derive(Clone)]
pub struct HttpExecutor {
    client: Client,
}

impl fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExecutor").finish_non_exhaustive()
    }
}

impl HttpExecutor {
    /// Create an executor whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Duration, RequestError> {
        let url = Url::parse(endpoint)
            .map_err(|err| RequestError::Fatal(format!("invalid target `{endpoint}`: {err}")))?;
        let mut req = self.client.get(url);
        if let Some(creds) = credentials {
            req = req.basic_auth(&creds.username, Some(&creds.password));
        }

        let start = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|err| RequestError::Failed(err.to_string()))?;
        let status = resp.status();
        // the body is part of the response time
        resp.bytes()
            .await
            .map_err(|err| RequestError::Failed(err.to_string()))?;
        let elapsed = start.elapsed();

        if !status.is_success() {
            return Err(RequestError::Failed(format!("unexpected status {status}")));
        }
        Ok(elapsed)
    }
}
