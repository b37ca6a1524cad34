//! Error taxonomy for a benchmark run.
//!
//! Request-level failures never leave the worker that saw them (see
//! [`RequestError`]); what is left here is what can stop a run outright.
//!
//! [`RequestError`]: crate::executor::RequestError
use std::io;

use gb_wire::WireError;
use thiserror::Error;

use crate::config::RunMode;

/// Invalid or incomplete run configuration, detected before any dispatch.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `-A` was given but is not `user:pass`
    #[error("no valid credentials found in -A argument")]
    InvalidCredentials,
    /// the pool came out empty
    #[error("no workers available in {mode} mode")]
    NoWorkers {
        /// mode the pool was built for
        mode: RunMode,
    },
    /// the run mode cannot drive a master
    #[error("{mode} mode does not run a master")]
    InvalidMode {
        /// the offending mode
        mode: RunMode,
    },
    /// any other rejected value
    #[error("{0}")]
    Invalid(String),
}

/// Failure talking to a remote worker or serving the result endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// a remote worker could not be reached
    #[error("unable to connect worker at {addr}: {source}")]
    Connect {
        /// worker address as configured
        addr: String,
        /// underlying cause
        #[source]
        source: io::Error,
    },
    /// a listening socket could not be opened
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        /// listen address as configured
        addr: String,
        /// underlying cause
        #[source]
        source: io::Error,
    },
    /// reading or writing a frame failed
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// other socket failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Why a run ended in `FAILED`.
#[derive(Debug, Error)]
pub enum RunError {
    /// bad configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// unrecoverable transport fault
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RunError {
    /// true when nothing was dispatched because no worker could be used
    pub fn is_no_workers(&self) -> bool {
        matches!(
            self,
            RunError::Config(ConfigError::NoWorkers { .. })
                | RunError::Transport(TransportError::Connect { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_workers_classification() {
        let empty: RunError = ConfigError::NoWorkers {
            mode: RunMode::Standalone,
        }
        .into();
        assert!(empty.is_no_workers());

        let unreachable: RunError = TransportError::Connect {
            addr: "10.0.0.9:1977".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        }
        .into();
        assert!(unreachable.is_no_workers());
        assert!(unreachable.to_string().contains("10.0.0.9:1977"));

        let creds: RunError = ConfigError::InvalidCredentials.into();
        assert!(!creds.is_no_workers());
    }
}
