//! # gb-wire
//!
//! Frames exchanged between a gb master and the workers it drives on other
//! machines.
//!
//! Only two messages ever cross the wire:
//! - a **task** travels master -> worker and describes the load one virtual
//!   user generates;
//! - a **summary** travels worker -> master and carries the outcome of exactly
//!   one task.
//!
//! Frames are JSON documents behind a 4-byte big-endian length prefix, see
//! [`WireCodec`].
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod codec;
pub mod error;
pub mod models;

pub use codec::WireCodec;
pub use error::{WireError, WireResult};
pub use models::{Credentials, Frame, SummaryMessage, TaskMessage};
