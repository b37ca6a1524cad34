//! Length-delimited JSON framing for [`Frame`]s.
//!
//! Wraps tokio-util's `LengthDelimitedCodec` so the type can be handed
//! straight to `Framed`, `FramedRead` or `FramedWrite`.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{error::WireError, models::Frame};

/// Largest frame accepted in either direction. Tasks and summaries are a few
/// hundred bytes, anything near this is garbage.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Codec turning a byte stream into [`Frame`]s and back.
#[derive(Debug)]
pub struct WireCodec {
    inner: LengthDelimitedCodec,
}

impl WireCodec {
    /// Create a codec with the default frame limit
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .new_codec(),
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        match self.inner.decode(src)? {
            Some(buf) => Ok(Some(serde_json::from_slice(&buf)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Frame> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let payload = serde_json::to_vec(&item)?;
        self.inner.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
