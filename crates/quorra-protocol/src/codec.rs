//! Message framing.
//!
//! [`MessageCodec`] is the contract both ends of the channel depend on: any
//! `tokio_util` encoder/decoder pair over [`WireMessage`] qualifies, so the
//! encoding can be swapped as long as controller and agent agree.
//!
//! [`JsonFrameCodec`] is the shipped implementation: a 4-byte big-endian
//! length prefix followed by a JSON body. Partial reads stay buffered inside
//! the codec until a whole frame is available.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec, length_delimited};

use crate::errors::ProtocolError;
use crate::messages::WireMessage;

/// Default frame size limit (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Encode/decode contract for the control channel.
pub trait MessageCodec:
    Encoder<WireMessage, Error = ProtocolError>
    + Decoder<Item = WireMessage, Error = ProtocolError>
    + Clone
    + Send
    + Sync
    + 'static
{
    /// Encode one message into a fresh buffer.
    fn encode_to_bytes(&mut self, message: WireMessage) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(message, &mut buf)?;
        Ok(buf.freeze())
    }
}

impl<T> MessageCodec for T where
    T: Encoder<WireMessage, Error = ProtocolError>
        + Decoder<Item = WireMessage, Error = ProtocolError>
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// Length-prefixed JSON frames.
#[derive(Clone, Debug)]
pub struct JsonFrameCodec {
    frames: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl JsonFrameCodec {
    /// Codec with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Codec with a custom frame limit.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .big_endian()
            .max_frame_length(max_frame_length)
            .new_codec();
        Self {
            frames,
            max_frame_length,
        }
    }

    /// Configured frame limit.
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn map_io(&self, error: std::io::Error) -> ProtocolError {
        let oversized = error
            .get_ref()
            .is_some_and(|inner| inner.is::<length_delimited::LengthDelimitedCodecError>());
        if oversized {
            ProtocolError::FrameTooLarge {
                max: self.max_frame_length,
            }
        } else {
            ProtocolError::Io(error)
        }
    }
}

impl Default for JsonFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<WireMessage> for JsonFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(ProtocolError::Encode)?;
        if body.len() > self.max_frame_length {
            return Err(ProtocolError::FrameTooLarge {
                max: self.max_frame_length,
            });
        }
        self.frames
            .encode(Bytes::from(body), dst)
            .map_err(|e| self.map_io(e))
    }
}

impl Decoder for JsonFrameCodec {
    type Item = WireMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = match self.frames.decode(src) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.map_io(e)),
        };
        serde_json::from_slice(&frame)
            .map(Some)
            .map_err(ProtocolError::Decode)
    }
}
