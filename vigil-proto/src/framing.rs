//! Envelope framing over any byte stream.
//!
//! `tag:u8 ‖ length:u32 LE ‖ payload`. The decoder enforces the closed tag
//! set and a payload ceiling; either violation is a hard error, and the
//! owning connection is expected to be dropped.

use crate::messages::Message;
use crate::tags::DataType;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use vigil_model::codec;

pub const HEADER_SIZE: usize = 1 + codec::U32_SIZE;

/// Hard ceiling on a single payload, against allocator abuse.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown data type tag {0}")]
    UnknownTag(u8),

    #[error("payload of {0} bytes exceeds the envelope ceiling")]
    PayloadTooLarge(usize),

    #[error(transparent)]
    Core(#[from] vigil_model::Error),
}

#[derive(Debug, Default)]
pub struct EnvelopeCodec;

impl Decoder for EnvelopeCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let tag = src[0];
        let length = codec::unmarshal_u32(&src[1..HEADER_SIZE])? as usize;
        if length > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge(length));
        }

        // Reject unknown tags before waiting for their payload.
        let data_type =
            DataType::try_from(tag).map_err(|_| CodecError::UnknownTag(tag))?;

        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(length);
        Ok(Some(Message::unmarshal_payload(data_type, &payload)?))
    }
}

impl<'a> Encoder<&'a Message> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = message.marshal_payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge(payload.len()));
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u8(message.data_type().as_u8());
        dst.put_slice(&codec::marshal_u32(payload.len() as u32));
        dst.put_slice(&payload);
        Ok(())
    }
}
