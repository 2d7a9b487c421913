//! Wire protocol for observer-to-observer links.
//!
//! Every message travels in the same envelope: one tag byte from a closed
//! set, a little-endian u32 payload length, then the payload. Long-lived
//! connections carry a stream of such envelopes in each direction.

pub mod framing;
pub mod messages;
pub mod tags;

pub use framing::{CodecError, EnvelopeCodec, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use messages::{
    Approval, Destination, Inbound, Message, Outbound, RequestTimeFrames, ResponseTimeFrame,
};
pub use tags::DataType;
