//! Typed peer messages and the envelopes dispatch moves them in.

use crate::tags::DataType;
use tokio::time::Instant;
use vigil_model::codec::{self, MarshalBinary, UnmarshalBinary};
use vigil_model::types::{DIGEST_SIZE, SIGNATURE_SIZE};
use vigil_model::{
    BlockDigest, BlockSignatures, Claim, Digest, Error, ObserverIndex, Result, Sig, Tsl,
};

/// Asks peers for their current time frame. Empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestTimeFrames;

/// A peer's view of the running frame schedule.
///
/// `received_at` is stamped when the transport hands the decoded response
/// over; it compensates for in-flight latency and never hits the wire.
#[derive(Debug, Clone, Copy)]
pub struct ResponseTimeFrame {
    pub frame_index: u16,
    pub nanoseconds_left: u64,
    pub received_at: Instant,
}

pub const RESPONSE_TIME_FRAME_BINARY_SIZE: usize = codec::U16_SIZE + codec::U64_SIZE;

impl ResponseTimeFrame {
    pub fn new(frame_index: u16, nanoseconds_left: u64) -> Self {
        Self { frame_index, nanoseconds_left, received_at: Instant::now() }
    }
}

// Equality over wire fields only; the receipt stamp is transport-local.
impl PartialEq for ResponseTimeFrame {
    fn eq(&self, other: &Self) -> bool {
        self.frame_index == other.frame_index
            && self.nanoseconds_left == other.nanoseconds_left
    }
}

impl Eq for ResponseTimeFrame {}

impl MarshalBinary for ResponseTimeFrame {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(codec::chain(&[
            &codec::marshal_u16(self.frame_index),
            &codec::marshal_u64(self.nanoseconds_left),
        ]))
    }
}

impl UnmarshalBinary for ResponseTimeFrame {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() != RESPONSE_TIME_FRAME_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }
        let frame_index = codec::unmarshal_u16(data)?;
        let nanoseconds_left = codec::unmarshal_u64(&data[codec::U16_SIZE..])?;
        Ok(Self::new(frame_index, nanoseconds_left))
    }
}

/// One observer's signed approval of a pooled artifact.
///
/// Wire form: `hash:32B ‖ observer:u16 ‖ signature:132B`. The signature
/// covers the pool hash, so recipients can verify provenance against the
/// roster key without a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Approval {
    pub hash: Digest,
    pub observer: ObserverIndex,
    pub signature: Sig,
}

pub const APPROVAL_BINARY_SIZE: usize = DIGEST_SIZE + codec::U16_SIZE + SIGNATURE_SIZE;

impl MarshalBinary for Approval {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(codec::chain(&[
            self.hash.as_bytes(),
            &codec::marshal_u16(self.observer),
            self.signature.as_bytes(),
        ]))
    }
}

impl UnmarshalBinary for Approval {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() != APPROVAL_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }
        let hash = Digest::from_slice(&data[..DIGEST_SIZE])?;
        let observer = codec::unmarshal_u16(&data[DIGEST_SIZE..])?;
        let signature = Sig::from_slice(&data[DIGEST_SIZE + codec::U16_SIZE..])?;
        Ok(Self { hash, observer, signature })
    }
}

/// Every message that may appear on a peer link, one variant per tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    TimeFramesRequest(RequestTimeFrames),
    TimeFrameResponse(ResponseTimeFrame),
    TslBroadcast(Tsl),
    TslApprove(Approval),
    ClaimBroadcast(Claim),
    ClaimApprove(Approval),
    DigestBroadcast(BlockDigest),
    DigestApprove(Approval),
    BlockSignaturesBroadcast(BlockSignatures),
}

impl Message {
    pub fn data_type(&self) -> DataType {
        match self {
            Message::TimeFramesRequest(_) => DataType::RequestTimeFrames,
            Message::TimeFrameResponse(_) => DataType::ResponseTimeFrame,
            Message::TslBroadcast(_) => DataType::RequestTslBroadcast,
            Message::TslApprove(_) => DataType::ResponseTslApprove,
            Message::ClaimBroadcast(_) => DataType::RequestClaimBroadcast,
            Message::ClaimApprove(_) => DataType::ResponseClaimApprove,
            Message::DigestBroadcast(_) => DataType::RequestDigestBroadcast,
            Message::DigestApprove(_) => DataType::ResponseDigestApprove,
            Message::BlockSignaturesBroadcast(_) => {
                DataType::RequestBlockSignaturesBroadcast
            }
        }
    }

    pub fn marshal_payload(&self) -> Result<Vec<u8>> {
        match self {
            Message::TimeFramesRequest(_) => Ok(Vec::new()),
            Message::TimeFrameResponse(response) => response.marshal_binary(),
            Message::TslBroadcast(tsl) => tsl.marshal_binary(),
            Message::TslApprove(approval)
            | Message::ClaimApprove(approval)
            | Message::DigestApprove(approval) => approval.marshal_binary(),
            Message::ClaimBroadcast(claim) => claim.marshal_binary(),
            Message::DigestBroadcast(digest) => digest.marshal_binary(),
            Message::BlockSignaturesBroadcast(signatures) => signatures.marshal_binary(),
        }
    }

    pub fn unmarshal_payload(data_type: DataType, payload: &[u8]) -> Result<Message> {
        match data_type {
            DataType::RequestTimeFrames => {
                if !payload.is_empty() {
                    return Err(Error::InvalidDataFormat);
                }
                Ok(Message::TimeFramesRequest(RequestTimeFrames))
            }
            DataType::ResponseTimeFrame => Ok(Message::TimeFrameResponse(
                ResponseTimeFrame::unmarshal_binary(payload)?,
            )),
            DataType::RequestTslBroadcast => {
                Ok(Message::TslBroadcast(Tsl::unmarshal_binary(payload)?))
            }
            DataType::ResponseTslApprove => {
                Ok(Message::TslApprove(Approval::unmarshal_binary(payload)?))
            }
            DataType::RequestClaimBroadcast => {
                Ok(Message::ClaimBroadcast(Claim::unmarshal_binary(payload)?))
            }
            DataType::ResponseClaimApprove => {
                Ok(Message::ClaimApprove(Approval::unmarshal_binary(payload)?))
            }
            DataType::RequestDigestBroadcast => Ok(Message::DigestBroadcast(
                BlockDigest::unmarshal_binary(payload)?,
            )),
            DataType::ResponseDigestApprove => {
                Ok(Message::DigestApprove(Approval::unmarshal_binary(payload)?))
            }
            DataType::RequestBlockSignaturesBroadcast => Ok(
                Message::BlockSignaturesBroadcast(BlockSignatures::unmarshal_binary(payload)?),
            ),
        }
    }
}

/// Where dispatch should deliver an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Observer(ObserverIndex),
    Broadcast,
}

/// An outbound message with its destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Destination,
    pub message: Message,
}

impl Outbound {
    pub fn to_observer(observer: ObserverIndex, message: Message) -> Self {
        Self { to: Destination::Observer(observer), message }
    }

    pub fn broadcast(message: Message) -> Self {
        Self { to: Destination::Broadcast, message }
    }
}

/// An inbound message tagged with the observer it arrived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound<T> {
    pub from: ObserverIndex,
    pub body: T,
}

impl<T> Inbound<T> {
    pub fn new(from: ObserverIndex, body: T) -> Self {
        Self { from, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::{ClaimMembers, MemberId, TxId};

    #[test]
    fn test_response_time_frame_roundtrip() {
        let response = ResponseTimeFrame::new(5, 1_000_000_000);
        let data = response.marshal_binary().unwrap();
        assert_eq!(data.len(), RESPONSE_TIME_FRAME_BINARY_SIZE);
        assert_eq!(ResponseTimeFrame::unmarshal_binary(&data).unwrap(), response);
    }

    #[test]
    fn test_response_time_frame_truncated() {
        let response = ResponseTimeFrame::new(5, 42);
        let data = response.marshal_binary().unwrap();
        assert_eq!(
            ResponseTimeFrame::unmarshal_binary(&data[..9]),
            Err(Error::InvalidDataFormat)
        );
    }

    #[test]
    fn test_approval_roundtrip() {
        let approval = Approval {
            hash: Digest::of(b"artifact"),
            observer: 17,
            signature: Sig([3u8; SIGNATURE_SIZE]),
        };
        let data = approval.marshal_binary().unwrap();
        assert_eq!(data.len(), APPROVAL_BINARY_SIZE);
        assert_eq!(Approval::unmarshal_binary(&data).unwrap(), approval);
    }

    #[test]
    fn test_message_payload_roundtrip() {
        let claim = Claim::new(
            TxId::random(),
            ClaimMembers::new(vec![MemberId::random()]),
        );
        let message = Message::ClaimBroadcast(claim);

        let payload = message.marshal_payload().unwrap();
        let decoded = Message::unmarshal_payload(message.data_type(), &payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_time_frames_request_payload_must_be_empty() {
        assert!(Message::unmarshal_payload(DataType::RequestTimeFrames, &[]).is_ok());
        assert_eq!(
            Message::unmarshal_payload(DataType::RequestTimeFrames, &[0]),
            Err(Error::InvalidDataFormat)
        );
    }
}
