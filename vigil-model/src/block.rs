//! Block-level artifacts: proposed block digests and collected observer
//! signatures over them.

use crate::codec::{self, MarshalBinary, UnmarshalBinary};
use crate::error::{Error, Result};
use crate::observers::ObserverIndex;
use crate::tx::{TxId, TX_ID_SIZE};
use crate::types::{Digest, Sig, DIGEST_SIZE, SIGNATURE_SIZE};
use crate::OBSERVERS_MAX_COUNT;

pub const BLOCK_DIGEST_BINARY_SIZE: usize = TX_ID_SIZE + DIGEST_SIZE;

pub const OBSERVER_SIGNATURE_BINARY_SIZE: usize = codec::U16_SIZE + SIGNATURE_SIZE;

/// A proposed block digest awaiting approval.
///
/// Wire form: `TxId ‖ digest:32B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDigest {
    pub tx_uuid: TxId,
    pub digest: Digest,
}

impl BlockDigest {
    pub fn new(tx_uuid: TxId, digest: Digest) -> Self {
        Self { tx_uuid, digest }
    }

    pub fn tx_id(&self) -> &TxId {
        &self.tx_uuid
    }
}

impl MarshalBinary for BlockDigest {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(codec::chain(&[self.tx_uuid.as_bytes(), self.digest.as_bytes()]))
    }
}

impl UnmarshalBinary for BlockDigest {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() != BLOCK_DIGEST_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }
        let tx_uuid = TxId::unmarshal_binary(&data[..TX_ID_SIZE])?;
        let digest = Digest::from_slice(&data[TX_ID_SIZE..])?;
        Ok(Self { tx_uuid, digest })
    }
}

/// One observer's signature over a proposed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverSignature {
    pub observer: ObserverIndex,
    pub signature: Sig,
}

impl MarshalBinary for ObserverSignature {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(codec::chain(&[
            &codec::marshal_u16(self.observer),
            self.signature.as_bytes(),
        ]))
    }
}

impl UnmarshalBinary for ObserverSignature {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < OBSERVER_SIGNATURE_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }
        let observer = codec::unmarshal_u16(data)?;
        if observer >= OBSERVERS_MAX_COUNT {
            return Err(Error::InvalidDataFormat);
        }
        let signature =
            Sig::from_slice(&data[codec::U16_SIZE..OBSERVER_SIGNATURE_BINARY_SIZE])?;
        Ok(Self { observer, signature })
    }
}

/// The set of observer signatures collected for one proposed block.
///
/// Wire form: `TxId ‖ count:u16 ‖ (observer:u16 ‖ signature:132B) × count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSignatures {
    pub tx_uuid: TxId,
    pub signatures: Vec<ObserverSignature>,
}

impl BlockSignatures {
    pub fn new(tx_uuid: TxId, signatures: Vec<ObserverSignature>) -> Self {
        Self { tx_uuid, signatures }
    }

    pub fn tx_id(&self) -> &TxId {
        &self.tx_uuid
    }
}

impl MarshalBinary for BlockSignatures {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        if self.signatures.is_empty() {
            return Err(Error::NilInternalDataStructure);
        }
        if self.signatures.len() > OBSERVERS_MAX_COUNT as usize {
            return Err(Error::MaxCountReached);
        }

        let mut data = Vec::with_capacity(
            TX_ID_SIZE
                + codec::U16_SIZE
                + self.signatures.len() * OBSERVER_SIGNATURE_BINARY_SIZE,
        );
        data.extend_from_slice(self.tx_uuid.as_bytes());
        data.extend_from_slice(&codec::marshal_u16(self.signatures.len() as u16));
        for signature in &self.signatures {
            data.extend_from_slice(&signature.marshal_binary()?);
        }
        Ok(data)
    }
}

impl UnmarshalBinary for BlockSignatures {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < TX_ID_SIZE + codec::U16_SIZE {
            return Err(Error::InvalidDataFormat);
        }

        let tx_uuid = TxId::unmarshal_binary(&data[..TX_ID_SIZE])?;
        let count = codec::unmarshal_u16(&data[TX_ID_SIZE..])? as usize;
        if count == 0 {
            return Err(Error::InvalidDataFormat);
        }
        if count > OBSERVERS_MAX_COUNT as usize {
            return Err(Error::MaxCountReached);
        }

        let body = &data[TX_ID_SIZE + codec::U16_SIZE..];
        if body.len() != count * OBSERVER_SIGNATURE_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }

        let mut signatures = Vec::with_capacity(count);
        for chunk in body.chunks_exact(OBSERVER_SIGNATURE_BINARY_SIZE) {
            signatures.push(ObserverSignature::unmarshal_binary(chunk)?);
        }
        Ok(Self { tx_uuid, signatures })
    }
}
