//! Transaction-state-ledger entries: the participants' signed view of a
//! transaction's final state.

use crate::codec::{self, MarshalBinary, UnmarshalBinary};
use crate::error::{Error, Result};
use crate::tx::{MemberId, TxId, MEMBER_ID_SIZE, TX_ID_SIZE};
use crate::types::{Sig, SIGNATURE_SIZE};

pub const TSL_MEMBER_BINARY_SIZE: usize = MEMBER_ID_SIZE + SIGNATURE_SIZE;

pub const TSL_MIN_BINARY_SIZE: usize = TX_ID_SIZE;

/// One participant's signature over the transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TslMember {
    pub id: MemberId,
    pub signature: Sig,
}

impl MarshalBinary for TslMember {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(codec::chain(&[self.id.as_bytes(), self.signature.as_bytes()]))
    }
}

impl UnmarshalBinary for TslMember {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < TSL_MEMBER_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }
        let id = MemberId::unmarshal_binary(&data[..MEMBER_ID_SIZE])?;
        let signature = Sig::from_slice(&data[MEMBER_ID_SIZE..TSL_MEMBER_BINARY_SIZE])?;
        Ok(Self { id, signature })
    }
}

/// A transaction-state-ledger entry.
///
/// Wire form: `TxId ‖ (member:16B ‖ signature:132B) × n`. The member count
/// is implied by the remaining length; an entry may carry no members at
/// all while signatures are still being gathered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tsl {
    pub tx_uuid: TxId,
    pub members: Vec<TslMember>,
}

impl Tsl {
    pub fn new(tx_uuid: TxId, members: Vec<TslMember>) -> Self {
        Self { tx_uuid, members }
    }

    pub fn tx_id(&self) -> &TxId {
        &self.tx_uuid
    }
}

impl MarshalBinary for Tsl {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut data =
            Vec::with_capacity(TX_ID_SIZE + self.members.len() * TSL_MEMBER_BINARY_SIZE);
        data.extend_from_slice(self.tx_uuid.as_bytes());
        for member in &self.members {
            data.extend_from_slice(&member.marshal_binary()?);
        }
        Ok(data)
    }
}

impl UnmarshalBinary for Tsl {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < TSL_MIN_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }

        let tx_uuid = TxId::unmarshal_binary(&data[..TX_ID_SIZE])?;
        let body = &data[TX_ID_SIZE..];
        if body.len() % TSL_MEMBER_BINARY_SIZE != 0 {
            return Err(Error::InvalidDataFormat);
        }

        let mut members = Vec::with_capacity(body.len() / TSL_MEMBER_BINARY_SIZE);
        for chunk in body.chunks_exact(TSL_MEMBER_BINARY_SIZE) {
            members.push(TslMember::unmarshal_binary(chunk)?);
        }
        Ok(Self { tx_uuid, members })
    }
}
