//! Transaction and participant identifiers.

use crate::codec::{MarshalBinary, UnmarshalBinary};
use crate::error::{Error, Result};
use std::fmt;
use uuid::Uuid;

pub const TX_ID_SIZE: usize = 16;
pub const MEMBER_ID_SIZE: usize = 16;

/// A 16-byte transaction identifier. Every pooled artifact exposes one.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct TxId(Uuid);

impl TxId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn from_bytes(bytes: [u8; TX_ID_SIZE]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; TX_ID_SIZE] {
        self.0.as_bytes()
    }
}

impl MarshalBinary for TxId {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }
}

impl UnmarshalBinary for TxId {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let bytes: [u8; TX_ID_SIZE] =
            data.get(..TX_ID_SIZE)
                .ok_or(Error::InvalidDataFormat)?
                .try_into()
                .expect("sliced to size");
        Ok(Self(Uuid::from_bytes(bytes)))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

/// A 16-byte participant identity inside a claim or TSL.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct MemberId(Uuid);

impl MemberId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; MEMBER_ID_SIZE]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; MEMBER_ID_SIZE] {
        self.0.as_bytes()
    }
}

impl MarshalBinary for MemberId {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }
}

impl UnmarshalBinary for MemberId {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let bytes: [u8; MEMBER_ID_SIZE] =
            data.get(..MEMBER_ID_SIZE)
                .ok_or(Error::InvalidDataFormat)?
                .try_into()
                .expect("sliced to size");
        Ok(Self(Uuid::from_bytes(bytes)))
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberId({})", self.0)
    }
}
