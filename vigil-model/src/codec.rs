//! Little-endian binary primitives shared by every wire entity.

use crate::error::{Error, Result};

pub const U16_SIZE: usize = 2;
pub const U32_SIZE: usize = 4;
pub const U64_SIZE: usize = 8;

/// An entity with a deterministic binary form.
pub trait MarshalBinary {
    fn marshal_binary(&self) -> Result<Vec<u8>>;
}

/// An entity reconstructable from its binary form.
pub trait UnmarshalBinary: Sized {
    fn unmarshal_binary(data: &[u8]) -> Result<Self>;
}

pub fn marshal_u16(value: u16) -> [u8; U16_SIZE] {
    value.to_le_bytes()
}

pub fn marshal_u32(value: u32) -> [u8; U32_SIZE] {
    value.to_le_bytes()
}

pub fn marshal_u64(value: u64) -> [u8; U64_SIZE] {
    value.to_le_bytes()
}

pub fn unmarshal_u16(data: &[u8]) -> Result<u16> {
    let bytes = data.get(..U16_SIZE).ok_or(Error::InvalidDataFormat)?;
    Ok(u16::from_le_bytes(bytes.try_into().expect("sliced to size")))
}

pub fn unmarshal_u32(data: &[u8]) -> Result<u32> {
    let bytes = data.get(..U32_SIZE).ok_or(Error::InvalidDataFormat)?;
    Ok(u32::from_le_bytes(bytes.try_into().expect("sliced to size")))
}

pub fn unmarshal_u64(data: &[u8]) -> Result<u64> {
    let bytes = data.get(..U64_SIZE).ok_or(Error::InvalidDataFormat)?;
    Ok(u64::from_le_bytes(bytes.try_into().expect("sliced to size")))
}

/// Concatenates byte runs into one buffer sized to the known total.
pub fn chain(slices: &[&[u8]]) -> Vec<u8> {
    let total = slices.iter().map(|s| s.len()).sum();
    let mut data = Vec::with_capacity(total);
    for slice in slices {
        data.extend_from_slice(slice);
    }
    data
}
