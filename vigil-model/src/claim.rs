//! Claims: artifacts asserting participation of a member set in a
//! transaction, and bounded ordered batches of them.

use crate::codec::{self, MarshalBinary, UnmarshalBinary};
use crate::error::{Error, Result};
use crate::tx::{MemberId, TxId, MEMBER_ID_SIZE, TX_ID_SIZE};
use crate::CLAIMS_MAX_COUNT;

/// A claim carries at least one member.
pub const CLAIM_MEMBERS_MIN_COUNT: usize = 1;

pub const CLAIM_MEMBERS_MIN_BINARY_SIZE: usize =
    codec::U16_SIZE + CLAIM_MEMBERS_MIN_COUNT * MEMBER_ID_SIZE;

pub const CLAIM_MIN_BINARY_SIZE: usize = TX_ID_SIZE + CLAIM_MEMBERS_MIN_BINARY_SIZE;

/// Ordered set of participant identities.
///
/// Wire form: `count:u16 ‖ member:16B × count`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClaimMembers {
    at: Vec<MemberId>,
}

impl ClaimMembers {
    pub fn new(at: Vec<MemberId>) -> Self {
        Self { at }
    }

    pub fn add(&mut self, member: MemberId) {
        self.at.push(member);
    }

    pub fn count(&self) -> u16 {
        self.at.len() as u16
    }

    pub fn at(&self) -> &[MemberId] {
        &self.at
    }
}

impl MarshalBinary for ClaimMembers {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        if self.at.is_empty() {
            return Err(Error::NilInternalDataStructure);
        }

        let mut data =
            Vec::with_capacity(codec::U16_SIZE + self.at.len() * MEMBER_ID_SIZE);
        data.extend_from_slice(&codec::marshal_u16(self.count()));
        for member in &self.at {
            data.extend_from_slice(member.as_bytes());
        }
        Ok(data)
    }
}

impl UnmarshalBinary for ClaimMembers {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let count = codec::unmarshal_u16(data)? as usize;
        if count < CLAIM_MEMBERS_MIN_COUNT {
            return Err(Error::InvalidDataFormat);
        }

        let body = &data[codec::U16_SIZE..];
        if body.len() != count * MEMBER_ID_SIZE {
            return Err(Error::InvalidDataFormat);
        }

        let mut at = Vec::with_capacity(count);
        for chunk in body.chunks_exact(MEMBER_ID_SIZE) {
            at.push(MemberId::unmarshal_binary(chunk)?);
        }
        Ok(Self { at })
    }
}

/// An assertion that `members` participated in transaction `tx_uuid`.
///
/// Two claims are equal iff their binary forms are equal; the binary form
/// is `TxId ‖ members`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub tx_uuid: TxId,
    pub members: ClaimMembers,
}

impl Claim {
    pub fn new(tx_uuid: TxId, members: ClaimMembers) -> Self {
        Self { tx_uuid, members }
    }

    pub fn tx_id(&self) -> &TxId {
        &self.tx_uuid
    }
}

impl MarshalBinary for Claim {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let tx_binary = self.tx_uuid.marshal_binary()?;
        let members_binary = self.members.marshal_binary()?;
        Ok(codec::chain(&[&tx_binary, &members_binary]))
    }
}

impl UnmarshalBinary for Claim {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        if data.len() < CLAIM_MIN_BINARY_SIZE {
            return Err(Error::InvalidDataFormat);
        }

        let tx_uuid = TxId::unmarshal_binary(&data[..TX_ID_SIZE])?;
        let members = ClaimMembers::unmarshal_binary(&data[TX_ID_SIZE..])?;
        Ok(Self { tx_uuid, members })
    }
}

/// Bounded ordered batch of claims.
///
/// Wire form: `count:u16 ‖ sizes:(u32 × count) ‖ payloads`. The canonical
/// order is lexicographic over each claim's binary form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Claims {
    at: Vec<Claim>,
}

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, claim: Claim) -> Result<()> {
        if self.count() >= CLAIMS_MAX_COUNT {
            return Err(Error::MaxCountReached);
        }
        self.at.push(claim);
        Ok(())
    }

    pub fn count(&self) -> u16 {
        self.at.len() as u16
    }

    pub fn at(&self) -> &[Claim] {
        &self.at
    }

    /// Sorts into the canonical order.
    pub fn sort(&mut self) -> Result<()> {
        let mut keyed = Vec::with_capacity(self.at.len());
        for claim in self.at.drain(..) {
            keyed.push((claim.marshal_binary()?, claim));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.at = keyed.into_iter().map(|(_, claim)| claim).collect();
        Ok(())
    }
}

impl MarshalBinary for Claims {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(
            codec::U16_SIZE + self.at.len() * codec::U32_SIZE,
        );
        data.extend_from_slice(&codec::marshal_u16(self.count()));

        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(self.at.len());
        for claim in &self.at {
            let payload = claim.marshal_binary()?;
            // Empty payloads are dropped from the stream.
            if payload.is_empty() {
                continue;
            }
            data.extend_from_slice(&codec::marshal_u32(payload.len() as u32));
            payloads.push(payload);
        }

        let slices: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        data.extend_from_slice(&codec::chain(&slices));
        Ok(data)
    }
}

impl UnmarshalBinary for Claims {
    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let count = codec::unmarshal_u16(data)? as usize;
        if count > CLAIMS_MAX_COUNT as usize {
            return Err(Error::MaxCountReached);
        }
        if count == 0 {
            return Ok(Self::default());
        }

        let mut sizes = Vec::with_capacity(count);
        let mut offset = codec::U16_SIZE;
        for _ in 0..count {
            let header = data.get(offset..).ok_or(Error::InvalidDataFormat)?;
            let size = codec::unmarshal_u32(header)? as usize;
            if size == 0 {
                return Err(Error::InvalidDataFormat);
            }
            sizes.push(size);
            offset += codec::U32_SIZE;
        }

        let mut at = Vec::with_capacity(count);
        for size in sizes {
            let payload = data
                .get(offset..offset + size)
                .ok_or(Error::InvalidDataFormat)?;
            at.push(Claim::unmarshal_binary(payload)?);
            offset += size;
        }
        Ok(Self { at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_with_members(seed: u8, members: usize) -> Claim {
        let mut tx = [0u8; TX_ID_SIZE];
        tx[0] = seed;
        Claim::new(
            TxId::from_bytes(tx),
            ClaimMembers::new(
                (0..members)
                    .map(|i| {
                        let mut id = [0u8; MEMBER_ID_SIZE];
                        id[0] = seed;
                        id[1] = i as u8;
                        MemberId::from_bytes(id)
                    })
                    .collect(),
            ),
        )
    }

    #[test]
    fn test_claim_roundtrip() {
        let claim = claim_with_members(0x42, 3);
        let data = claim.marshal_binary().unwrap();
        assert_eq!(data.len(), TX_ID_SIZE + 2 + 3 * MEMBER_ID_SIZE);
        assert_eq!(Claim::unmarshal_binary(&data).unwrap(), claim);
    }

    #[test]
    fn test_claim_without_members_rejected() {
        let claim = Claim::new(TxId::random(), ClaimMembers::default());
        assert_eq!(
            claim.marshal_binary(),
            Err(Error::NilInternalDataStructure)
        );
    }

    #[test]
    fn test_claim_truncated() {
        let claim = claim_with_members(1, 1);
        let data = claim.marshal_binary().unwrap();
        assert_eq!(
            Claim::unmarshal_binary(&data[..data.len() - 1]),
            Err(Error::InvalidDataFormat)
        );
    }

    #[test]
    fn test_batch_roundtrip() {
        let mut claims = Claims::new();
        claims.add(claim_with_members(3, 1)).unwrap();
        claims.add(claim_with_members(1, 2)).unwrap();
        claims.add(claim_with_members(2, 1)).unwrap();

        let data = claims.marshal_binary().unwrap();
        assert_eq!(Claims::unmarshal_binary(&data).unwrap(), claims);
    }

    #[test]
    fn test_empty_batch_roundtrip() {
        let claims = Claims::new();
        let data = claims.marshal_binary().unwrap();
        assert_eq!(data, codec::marshal_u16(0));
        assert_eq!(Claims::unmarshal_binary(&data).unwrap(), claims);
    }

    #[test]
    fn test_batch_sort_is_total_order() {
        let mut claims = Claims::new();
        for seed in [9u8, 3, 7, 1, 7] {
            claims.add(claim_with_members(seed, 1)).unwrap();
        }
        claims.sort().unwrap();

        let marshaled: Vec<Vec<u8>> = claims
            .at()
            .iter()
            .map(|c| c.marshal_binary().unwrap())
            .collect();
        for window in marshaled.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }

    #[test]
    fn test_batch_missing_size_header() {
        // Declared count of two claims, but only one size header present.
        let claim = claim_with_members(5, 1);
        let payload = claim.marshal_binary().unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&codec::marshal_u16(2));
        data.extend_from_slice(&codec::marshal_u32(payload.len() as u32));
        data.extend_from_slice(&payload);

        assert_eq!(
            Claims::unmarshal_binary(&data),
            Err(Error::InvalidDataFormat)
        );
    }

    #[test]
    fn test_batch_truncated_payload() {
        let mut claims = Claims::new();
        claims.add(claim_with_members(5, 2)).unwrap();
        let data = claims.marshal_binary().unwrap();
        assert_eq!(
            Claims::unmarshal_binary(&data[..data.len() - 4]),
            Err(Error::InvalidDataFormat)
        );
    }
}
