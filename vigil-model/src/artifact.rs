//! The closed set of artifact kinds the approval pool accepts.

use crate::block::{BlockDigest, BlockSignatures};
use crate::claim::Claim;
use crate::codec::{MarshalBinary, UnmarshalBinary};
use crate::error::Result;
use crate::tsl::Tsl;
use crate::tx::TxId;

/// Discriminant of the closed artifact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Claim,
    Tsl,
    BlockDigest,
    BlockSignatures,
}

/// A pooled artifact. The set of kinds is closed on purpose: it mirrors
/// the broadcast message classes on the wire, and a tagged sum keeps
/// dispatch static.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Claim(Claim),
    Tsl(Tsl),
    BlockDigest(BlockDigest),
    BlockSignatures(BlockSignatures),
}

impl Artifact {
    /// Reconstructs an artifact of a known kind from its binary form. The
    /// kind travels out of band, as the envelope tag.
    pub fn unmarshal_binary_as(kind: ArtifactKind, data: &[u8]) -> Result<Artifact> {
        Ok(match kind {
            ArtifactKind::Claim => Artifact::Claim(Claim::unmarshal_binary(data)?),
            ArtifactKind::Tsl => Artifact::Tsl(Tsl::unmarshal_binary(data)?),
            ArtifactKind::BlockDigest => {
                Artifact::BlockDigest(BlockDigest::unmarshal_binary(data)?)
            }
            ArtifactKind::BlockSignatures => {
                Artifact::BlockSignatures(BlockSignatures::unmarshal_binary(data)?)
            }
        })
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Claim(_) => ArtifactKind::Claim,
            Artifact::Tsl(_) => ArtifactKind::Tsl,
            Artifact::BlockDigest(_) => ArtifactKind::BlockDigest,
            Artifact::BlockSignatures(_) => ArtifactKind::BlockSignatures,
        }
    }

    pub fn tx_id(&self) -> &TxId {
        match self {
            Artifact::Claim(claim) => claim.tx_id(),
            Artifact::Tsl(tsl) => tsl.tx_id(),
            Artifact::BlockDigest(digest) => digest.tx_id(),
            Artifact::BlockSignatures(signatures) => signatures.tx_id(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Artifact::Claim(_) => "claim",
            Artifact::Tsl(_) => "tsl",
            Artifact::BlockDigest(_) => "block-digest",
            Artifact::BlockSignatures(_) => "block-signatures",
        }
    }
}

impl MarshalBinary for Artifact {
    fn marshal_binary(&self) -> Result<Vec<u8>> {
        match self {
            Artifact::Claim(claim) => claim.marshal_binary(),
            Artifact::Tsl(tsl) => tsl.marshal_binary(),
            Artifact::BlockDigest(digest) => digest.marshal_binary(),
            Artifact::BlockSignatures(signatures) => signatures.marshal_binary(),
        }
    }
}

impl From<Claim> for Artifact {
    fn from(claim: Claim) -> Self {
        Artifact::Claim(claim)
    }
}

impl From<Tsl> for Artifact {
    fn from(tsl: Tsl) -> Self {
        Artifact::Tsl(tsl)
    }
}

impl From<BlockDigest> for Artifact {
    fn from(digest: BlockDigest) -> Self {
        Artifact::BlockDigest(digest)
    }
}

impl From<BlockSignatures> for Artifact {
    fn from(signatures: BlockSignatures) -> Self {
        Artifact::BlockSignatures(signatures)
    }
}
