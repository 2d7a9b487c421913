//! Fixed-width byte newtypes: SHA-256 digests and P-521 signatures.

use crate::error::{Error, Result};
use sha2::{Digest as _, Sha256};
use std::fmt;

pub const DIGEST_SIZE: usize = 32;

/// Wire form of a P-521 ECDSA signature: r ‖ s, 66 bytes each.
pub const SIGNATURE_SIZE: usize = 132;

/// A 32-byte SHA-256 digest. Content addresses in the approval pool and
/// the value observers sign.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct Digest(#[serde(with = "serde_bytes")] pub [u8; DIGEST_SIZE]);

impl Digest {
    pub const ZERO: Digest = Digest([0u8; DIGEST_SIZE]);

    /// Hashes `data` with SHA-256.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let bytes: [u8; DIGEST_SIZE] =
            data.try_into().map_err(|_| Error::InvalidDataFormat)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

/// A fixed-width P-521 signature as it travels on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct Sig(#[serde(with = "serde_bytes")] pub [u8; SIGNATURE_SIZE]);

impl Sig {
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let bytes: [u8; SIGNATURE_SIZE] =
            data.try_into().map_err(|_| Error::InvalidDataFormat)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl Default for Sig {
    fn default() -> Self {
        Self([0u8; SIGNATURE_SIZE])
    }
}

impl AsRef<[u8]> for Sig {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Sig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full 264 hex chars drown log lines; the head is enough to correlate.
        write!(f, "Sig({}..)", hex::encode(&self.0[..8]))
    }
}
