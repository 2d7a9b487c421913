//! The observer's long-term P-521 identity key.
//!
//! The public half is the observer's identity: it is published in the
//! roster and embedded in every approval vote, so recipients can verify
//! provenance without a handshake.

use ecdsa::signature::hazmat::{PrehashVerifier, RandomizedPrehashSigner};
use p521::ecdsa::{Signature, SigningKey, VerifyingKey};
use p521::elliptic_curve::pkcs8::LineEnding;
use p521::{NistP521, SecretKey};
use rand_core::OsRng;
use std::fs;
use std::path::Path;
use thiserror::Error;
use vigil_model::types::DIGEST_SIZE;
use vigil_model::{Error as CoreError, Sig};
use zeroize::Zeroizing;

/// Key material location, relative to the working directory.
pub const DEFAULT_KEY_FILE: &str = "p521.key";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("i/o error reading key material: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed key material: {0}")]
    Malformed(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub struct KeyStore {
    secret_key: SecretKey,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyStore {
    /// Loads the PEM-encoded private key. Absence is fatal at startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let pem = Zeroizing::new(fs::read_to_string(path)?);
        let secret_key = SecretKey::from_sec1_pem(&pem)
            .map_err(|e| KeyStoreError::Malformed(e.to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Generates a fresh random key.
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::random(&mut OsRng))
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let signing_key = SigningKey::from(ecdsa::SigningKey::<NistP521>::from(&secret_key));
        let verifying_key = VerifyingKey::from(&signing_key);
        Self { secret_key, signing_key, verifying_key }
    }

    /// Writes the private key as SEC1 PEM.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyStoreError> {
        let pem = self
            .secret_key
            .to_sec1_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::Malformed(e.to_string()))?;
        fs::write(path, pem.as_bytes())?;
        Ok(())
    }

    /// Signs a 32-byte digest. Randomized, so repeated calls over the same
    /// digest yield distinct signatures.
    pub fn sign_hash(&self, digest: &[u8]) -> Result<Sig, KeyStoreError> {
        if digest.len() != DIGEST_SIZE {
            return Err(CoreError::InvalidDataFormat.into());
        }

        let signature: Signature = self
            .signing_key
            .sign_prehash_with_rng(&mut OsRng, digest)
            .map_err(|e| KeyStoreError::Signing(e.to_string()))?;
        Ok(Sig::from_slice(signature.to_bytes().as_slice())?)
    }

    /// Verifies a signature made with this observer's own key.
    pub fn verify_own(&self, digest: &[u8], signature: &Sig) -> bool {
        Self::verify_with(&self.verifying_key, digest, signature)
    }

    /// Verifies a signature against another observer's public key.
    pub fn verify_external(
        &self,
        digest: &[u8],
        signature: &Sig,
        public_key: &VerifyingKey,
    ) -> bool {
        Self::verify_with(public_key, digest, signature)
    }

    fn verify_with(key: &VerifyingKey, digest: &[u8], signature: &Sig) -> bool {
        if digest.len() != DIGEST_SIZE {
            return false;
        }
        let Ok(signature) = Signature::from_slice(signature.as_bytes()) else {
            return false;
        };
        key.verify_prehash(digest, &signature).is_ok()
    }

    pub fn is_equal_public_key(&self, other: &VerifyingKey) -> bool {
        self.verifying_key.to_encoded_point(false) == other.to_encoded_point(false)
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// The public key in its uncompressed SEC1 point encoding, as carried
    /// by the roster.
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Parses a roster-carried SEC1 public key.
    pub fn parse_public_key(bytes: &[u8]) -> Result<VerifyingKey, KeyStoreError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| KeyStoreError::Malformed(e.to_string()))
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::Digest;

    #[test]
    fn test_sign_and_verify_own() {
        let keystore = KeyStore::generate();
        let digest = Digest::of(b"artifact body");

        let signature = keystore.sign_hash(digest.as_bytes()).unwrap();
        assert!(keystore.verify_own(digest.as_bytes(), &signature));
    }

    #[test]
    fn test_verify_wrong_digest_fails() {
        let keystore = KeyStore::generate();
        let signature = keystore
            .sign_hash(Digest::of(b"original").as_bytes())
            .unwrap();
        assert!(!keystore.verify_own(Digest::of(b"tampered").as_bytes(), &signature));
    }

    #[test]
    fn test_sign_rejects_non_digest_input() {
        let keystore = KeyStore::generate();
        assert!(matches!(
            keystore.sign_hash(b"short"),
            Err(KeyStoreError::Core(CoreError::InvalidDataFormat))
        ));
    }

    #[test]
    fn test_verify_external() {
        let signer = KeyStore::generate();
        let verifier = KeyStore::generate();
        let digest = Digest::of(b"cross-observer");

        let signature = signer.sign_hash(digest.as_bytes()).unwrap();
        assert!(verifier.verify_external(digest.as_bytes(), &signature, signer.public_key()));
        assert!(!verifier.verify_own(digest.as_bytes(), &signature));
    }

    #[test]
    fn test_public_key_sec1_roundtrip() {
        let keystore = KeyStore::generate();
        let parsed = KeyStore::parse_public_key(&keystore.public_key_sec1()).unwrap();
        assert!(keystore.is_equal_public_key(&parsed));
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_KEY_FILE);

        let original = KeyStore::generate();
        original.save(&path).unwrap();

        let reloaded = KeyStore::open(&path).unwrap();
        assert!(original.is_equal_public_key(reloaded.public_key()));

        let digest = Digest::of(b"persisted key");
        let signature = reloaded.sign_hash(digest.as_bytes()).unwrap();
        assert!(original.verify_own(digest.as_bytes(), &signature));
    }

    #[test]
    fn test_missing_key_file_is_an_error() {
        assert!(matches!(
            KeyStore::open("/nonexistent/p521.key"),
            Err(KeyStoreError::Io(_))
        ));
    }
}
