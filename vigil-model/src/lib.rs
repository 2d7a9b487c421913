//! Core data model for the vigil observer network.
//!
//! Strong types for artifacts (claims, TSLs, block digests, block signature
//! sets), the binary codec they marshal through, the observer roster, and
//! the error kinds shared across the workspace.

pub mod artifact;
pub mod block;
pub mod claim;
pub mod codec;
pub mod error;
pub mod observers;
pub mod settings;
pub mod tsl;
pub mod tx;
pub mod types;

pub use artifact::{Artifact, ArtifactKind};
pub use block::{BlockDigest, BlockSignatures, ObserverSignature};
pub use claim::{Claim, ClaimMembers, Claims};
pub use codec::{MarshalBinary, UnmarshalBinary};
pub use error::{Error, Result};
pub use observers::{Observer, ObserverIndex, ObserversConfiguration};
pub use settings::Settings;
pub use tsl::{Tsl, TslMember};
pub use tx::{MemberId, TxId};
pub use types::{Digest, Sig};

/// Upper bound on the observer roster size. Frame indices and approval
/// vectors are sized against this value, so all peers must agree on it.
pub const OBSERVERS_MAX_COUNT: u16 = 1024;

/// Upper bound on the number of claims a single batch may carry.
pub const CLAIMS_MAX_COUNT: u16 = 16_384;
