//! Shared error kinds surfaced by the observer core.
//!
//! Each kind is a bare signal: `NotFound` and `Collision` are normal
//! control flow, the rest mark malformed input, capacity limits or
//! startup misconfiguration.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("nil parameter")]
    NilParameter,

    #[error("nil internal data structure")]
    NilInternalDataStructure,

    #[error("invalid data format")]
    InvalidDataFormat,

    #[error("not found")]
    NotFound,

    #[error("collision")]
    Collision,

    #[error("max count reached")]
    MaxCountReached,

    #[error("empty sequence")]
    EmptySequence,

    #[error("channel transferring failed")]
    ChannelTransferringFailed,

    #[error("no such observer")]
    NoSuchObserver,

    #[error("invalid synchronisation timeout")]
    InvalidSynchronisationTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;
