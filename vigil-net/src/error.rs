//! Error type for the networking layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] vigil_proto::CodecError),

    #[error(transparent)]
    Core(#[from] vigil_model::Error),

    #[error("inbound channel closed")]
    InboundClosed,
}
