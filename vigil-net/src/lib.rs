//! Networking for observer peers: the connection map holding write sides
//! of live links, the reader that routes inbound envelopes to typed
//! channels, and the writer that multiplexes outbound message classes.

pub mod connections;
pub mod dispatch;
pub mod error;
pub mod server;

pub use connections::{ConnectionMap, ConnectionWrapper};
pub use dispatch::{
    outbound_channels, run_reader, run_writer, InboundSenders, OutboundReceivers,
    OutboundSenders, OUTBOUND_CLASS_CAPACITY,
};
pub use error::NetError;
pub use server::run_acceptor;
