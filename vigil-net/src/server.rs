//! Inbound listener: accepts peer connections, resolves their roster
//! identity by remote host, and hands the read half to a reader task.

use crate::dispatch::{run_reader, InboundSenders};
use crate::error::NetError;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use vigil_model::ObserversConfiguration;

/// Accept loop. Connections from hosts absent from the roster are dropped
/// on the spot; identified ones get a reader task for the lifetime of the
/// socket.
pub async fn run_acceptor(
    listener: TcpListener,
    inbound: InboundSenders,
    roster: watch::Receiver<Arc<ObserversConfiguration>>,
) -> Result<(), NetError> {
    loop {
        let (stream, peer_address) = listener.accept().await?;

        let configuration = roster.borrow().clone();
        let host = peer_address.ip().to_string();
        let observer = match configuration.by_host(&host) {
            Ok(observer) => observer.index,
            Err(_) => {
                tracing::warn!(%peer_address, "connection from unknown host dropped");
                continue;
            }
        };

        tracing::debug!(observer, %peer_address, "peer connected");
        let inbound = inbound.clone();
        tokio::spawn(async move {
            // Inbound links are read-only; replies travel over this node's
            // own outbound connections.
            let (read_half, _write_half) = stream.into_split();
            match run_reader(read_half, observer, inbound).await {
                Ok(()) => tracing::debug!(observer, "peer disconnected"),
                Err(error) => {
                    tracing::warn!(observer, %error, "peer connection dropped");
                }
            }
        });
    }
}
