//! The map from observer identity to the write side of its live link.
//!
//! A wrapper exists from the moment a connection is installed until
//! explicit tear-down and is never resurrected: reconnecting always
//! installs a fresh wrapper.

use crate::error::NetError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::codec::FramedWrite;
use vigil_model::{Error, ObserverIndex};
use vigil_proto::{EnvelopeCodec, Message};

use futures_util::SinkExt;

/// Buffered, framed write side of one peer link.
pub struct ConnectionWrapper {
    sink: FramedWrite<BufWriter<OwnedWriteHalf>, EnvelopeCodec>,
    remote_address: SocketAddr,
    last_used: Instant,
}

impl ConnectionWrapper {
    pub fn new(write_half: OwnedWriteHalf, remote_address: SocketAddr) -> Self {
        Self {
            sink: FramedWrite::new(BufWriter::new(write_half), EnvelopeCodec),
            remote_address,
            last_used: Instant::now(),
        }
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Frames, writes and flushes one message.
    pub async fn send(&mut self, message: &Message) -> Result<(), NetError> {
        self.last_used = Instant::now();
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(mut self) {
        let _ = self.sink.get_mut().shutdown().await;
    }
}

impl std::fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("remote_address", &self.remote_address)
            .field("last_used", &self.last_used)
            .finish_non_exhaustive()
    }
}

/// Thread-safe observer → connection registry. The map itself sits under a
/// mutex; each wrapper's writer has a single producer, the dispatch
/// sender task.
#[derive(Debug, Default)]
pub struct ConnectionMap {
    connections: Mutex<HashMap<ObserverIndex, ConnectionWrapper>>,
}

impl ConnectionMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs a fresh wrapper for the observer. A displaced wrapper is
    /// closed before it is forgotten.
    pub async fn set(&self, observer: ObserverIndex, wrapper: ConnectionWrapper) {
        let displaced = self.connections.lock().await.insert(observer, wrapper);
        if let Some(displaced) = displaced {
            tracing::debug!(observer, "replacing live connection");
            displaced.close().await;
        }
    }

    /// Sends through the observer's wrapper, bumping its last-used stamp.
    /// Absent entries signal `NoSuchObserver`.
    pub async fn send(
        &self,
        observer: ObserverIndex,
        message: &Message,
    ) -> Result<(), NetError> {
        let mut connections = self.connections.lock().await;
        let wrapper = connections
            .get_mut(&observer)
            .ok_or(Error::NoSuchObserver)?;
        wrapper.send(message).await
    }

    pub async fn contains(&self, observer: ObserverIndex) -> bool {
        self.connections.lock().await.contains_key(&observer)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Closes and removes the observer's connection, if any.
    pub async fn delete_by_observer(&self, observer: ObserverIndex) {
        let removed = self.connections.lock().await.remove(&observer);
        if let Some(wrapper) = removed {
            wrapper.close().await;
        }
    }

    /// Closes and removes every connection whose remote IP matches `host`.
    pub async fn delete_by_remote_host(&self, host: &str) {
        let mut connections = self.connections.lock().await;
        let obsolete: Vec<ObserverIndex> = connections
            .iter()
            .filter(|(_, wrapper)| wrapper.remote_address.ip().to_string() == host)
            .map(|(observer, _)| *observer)
            .collect();

        for observer in obsolete {
            if let Some(wrapper) = connections.remove(&observer) {
                wrapper.close().await;
            }
        }
    }

    /// Closes and removes every connection.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        for (_, wrapper) in connections.drain() {
            wrapper.close().await;
        }
    }

    /// Closes and removes connections unused for longer than `max_delay`.
    pub async fn sweep_idle(&self, max_delay: Duration) {
        let mut connections = self.connections.lock().await;
        let Some(cutoff) = Instant::now().checked_sub(max_delay) else {
            return;
        };
        let obsolete: Vec<ObserverIndex> = connections
            .iter()
            .filter(|(_, wrapper)| wrapper.last_used < cutoff)
            .map(|(observer, _)| *observer)
            .collect();

        for observer in obsolete {
            if let Some(wrapper) = connections.remove(&observer) {
                tracing::debug!(observer, "closing idle connection");
                wrapper.close().await;
            }
        }
    }

    /// Periodic idle sweep; disabled unless the node opts in.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        max_delay: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let map = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(max_delay).await;
                map.sweep_idle(max_delay).await;
            }
        })
    }
}
