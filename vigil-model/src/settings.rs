//! Node settings shared by every subsystem.

use crate::error::{Error, Result};
use crate::OBSERVERS_MAX_COUNT;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How long the startup time-frame synchronisation may run.
pub const SYNCHRONISATION_TIMEOUT: Duration = Duration::from_secs(20);

/// Margin the whole synchronisation exchange must leave inside one block
/// generation interval.
pub const SYNC_EXCHANGE_MARGIN: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    /// Logical frame length. Peers agree on this value out of band.
    pub average_block_generation_interval: Duration,

    /// Approvals required before an artifact counts as accepted.
    /// Must be a strict majority of `OBSERVERS_MAX_COUNT`.
    pub consensus_count: u16,

    /// Address the inbound peer listener binds to.
    pub listen_addr: SocketAddr,

    /// PEM-encoded P-521 private key location.
    pub key_path: PathBuf,

    /// When set, connections idle longer than this are swept and closed.
    #[serde(default)]
    pub idle_connection_timeout: Option<Duration>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        // Synchronisation has to finish with margin to spare inside one
        // block interval; a single frame must never elapse mid-sync.
        let available = self
            .average_block_generation_interval
            .saturating_sub(SYNC_EXCHANGE_MARGIN);
        if SYNCHRONISATION_TIMEOUT >= available {
            return Err(Error::InvalidSynchronisationTimeout);
        }

        if self.consensus_count as u32 <= OBSERVERS_MAX_COUNT as u32 / 2
            || self.consensus_count > OBSERVERS_MAX_COUNT
        {
            return Err(Error::NilParameter);
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            average_block_generation_interval: Duration::from_secs(60),
            consensus_count: OBSERVERS_MAX_COUNT / 2 + 1,
            listen_addr: "0.0.0.0:4000".parse().expect("static address"),
            key_path: PathBuf::from("p521.key"),
            idle_connection_timeout: None,
        }
    }
}
