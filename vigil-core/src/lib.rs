//! Observer-local core subsystems: the long-term key store, the
//! content-addressed approval pool, and the frame-synchronised timer.

pub mod keystore;
pub mod pool;
pub mod reporter;
pub mod timer;

pub use keystore::{KeyStore, KeyStoreError};
pub use pool::{consensus_scan, Consensus, Pool, Record};
pub use reporter::{Reporter, StaticReporter};
pub use timer::{FrameEvent, FrameIndex, Timer, TimerChannels, TimerEvent};
