//! The observer roster: addressable peers with stable indices.

use crate::error::{Error, Result};
use crate::OBSERVERS_MAX_COUNT;
use std::sync::Arc;

/// Position of an observer in the current roster.
pub type ObserverIndex = u16;

/// One roster entry as published by the external configuration reporter.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Observer {
    pub index: ObserverIndex,
    pub host: String,
    pub port: u16,
    /// SEC1-encoded P-521 public key, when the reporter publishes one.
    #[serde(default)]
    pub public_key: Option<Vec<u8>>,
}

impl Observer {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An immutable roster snapshot, valid between configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ObserversConfiguration {
    pub observers: Vec<Observer>,
}

impl ObserversConfiguration {
    pub fn new(observers: Vec<Observer>) -> Result<Arc<Self>> {
        if observers.len() > OBSERVERS_MAX_COUNT as usize {
            return Err(Error::MaxCountReached);
        }
        for observer in &observers {
            if observer.index >= OBSERVERS_MAX_COUNT {
                return Err(Error::NoSuchObserver);
            }
        }
        Ok(Arc::new(Self { observers }))
    }

    pub fn by_index(&self, index: ObserverIndex) -> Result<&Observer> {
        self.observers
            .iter()
            .find(|o| o.index == index)
            .ok_or(Error::NoSuchObserver)
    }

    /// Resolves the observer a connection belongs to from its remote host.
    pub fn by_host(&self, host: &str) -> Result<&Observer> {
        self.observers
            .iter()
            .find(|o| o.host == host)
            .ok_or(Error::NoSuchObserver)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}
