//! Content-addressed holding area for artifacts awaiting approval.
//!
//! Every record is keyed by the SHA-256 of its artifact's binary form, so
//! re-broadcasts of identical content collide instead of resetting the
//! votes already gathered.

use std::collections::HashMap;
use tokio::time::Instant;
use vigil_model::codec::MarshalBinary;
use vigil_model::{Artifact, Digest, Error, ObserverIndex, Result, OBSERVERS_MAX_COUNT};

/// Outcome of scanning a record's approval vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    Approved,
    Rejected,
    Pending,
}

/// Scans a vote vector once, terminating as soon as either verdict is
/// certain: positives reaching `consensus_count` approve, negatives
/// reaching `len − consensus_count` reject. Unvoted slots decide nothing.
pub fn consensus_scan(votes: &[Option<bool>], consensus_count: usize) -> Consensus {
    let rejection_count = votes.len().saturating_sub(consensus_count);
    let mut positive = 0usize;
    let mut negative = 0usize;

    for vote in votes {
        match vote {
            Some(true) => {
                positive += 1;
                if positive >= consensus_count {
                    return Consensus::Approved;
                }
            }
            Some(false) => {
                negative += 1;
                if negative >= rejection_count {
                    return Consensus::Rejected;
                }
            }
            None => {}
        }
    }

    Consensus::Pending
}

/// A pooled artifact with the votes gathered for it so far.
#[derive(Debug, Clone)]
pub struct Record {
    instance: Artifact,
    approves: Box<[Option<bool>]>,
    last_sync_attempt: Option<Instant>,
}

impl Record {
    fn new(instance: Artifact) -> Self {
        Self {
            instance,
            approves: vec![None; OBSERVERS_MAX_COUNT as usize].into_boxed_slice(),
            last_sync_attempt: None,
        }
    }

    pub fn instance(&self) -> &Artifact {
        &self.instance
    }

    /// Records one observer's vote. Returns `true` when the vote was
    /// stored; a `false` arriving after a recorded `true` is kept out and
    /// reported, never silently overwritten.
    pub fn apply_vote(&mut self, observer: ObserverIndex, approve: bool) -> Result<bool> {
        let slot = self
            .approves
            .get_mut(observer as usize)
            .ok_or(Error::NoSuchObserver)?;

        match *slot {
            Some(true) if !approve => Ok(false),
            Some(existing) if existing == approve => Ok(false),
            _ => {
                *slot = Some(approve);
                Ok(true)
            }
        }
    }

    pub fn vote_of(&self, observer: ObserverIndex) -> Option<bool> {
        self.approves.get(observer as usize).copied().flatten()
    }

    pub fn positive_votes(&self) -> usize {
        self.approves.iter().filter(|v| **v == Some(true)).count()
    }

    pub fn consensus(&self, consensus_count: u16) -> Consensus {
        consensus_scan(&self.approves, consensus_count as usize)
    }

    pub fn mark_sync_attempt(&mut self) {
        self.last_sync_attempt = Some(Instant::now());
    }

    pub fn last_sync_attempt(&self) -> Option<Instant> {
        self.last_sync_attempt
    }
}

/// The approval pool: 32-byte content hash → record.
#[derive(Debug, Default)]
pub struct Pool {
    index: HashMap<Digest, Record>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an artifact under its content hash. Identical content
    /// already present signals `Collision` and leaves the stored record
    /// (and its votes) untouched.
    pub fn add(&mut self, instance: Artifact) -> Result<(Digest, &mut Record)> {
        let data = instance.marshal_binary()?;
        let key = Digest::of(&data);

        if self.index.contains_key(&key) {
            return Err(Error::Collision);
        }

        let record = self.index.entry(key).or_insert_with(|| Record::new(instance));
        Ok((key, record))
    }

    pub fn by_hash(&self, hash: &Digest) -> Result<&Record> {
        self.index.get(hash).ok_or(Error::NotFound)
    }

    pub fn by_hash_mut(&mut self, hash: &Digest) -> Result<&mut Record> {
        self.index.get_mut(hash).ok_or(Error::NotFound)
    }

    /// Idempotent removal, used once consensus is finalized upstream.
    pub fn remove(&mut self, hash: &Digest) {
        self.index.remove(hash);
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &Digest> {
        self.index.keys()
    }
}
