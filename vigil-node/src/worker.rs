//! The pool worker: one task owning the approval pool.
//!
//! Inbound broadcasts are pooled, self-approved and answered with a
//! signed approval; inbound approvals are provenance-checked and recorded
//! as votes. When an artifact crosses the consensus threshold the worker
//! emits an event and leaves finalization (and removal) to the layer
//! above.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use vigil_core::{Consensus, KeyStore, Pool};
use vigil_model::codec::MarshalBinary;
use vigil_model::{
    Artifact, BlockDigest, BlockSignatures, Claim, Digest, Error, ObserverIndex,
    ObserversConfiguration, Result, Tsl, TxId,
};
use vigil_net::OutboundSenders;
use vigil_proto::{Approval, Inbound, Message, Outbound};

/// Commands from the node handle to the worker.
pub enum PoolCommand {
    /// Pool a locally produced artifact and broadcast it for approval.
    Publish { artifact: Artifact, resp: oneshot::Sender<Result<Digest>> },
    /// Drop a finalized artifact.
    Remove { hash: Digest },
    /// Report the current state of one record.
    Inspect { hash: Digest, resp: oneshot::Sender<Option<PoolEntry>> },
}

/// Snapshot of one pooled record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub tx_id: TxId,
    pub positive_votes: usize,
    pub consensus: Consensus,
}

/// Events the worker reports upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    ConsensusReached { hash: Digest, tx_id: TxId },
}

#[derive(Debug, Clone, Copy)]
enum ApprovalClass {
    Claim,
    Tsl,
    Digest,
}

impl ApprovalClass {
    fn message(self, approval: Approval) -> Message {
        match self {
            ApprovalClass::Claim => Message::ClaimApprove(approval),
            ApprovalClass::Tsl => Message::TslApprove(approval),
            ApprovalClass::Digest => Message::DigestApprove(approval),
        }
    }
}

enum Step {
    ClaimBroadcast(Inbound<Claim>),
    TslBroadcast(Inbound<Tsl>),
    DigestBroadcast(Inbound<BlockDigest>),
    BlockSignaturesBroadcast(Inbound<BlockSignatures>),
    Approval(Inbound<Approval>),
    Command(PoolCommand),
    Closed,
}

pub struct PoolWorker {
    pub pool: Pool,
    pub keystore: Arc<KeyStore>,
    pub roster: watch::Receiver<Arc<ObserversConfiguration>>,
    pub local_index: ObserverIndex,
    pub consensus_count: u16,
    pub reported: HashSet<Digest>,

    pub claim_broadcasts: mpsc::Receiver<Inbound<Claim>>,
    pub claim_approvals: mpsc::Receiver<Inbound<Approval>>,
    pub tsl_broadcasts: mpsc::Receiver<Inbound<Tsl>>,
    pub tsl_approvals: mpsc::Receiver<Inbound<Approval>>,
    pub digest_broadcasts: mpsc::Receiver<Inbound<BlockDigest>>,
    pub digest_approvals: mpsc::Receiver<Inbound<Approval>>,
    pub block_signature_broadcasts: mpsc::Receiver<Inbound<BlockSignatures>>,
    pub commands: mpsc::Receiver<PoolCommand>,

    pub outbound: OutboundSenders,
    pub events: mpsc::Sender<NodeEvent>,
}

impl PoolWorker {
    pub async fn run(mut self) {
        loop {
            let step = tokio::select! {
                item = self.claim_broadcasts.recv() => match item {
                    Some(inbound) => Step::ClaimBroadcast(inbound),
                    None => Step::Closed,
                },
                item = self.claim_approvals.recv() => match item {
                    Some(inbound) => Step::Approval(inbound),
                    None => Step::Closed,
                },
                item = self.tsl_broadcasts.recv() => match item {
                    Some(inbound) => Step::TslBroadcast(inbound),
                    None => Step::Closed,
                },
                item = self.tsl_approvals.recv() => match item {
                    Some(inbound) => Step::Approval(inbound),
                    None => Step::Closed,
                },
                item = self.digest_broadcasts.recv() => match item {
                    Some(inbound) => Step::DigestBroadcast(inbound),
                    None => Step::Closed,
                },
                item = self.digest_approvals.recv() => match item {
                    Some(inbound) => Step::Approval(inbound),
                    None => Step::Closed,
                },
                item = self.block_signature_broadcasts.recv() => match item {
                    Some(inbound) => Step::BlockSignaturesBroadcast(inbound),
                    None => Step::Closed,
                },
                item = self.commands.recv() => match item {
                    Some(command) => Step::Command(command),
                    None => Step::Closed,
                },
            };

            match step {
                Step::ClaimBroadcast(inbound) => {
                    let Inbound { from, body } = inbound;
                    self.on_broadcast(from, Artifact::Claim(body), Some(ApprovalClass::Claim))
                        .await;
                }
                Step::TslBroadcast(inbound) => {
                    let Inbound { from, body } = inbound;
                    self.on_broadcast(from, Artifact::Tsl(body), Some(ApprovalClass::Tsl))
                        .await;
                }
                Step::DigestBroadcast(inbound) => {
                    let Inbound { from, body } = inbound;
                    self.on_broadcast(
                        from,
                        Artifact::BlockDigest(body),
                        Some(ApprovalClass::Digest),
                    )
                    .await;
                }
                Step::BlockSignaturesBroadcast(inbound) => {
                    let Inbound { from, body } = inbound;
                    // Signature sets have no approval reply class; they are
                    // pooled for the producer to pick up.
                    self.on_broadcast(from, Artifact::BlockSignatures(body), None).await;
                }
                Step::Approval(inbound) => self.on_approval(inbound).await,
                Step::Command(command) => self.on_command(command).await,
                Step::Closed => return,
            }
        }
    }

    async fn on_broadcast(
        &mut self,
        from: ObserverIndex,
        artifact: Artifact,
        reply: Option<ApprovalClass>,
    ) {
        let kind = artifact.kind_name();
        let data = match artifact.marshal_binary() {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(observer = from, kind, %error, "broadcast artifact rejected");
                return;
            }
        };
        let hash = Digest::of(&data);

        match self.pool.add(artifact) {
            Ok((_, record)) => {
                let _ = record.apply_vote(self.local_index, true);
                record.mark_sync_attempt();
                tracing::debug!(observer = from, kind, %hash, "artifact pooled");
            }
            Err(Error::Collision) => {
                // Already tracked; the votes stand. Re-approving covers a
                // peer that lost the first reply.
                tracing::debug!(observer = from, kind, %hash, "artifact already tracked");
            }
            Err(error) => {
                tracing::warn!(observer = from, kind, %error, "artifact not pooled");
                return;
            }
        }

        if let Some(class) = reply {
            self.send_approval(from, hash, class).await;
        }
    }

    async fn send_approval(&mut self, to: ObserverIndex, hash: Digest, class: ApprovalClass) {
        let signature = match self.keystore.sign_hash(hash.as_bytes()) {
            Ok(signature) => signature,
            Err(error) => {
                tracing::warn!(%hash, %error, "approval signing failed");
                return;
            }
        };

        let approval = Approval { hash, observer: self.local_index, signature };
        let sender = match class {
            ApprovalClass::Claim => &self.outbound.claim_approvals,
            ApprovalClass::Tsl => &self.outbound.tsl_approvals,
            ApprovalClass::Digest => &self.outbound.digest_approvals,
        };
        if sender
            .send(Outbound::to_observer(to, class.message(approval)))
            .await
            .is_err()
        {
            tracing::debug!("outbound approval channel closed");
        }
    }

    async fn on_approval(&mut self, inbound: Inbound<Approval>) {
        let Approval { hash, observer, signature } = inbound.body;

        if observer != inbound.from {
            tracing::warn!(
                claimed = observer,
                actual = inbound.from,
                "approval with spoofed observer index dropped"
            );
            return;
        }

        // Verify provenance whenever the roster publishes the voter's key.
        let configuration = self.roster.borrow().clone();
        if let Ok(entry) = configuration.by_index(observer) {
            if let Some(key_bytes) = &entry.public_key {
                let verified = KeyStore::parse_public_key(key_bytes)
                    .map(|key| {
                        self.keystore
                            .verify_external(hash.as_bytes(), &signature, &key)
                    })
                    .unwrap_or(false);
                if !verified {
                    tracing::warn!(observer, %hash, "approval signature invalid, dropped");
                    return;
                }
            }
        }

        let record = match self.pool.by_hash_mut(&hash) {
            Ok(record) => record,
            Err(_) => {
                // Approvals may outlive their artifact; plain control flow.
                tracing::trace!(observer, %hash, "approval for untracked artifact");
                return;
            }
        };

        let recorded = record.apply_vote(observer, true).unwrap_or(false);
        tracing::debug!(observer, %hash, recorded, "approval vote");

        if recorded
            && record.consensus(self.consensus_count) == Consensus::Approved
            && self.reported.insert(hash)
        {
            let tx_id = *record.instance().tx_id();
            if self
                .events
                .send(NodeEvent::ConsensusReached { hash, tx_id })
                .await
                .is_err()
            {
                tracing::debug!("event channel closed");
            }
        }
    }

    async fn on_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Publish { artifact, resp } => {
                let result = self.on_publish(artifact).await;
                let _ = resp.send(result);
            }
            PoolCommand::Remove { hash } => {
                self.pool.remove(&hash);
                self.reported.remove(&hash);
            }
            PoolCommand::Inspect { hash, resp } => {
                let entry = self.pool.by_hash(&hash).ok().map(|record| PoolEntry {
                    tx_id: *record.instance().tx_id(),
                    positive_votes: record.positive_votes(),
                    consensus: record.consensus(self.consensus_count),
                });
                let _ = resp.send(entry);
            }
        }
    }

    async fn on_publish(&mut self, artifact: Artifact) -> Result<Digest> {
        let data = artifact.marshal_binary()?;
        let hash = Digest::of(&data);

        let (message, sender) = match &artifact {
            Artifact::Claim(claim) => (
                Message::ClaimBroadcast(claim.clone()),
                &self.outbound.claim_broadcasts,
            ),
            Artifact::Tsl(tsl) => {
                (Message::TslBroadcast(tsl.clone()), &self.outbound.tsl_broadcasts)
            }
            Artifact::BlockDigest(digest) => (
                Message::DigestBroadcast(*digest),
                &self.outbound.digest_broadcasts,
            ),
            Artifact::BlockSignatures(signatures) => (
                Message::BlockSignaturesBroadcast(signatures.clone()),
                &self.outbound.block_signature_broadcasts,
            ),
        };

        match self.pool.add(artifact) {
            Ok((_, record)) => {
                let _ = record.apply_vote(self.local_index, true);
                record.mark_sync_attempt();
            }
            // Re-publishing keeps the record and just broadcasts again.
            Err(Error::Collision) => {}
            Err(error) => return Err(error),
        }

        if sender.send(Outbound::broadcast(message)).await.is_err() {
            return Err(Error::ChannelTransferringFailed);
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::{ClaimMembers, MemberId, Observer};
    use vigil_net::outbound_channels;
    use vigil_proto::Destination;

    struct WorkerHarness {
        claim_broadcasts: mpsc::Sender<Inbound<Claim>>,
        claim_approvals: mpsc::Sender<Inbound<Approval>>,
        commands: mpsc::Sender<PoolCommand>,
        events: mpsc::Receiver<NodeEvent>,
        outbound: vigil_net::OutboundReceivers,
        node_keys: Arc<KeyStore>,
        peer_keys: Arc<KeyStore>,
    }

    fn spawn_worker(consensus_count: u16) -> WorkerHarness {
        let node_keys = Arc::new(KeyStore::generate());
        let peer_keys = Arc::new(KeyStore::generate());

        let configuration = ObserversConfiguration::new(vec![
            Observer {
                index: 0,
                host: "10.0.0.1".into(),
                port: 4000,
                public_key: Some(node_keys.public_key_sec1()),
            },
            Observer {
                index: 1,
                host: "10.0.0.2".into(),
                port: 4000,
                public_key: Some(peer_keys.public_key_sec1()),
            },
        ])
        .expect("valid roster");
        let (_roster_tx, roster) = watch::channel(configuration);

        let (claim_broadcasts_tx, claim_broadcasts) = mpsc::channel(8);
        let (claim_approvals_tx, claim_approvals) = mpsc::channel(8);
        let (_tsl_b_tx, tsl_broadcasts) = mpsc::channel::<Inbound<Tsl>>(8);
        let (_tsl_a_tx, tsl_approvals) = mpsc::channel::<Inbound<Approval>>(8);
        let (_digest_b_tx, digest_broadcasts) = mpsc::channel::<Inbound<BlockDigest>>(8);
        let (_digest_a_tx, digest_approvals) = mpsc::channel::<Inbound<Approval>>(8);
        let (_block_tx, block_signature_broadcasts) =
            mpsc::channel::<Inbound<BlockSignatures>>(8);
        let (commands_tx, commands) = mpsc::channel(8);
        let (events_tx, events) = mpsc::channel(8);
        let (outbound_senders, outbound_receivers) = outbound_channels();

        let worker = PoolWorker {
            pool: Pool::new(),
            keystore: node_keys.clone(),
            roster,
            local_index: 0,
            consensus_count,
            reported: HashSet::new(),
            claim_broadcasts,
            claim_approvals,
            tsl_broadcasts,
            tsl_approvals,
            digest_broadcasts,
            digest_approvals,
            block_signature_broadcasts,
            commands,
            outbound: outbound_senders,
            events: events_tx,
        };

        tokio::spawn(async move {
            // Channels for unexercised classes stay open for the worker's
            // lifetime.
            let _keep = (
                _roster_tx, _tsl_b_tx, _tsl_a_tx, _digest_b_tx, _digest_a_tx, _block_tx,
            );
            worker.run().await;
        });

        WorkerHarness {
            claim_broadcasts: claim_broadcasts_tx,
            claim_approvals: claim_approvals_tx,
            commands: commands_tx,
            events,
            outbound: outbound_receivers,
            node_keys,
            peer_keys,
        }
    }

    fn test_claim() -> Claim {
        Claim::new(
            TxId::from_bytes([0x11; 16]),
            ClaimMembers::new(vec![MemberId::from_bytes([0x22; 16])]),
        )
    }

    fn claim_hash(claim: &Claim) -> Digest {
        Digest::of(&claim.marshal_binary().unwrap())
    }

    async fn inspect(harness: &WorkerHarness, hash: Digest) -> Option<PoolEntry> {
        let (resp, rx) = oneshot::channel();
        harness
            .commands
            .send(PoolCommand::Inspect { hash, resp })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_is_pooled_and_approved() {
        let mut harness = spawn_worker(600);
        let claim = test_claim();
        let hash = claim_hash(&claim);

        harness
            .claim_broadcasts
            .send(Inbound::new(1, claim))
            .await
            .unwrap();

        let outbound = harness
            .outbound
            .claim_approvals
            .recv()
            .await
            .expect("approval out");
        assert_eq!(outbound.to, Destination::Observer(1));
        let Message::ClaimApprove(approval) = outbound.message else {
            panic!("expected claim approval");
        };
        assert_eq!(approval.hash, hash);
        assert_eq!(approval.observer, 0);
        assert!(harness
            .node_keys
            .verify_own(hash.as_bytes(), &approval.signature));

        let entry = inspect(&harness, hash).await.expect("pooled entry");
        assert_eq!(entry.positive_votes, 1);
        assert_eq!(entry.consensus, Consensus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_broadcast_keeps_votes_and_reapproves() {
        let mut harness = spawn_worker(600);
        let claim = test_claim();
        let hash = claim_hash(&claim);

        for _ in 0..2 {
            harness
                .claim_broadcasts
                .send(Inbound::new(1, claim.clone()))
                .await
                .unwrap();
            harness
                .outbound
                .claim_approvals
                .recv()
                .await
                .expect("approval out");
        }

        let entry = inspect(&harness, hash).await.expect("pooled entry");
        assert_eq!(entry.positive_votes, 1);
    }

    #[tokio::test]
    async fn test_valid_peer_approval_counts_towards_consensus() {
        let mut harness = spawn_worker(2);
        let claim = test_claim();
        let hash = claim_hash(&claim);

        harness
            .claim_broadcasts
            .send(Inbound::new(1, claim))
            .await
            .unwrap();
        harness
            .outbound
            .claim_approvals
            .recv()
            .await
            .expect("approval out");

        let signature = harness.peer_keys.sign_hash(hash.as_bytes()).unwrap();
        harness
            .claim_approvals
            .send(Inbound::new(1, Approval { hash, observer: 1, signature }))
            .await
            .unwrap();

        let event = harness.events.recv().await.expect("consensus event");
        assert_eq!(
            event,
            NodeEvent::ConsensusReached { hash, tx_id: TxId::from_bytes([0x11; 16]) }
        );

        let entry = inspect(&harness, hash).await.expect("pooled entry");
        assert_eq!(entry.positive_votes, 2);
        assert_eq!(entry.consensus, Consensus::Approved);
    }

    #[tokio::test]
    async fn test_forged_approval_is_dropped() {
        let mut harness = spawn_worker(2);
        let claim = test_claim();
        let hash = claim_hash(&claim);

        harness
            .claim_broadcasts
            .send(Inbound::new(1, claim))
            .await
            .unwrap();
        harness
            .outbound
            .claim_approvals
            .recv()
            .await
            .expect("approval out");

        // Signed with the wrong key: provenance check fails.
        let signature = harness.node_keys.sign_hash(hash.as_bytes()).unwrap();
        harness
            .claim_approvals
            .send(Inbound::new(1, Approval { hash, observer: 1, signature }))
            .await
            .unwrap();

        let entry = inspect(&harness, hash).await.expect("pooled entry");
        assert_eq!(entry.positive_votes, 1);
    }

    #[tokio::test]
    async fn test_spoofed_observer_index_is_dropped() {
        let mut harness = spawn_worker(2);
        let claim = test_claim();
        let hash = claim_hash(&claim);

        harness
            .claim_broadcasts
            .send(Inbound::new(1, claim))
            .await
            .unwrap();
        harness
            .outbound
            .claim_approvals
            .recv()
            .await
            .expect("approval out");

        let signature = harness.peer_keys.sign_hash(hash.as_bytes()).unwrap();
        // Arrived from observer 1 but claims to be observer 0.
        harness
            .claim_approvals
            .send(Inbound::new(1, Approval { hash, observer: 0, signature }))
            .await
            .unwrap();

        let entry = inspect(&harness, hash).await.expect("pooled entry");
        assert_eq!(entry.positive_votes, 1);
    }

    #[tokio::test]
    async fn test_publish_broadcasts_and_self_votes() {
        let mut harness = spawn_worker(600);
        let claim = test_claim();
        let expected_hash = claim_hash(&claim);

        let (resp, rx) = oneshot::channel();
        harness
            .commands
            .send(PoolCommand::Publish { artifact: Artifact::Claim(claim.clone()), resp })
            .await
            .unwrap();
        let hash = rx.await.unwrap().unwrap();
        assert_eq!(hash, expected_hash);

        let outbound = harness
            .outbound
            .claim_broadcasts
            .recv()
            .await
            .expect("broadcast out");
        assert_eq!(outbound.to, Destination::Broadcast);
        assert_eq!(outbound.message, Message::ClaimBroadcast(claim));

        let entry = inspect(&harness, hash).await.expect("pooled entry");
        assert_eq!(entry.positive_votes, 1);
    }

    #[tokio::test]
    async fn test_remove_forgets_record() {
        let mut harness = spawn_worker(600);
        let claim = test_claim();
        let hash = claim_hash(&claim);

        harness
            .claim_broadcasts
            .send(Inbound::new(1, claim))
            .await
            .unwrap();
        // The approval reply marks the broadcast as fully processed.
        harness
            .outbound
            .claim_approvals
            .recv()
            .await
            .expect("approval out");

        harness
            .commands
            .send(PoolCommand::Remove { hash })
            .await
            .unwrap();

        assert_eq!(inspect(&harness, hash).await, None);
    }
}
