//! Observer node assembly.
//!
//! Wires the frame timer, the approval pool worker and the network
//! dispatch into one running node: a listener identifies inbound peers
//! against the roster, readers feed typed channels, the writer multiplexes
//! outbound classes over the connection map, and the worker gathers
//! approvals until consensus.

pub mod worker;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use vigil_core::{FrameEvent, KeyStore, KeyStoreError, Pool, Reporter, Timer, TimerEvent};
use vigil_model::{
    Artifact, Digest, Error as CoreError, ObserverIndex, ObserversConfiguration, Settings,
};
use vigil_net::{
    outbound_channels, run_acceptor, run_writer, ConnectionMap, InboundSenders,
    OutboundSenders, OUTBOUND_CLASS_CAPACITY,
};
use vigil_proto::{Message, Outbound};

pub use worker::{NodeEvent, PoolCommand, PoolEntry, PoolWorker};

/// Buffering for inbound artifact classes.
pub const INBOUND_CLASS_CAPACITY: usize = OUTBOUND_CLASS_CAPACITY;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("key store: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ObserverNode;

impl ObserverNode {
    /// Validates settings, loads the key store from `settings.key_path`
    /// and brings the node up.
    pub async fn start(
        settings: Settings,
        reporter: Arc<dyn Reporter>,
    ) -> Result<NodeHandle, NodeError> {
        settings.validate()?;
        let keystore = Arc::new(KeyStore::open(&settings.key_path)?);
        Self::start_with_keystore(settings, reporter, keystore).await
    }

    /// Brings the node up with an already-loaded key store.
    pub async fn start_with_keystore(
        settings: Settings,
        reporter: Arc<dyn Reporter>,
        keystore: Arc<KeyStore>,
    ) -> Result<NodeHandle, NodeError> {
        settings.validate()?;

        let configuration = reporter.current_configuration();
        let local_index = resolve_local_index(&configuration, &keystore)?;
        let (roster_tx, roster_rx) = watch::channel(configuration);

        let listener = TcpListener::bind(settings.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(observer = local_index, %local_addr, "observer node starting");

        let connections = ConnectionMap::new();
        let (outbound, outbound_receivers) = outbound_channels();
        let (timer, timer_channels) = Timer::new(&settings, reporter.clone());

        let (claim_broadcasts_tx, claim_broadcasts) = mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (claim_approvals_tx, claim_approvals) = mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (tsl_broadcasts_tx, tsl_broadcasts) = mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (tsl_approvals_tx, tsl_approvals) = mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (digest_broadcasts_tx, digest_broadcasts) =
            mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (digest_approvals_tx, digest_approvals) = mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (block_signatures_tx, block_signature_broadcasts) =
            mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (commands_tx, commands) = mpsc::channel(INBOUND_CLASS_CAPACITY);
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (frame_events_tx, frame_events) = mpsc::channel(1);

        let inbound = InboundSenders {
            time_frame_requests: timer_channels.incoming_requests.clone(),
            time_frame_responses: timer_channels.incoming_responses.clone(),
            tsl_broadcasts: tsl_broadcasts_tx,
            tsl_approvals: tsl_approvals_tx,
            claim_broadcasts: claim_broadcasts_tx,
            claim_approvals: claim_approvals_tx,
            digest_broadcasts: digest_broadcasts_tx,
            digest_approvals: digest_approvals_tx,
            block_signature_broadcasts: block_signatures_tx,
        };

        let worker = PoolWorker {
            pool: Pool::new(),
            keystore: keystore.clone(),
            roster: roster_rx.clone(),
            local_index,
            consensus_count: settings.consensus_count,
            reported: HashSet::new(),
            claim_broadcasts,
            claim_approvals,
            tsl_broadcasts,
            tsl_approvals,
            digest_broadcasts,
            digest_approvals,
            block_signature_broadcasts,
            commands,
            outbound: outbound.clone(),
            events: events_tx,
        };

        let timer_bus = timer_channels.bus.clone();
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(async move {
            if let Err(error) = timer.run().await {
                tracing::error!(%error, "timer stopped");
            }
        }));

        // Bridge the timer's net-agnostic channels into dispatch.
        let sync_requests_out = outbound.time_frame_requests.clone();
        let mut outgoing_requests = timer_channels.outgoing_requests;
        tasks.push(tokio::spawn(async move {
            while let Some(request) = outgoing_requests.recv().await {
                let outbound =
                    Outbound::broadcast(Message::TimeFramesRequest(request));
                if sync_requests_out.send(outbound).await.is_err() {
                    return;
                }
            }
        }));

        let sync_responses_out = outbound.time_frame_responses.clone();
        let mut outgoing_responses = timer_channels.outgoing_responses;
        tasks.push(tokio::spawn(async move {
            while let Some((observer, response)) = outgoing_responses.recv().await {
                let outbound = Outbound::to_observer(
                    observer,
                    Message::TimeFrameResponse(response),
                );
                if sync_responses_out.send(outbound).await.is_err() {
                    return;
                }
            }
        }));

        // Frame events pass through so the handle owns a plain receiver;
        // the non-blocking relay keeps the drop-on-busy contract.
        let mut timer_frame_events = timer_channels.frame_events;
        tasks.push(tokio::spawn(async move {
            while let Some(event) = timer_frame_events.recv().await {
                let _ = frame_events_tx.try_send(event);
            }
        }));

        tasks.push(tokio::spawn(worker.run()));

        let acceptor_inbound = inbound.clone();
        let acceptor_roster = roster_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(error) = run_acceptor(listener, acceptor_inbound, acceptor_roster).await
            {
                tracing::error!(%error, "listener stopped");
            }
        }));

        tasks.push(tokio::spawn(run_writer(
            outbound_receivers,
            connections.clone(),
            roster_rx,
            local_index,
        )));

        if let Some(max_delay) = settings.idle_connection_timeout {
            tasks.push(connections.spawn_idle_sweeper(max_delay));
        }

        Ok(NodeHandle {
            local_index,
            local_addr,
            frame_events,
            events,
            commands: commands_tx,
            outbound,
            timer_bus,
            reporter,
            roster: roster_tx,
            connections,
            tasks,
        })
    }
}

/// Running node: channel ends for the layer above, plus shutdown.
pub struct NodeHandle {
    pub local_index: ObserverIndex,
    pub local_addr: SocketAddr,
    /// Frame ends from the timer. Missing a tick is allowed by contract.
    pub frame_events: mpsc::Receiver<Arc<FrameEvent>>,
    /// Consensus notifications from the pool worker.
    pub events: mpsc::Receiver<NodeEvent>,
    commands: mpsc::Sender<PoolCommand>,
    outbound: OutboundSenders,
    timer_bus: mpsc::Sender<TimerEvent>,
    reporter: Arc<dyn Reporter>,
    roster: watch::Sender<Arc<ObserversConfiguration>>,
    connections: Arc<ConnectionMap>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Pools a locally produced artifact and broadcasts it for approval.
    pub async fn publish(&self, artifact: Artifact) -> Result<Digest, NodeError> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(PoolCommand::Publish { artifact, resp })
            .await
            .map_err(|_| CoreError::ChannelTransferringFailed)?;
        let hash = rx
            .await
            .map_err(|_| CoreError::ChannelTransferringFailed)??;
        Ok(hash)
    }

    /// Current state of one pooled record, if still tracked.
    pub async fn inspect(&self, hash: Digest) -> Result<Option<PoolEntry>, NodeError> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(PoolCommand::Inspect { hash, resp })
            .await
            .map_err(|_| CoreError::ChannelTransferringFailed)?;
        Ok(rx.await.map_err(|_| CoreError::ChannelTransferringFailed)?)
    }

    /// Drops a finalized artifact from the pool.
    pub async fn remove(&self, hash: Digest) -> Result<(), NodeError> {
        self.commands
            .send(PoolCommand::Remove { hash })
            .await
            .map_err(|_| CoreError::ChannelTransferringFailed)?;
        Ok(())
    }

    /// Adopts the reporter's latest roster and tells the timer to re-sync.
    pub fn notify_configuration_changed(&self) {
        let configuration = self.reporter.current_configuration();
        let _ = self.roster.send(configuration);
        if self.timer_bus.try_send(TimerEvent::ConfigurationChanged).is_err() {
            tracing::warn!("timer bus busy, configuration change not delivered");
        }
    }

    /// Direct access to the outbound message classes, for producers above
    /// this layer.
    pub fn outbound(&self) -> &OutboundSenders {
        &self.outbound
    }

    /// Closes all peer connections and stops every task.
    pub async fn shutdown(self) {
        self.connections.close_all().await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn resolve_local_index(
    configuration: &ObserversConfiguration,
    keystore: &KeyStore,
) -> Result<ObserverIndex, NodeError> {
    let public_key = keystore.public_key_sec1();
    configuration
        .observers
        .iter()
        .find(|observer| observer.public_key.as_deref() == Some(public_key.as_slice()))
        .map(|observer| observer.index)
        .ok_or_else(|| CoreError::NoSuchObserver.into())
}
