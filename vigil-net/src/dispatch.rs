//! Message dispatch: the read half routes decoded envelopes to typed
//! inbound channels; the write half multiplexes per-class outbound
//! channels over the connection map.

use crate::connections::{ConnectionMap, ConnectionWrapper};
use crate::error::NetError;
use futures_util::future::select_all;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::FramedRead;
use vigil_model::{
    BlockDigest, BlockSignatures, Claim, Error, Observer, ObserverIndex,
    ObserversConfiguration, Tsl, OBSERVERS_MAX_COUNT,
};
use vigil_proto::{
    Approval, Destination, EnvelopeCodec, Inbound, Message, Outbound, RequestTimeFrames,
    ResponseTimeFrame,
};

/// Buffering for broadcast/approval classes. Sync channels keep the sizes
/// the timer dictates instead.
pub const OUTBOUND_CLASS_CAPACITY: usize = 64;

/// Typed inbound channels, one per message class.
#[derive(Clone)]
pub struct InboundSenders {
    pub time_frame_requests: mpsc::Sender<Inbound<RequestTimeFrames>>,
    pub time_frame_responses: mpsc::Sender<ResponseTimeFrame>,
    pub tsl_broadcasts: mpsc::Sender<Inbound<Tsl>>,
    pub tsl_approvals: mpsc::Sender<Inbound<Approval>>,
    pub claim_broadcasts: mpsc::Sender<Inbound<Claim>>,
    pub claim_approvals: mpsc::Sender<Inbound<Approval>>,
    pub digest_broadcasts: mpsc::Sender<Inbound<BlockDigest>>,
    pub digest_approvals: mpsc::Sender<Inbound<Approval>>,
    pub block_signature_broadcasts: mpsc::Sender<Inbound<BlockSignatures>>,
}

impl InboundSenders {
    /// Delivers one decoded message to its typed channel, preserving the
    /// arrival order of the owning connection.
    async fn route(&self, from: ObserverIndex, message: Message) -> Result<(), NetError> {
        let delivered = match message {
            Message::TimeFramesRequest(request) => self
                .time_frame_requests
                .send(Inbound::new(from, request))
                .await
                .is_ok(),
            Message::TimeFrameResponse(response) => {
                self.time_frame_responses.send(response).await.is_ok()
            }
            Message::TslBroadcast(tsl) => self
                .tsl_broadcasts
                .send(Inbound::new(from, tsl))
                .await
                .is_ok(),
            Message::TslApprove(approval) => self
                .tsl_approvals
                .send(Inbound::new(from, approval))
                .await
                .is_ok(),
            Message::ClaimBroadcast(claim) => self
                .claim_broadcasts
                .send(Inbound::new(from, claim))
                .await
                .is_ok(),
            Message::ClaimApprove(approval) => self
                .claim_approvals
                .send(Inbound::new(from, approval))
                .await
                .is_ok(),
            Message::DigestBroadcast(digest) => self
                .digest_broadcasts
                .send(Inbound::new(from, digest))
                .await
                .is_ok(),
            Message::DigestApprove(approval) => self
                .digest_approvals
                .send(Inbound::new(from, approval))
                .await
                .is_ok(),
            Message::BlockSignaturesBroadcast(signatures) => self
                .block_signature_broadcasts
                .send(Inbound::new(from, signatures))
                .await
                .is_ok(),
        };

        if delivered {
            Ok(())
        } else {
            Err(NetError::InboundClosed)
        }
    }
}

/// Reads envelopes off one peer connection until it closes or misbehaves.
/// Any decode error (unknown tag, ceiling breach, malformed payload) ends
/// only this connection.
pub async fn run_reader<R>(
    stream: R,
    from: ObserverIndex,
    inbound: InboundSenders,
) -> Result<(), NetError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(stream, EnvelopeCodec);

    while let Some(frame) = frames.next().await {
        let message = frame?;
        tracing::trace!(observer = from, data_type = ?message.data_type(), "inbound message");
        inbound.route(from, message).await?;
    }

    Ok(())
}

/// Receive ends of the per-class outbound channels.
pub struct OutboundReceivers {
    pub time_frame_requests: mpsc::Receiver<Outbound>,
    pub time_frame_responses: mpsc::Receiver<Outbound>,
    pub tsl_broadcasts: mpsc::Receiver<Outbound>,
    pub tsl_approvals: mpsc::Receiver<Outbound>,
    pub claim_broadcasts: mpsc::Receiver<Outbound>,
    pub claim_approvals: mpsc::Receiver<Outbound>,
    pub digest_broadcasts: mpsc::Receiver<Outbound>,
    pub digest_approvals: mpsc::Receiver<Outbound>,
    pub block_signature_broadcasts: mpsc::Receiver<Outbound>,
}

impl OutboundReceivers {
    /// The order classes are visited in each writer rotation.
    fn into_rotation(self) -> Vec<mpsc::Receiver<Outbound>> {
        vec![
            self.time_frame_requests,
            self.time_frame_responses,
            self.tsl_broadcasts,
            self.tsl_approvals,
            self.claim_broadcasts,
            self.claim_approvals,
            self.digest_broadcasts,
            self.digest_approvals,
            self.block_signature_broadcasts,
        ]
    }
}

/// Send ends of the per-class outbound channels.
#[derive(Clone)]
pub struct OutboundSenders {
    pub time_frame_requests: mpsc::Sender<Outbound>,
    pub time_frame_responses: mpsc::Sender<Outbound>,
    pub tsl_broadcasts: mpsc::Sender<Outbound>,
    pub tsl_approvals: mpsc::Sender<Outbound>,
    pub claim_broadcasts: mpsc::Sender<Outbound>,
    pub claim_approvals: mpsc::Sender<Outbound>,
    pub digest_broadcasts: mpsc::Sender<Outbound>,
    pub digest_approvals: mpsc::Sender<Outbound>,
    pub block_signature_broadcasts: mpsc::Sender<Outbound>,
}

/// Builds the outbound channel set. Sync request/response channels carry
/// one message at a time; the artifact classes get deeper buffers.
pub fn outbound_channels() -> (OutboundSenders, OutboundReceivers) {
    let (time_frame_requests, rx_requests) = mpsc::channel(1);
    let (time_frame_responses, rx_responses) = mpsc::channel(1);
    let (tsl_broadcasts, rx_tsl_b) = mpsc::channel(OUTBOUND_CLASS_CAPACITY);
    let (tsl_approvals, rx_tsl_a) = mpsc::channel(OUTBOUND_CLASS_CAPACITY);
    let (claim_broadcasts, rx_claim_b) = mpsc::channel(OUTBOUND_CLASS_CAPACITY);
    let (claim_approvals, rx_claim_a) = mpsc::channel(OUTBOUND_CLASS_CAPACITY);
    let (digest_broadcasts, rx_digest_b) = mpsc::channel(OUTBOUND_CLASS_CAPACITY);
    let (digest_approvals, rx_digest_a) = mpsc::channel(OUTBOUND_CLASS_CAPACITY);
    let (block_signature_broadcasts, rx_block) = mpsc::channel(OUTBOUND_CLASS_CAPACITY);

    let senders = OutboundSenders {
        time_frame_requests,
        time_frame_responses,
        tsl_broadcasts,
        tsl_approvals,
        claim_broadcasts,
        claim_approvals,
        digest_broadcasts,
        digest_approvals,
        block_signature_broadcasts,
    };
    let receivers = OutboundReceivers {
        time_frame_requests: rx_requests,
        time_frame_responses: rx_responses,
        tsl_broadcasts: rx_tsl_b,
        tsl_approvals: rx_tsl_a,
        claim_broadcasts: rx_claim_b,
        claim_approvals: rx_claim_a,
        digest_broadcasts: rx_digest_b,
        digest_approvals: rx_digest_a,
        block_signature_broadcasts: rx_block,
    };
    (senders, receivers)
}

/// Multiplexes the outbound classes in round-robin: one try per class per
/// rotation, then an await on whichever class produces next. Runs until
/// any class channel closes.
pub async fn run_writer(
    receivers: OutboundReceivers,
    connections: Arc<ConnectionMap>,
    roster: watch::Receiver<Arc<ObserversConfiguration>>,
    local_index: ObserverIndex,
) {
    let mut rotation = receivers.into_rotation();
    loop {
        let mut progressed = false;
        for receiver in &mut rotation {
            match receiver.try_recv() {
                Ok(outbound) => {
                    deliver(&connections, &roster, local_index, outbound).await;
                    progressed = true;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => return,
            }
        }
        if progressed {
            continue;
        }

        let recv_futures = rotation
            .iter_mut()
            .map(|receiver| Box::pin(receiver.recv()))
            .collect::<Vec<_>>();
        let (next, _, _) = select_all(recv_futures).await;
        match next {
            Some(outbound) => deliver(&connections, &roster, local_index, outbound).await,
            None => return,
        }
    }
}

async fn deliver(
    connections: &Arc<ConnectionMap>,
    roster: &watch::Receiver<Arc<ObserversConfiguration>>,
    local_index: ObserverIndex,
    outbound: Outbound,
) {
    let configuration = roster.borrow().clone();
    match outbound.to {
        Destination::Observer(observer) => {
            send_to(connections, &configuration, observer, &outbound.message).await;
        }
        Destination::Broadcast => {
            for observer in &configuration.observers {
                if observer.index == local_index {
                    continue;
                }
                send_to(connections, &configuration, observer.index, &outbound.message)
                    .await;
            }
        }
    }
}

/// Writes one message to one observer, dialling its roster address when no
/// live connection exists. Failures isolate to that observer's link.
async fn send_to(
    connections: &Arc<ConnectionMap>,
    configuration: &ObserversConfiguration,
    observer: ObserverIndex,
    message: &Message,
) {
    if observer >= OBSERVERS_MAX_COUNT {
        tracing::warn!(observer, "outbound message for impossible index dropped");
        return;
    }

    match connections.send(observer, message).await {
        Ok(()) => {}
        Err(NetError::Core(Error::NoSuchObserver)) => {
            let Ok(entry) = configuration.by_index(observer) else {
                tracing::debug!(observer, "observer absent from roster, message dropped");
                return;
            };
            match connect(entry).await {
                Ok(wrapper) => {
                    connections.set(observer, wrapper).await;
                    if let Err(error) = connections.send(observer, message).await {
                        tracing::warn!(observer, %error, "write failed, closing connection");
                        connections.delete_by_observer(observer).await;
                    }
                }
                Err(error) => {
                    tracing::warn!(observer, %error, "dial failed, message dropped");
                }
            }
        }
        Err(error) => {
            tracing::warn!(observer, %error, "write failed, closing connection");
            connections.delete_by_observer(observer).await;
        }
    }
}

async fn connect(entry: &Observer) -> Result<ConnectionWrapper, NetError> {
    let stream = TcpStream::connect(entry.address()).await?;
    let remote_address = stream.peer_addr()?;
    // Only the write half is kept; peers answer over their own links.
    let (_read_half, write_half) = stream.into_split();
    Ok(ConnectionWrapper::new(write_half, remote_address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use vigil_model::codec::MarshalBinary;
    use vigil_model::TxId;

    fn inbound_set() -> (
        InboundSenders,
        mpsc::Receiver<Inbound<Tsl>>,
        mpsc::Receiver<ResponseTimeFrame>,
    ) {
        let (time_frame_requests, _rx_req) = mpsc::channel(1);
        let (time_frame_responses, rx_responses) = mpsc::channel(OBSERVERS_MAX_COUNT as usize);
        let (tsl_broadcasts, rx_tsl) = mpsc::channel(8);
        let (tsl_approvals, _rx1) = mpsc::channel(8);
        let (claim_broadcasts, _rx2) = mpsc::channel(8);
        let (claim_approvals, _rx3) = mpsc::channel(8);
        let (digest_broadcasts, _rx4) = mpsc::channel(8);
        let (digest_approvals, _rx5) = mpsc::channel(8);
        let (block_signature_broadcasts, _rx6) = mpsc::channel(8);

        let senders = InboundSenders {
            time_frame_requests,
            time_frame_responses,
            tsl_broadcasts,
            tsl_approvals,
            claim_broadcasts,
            claim_approvals,
            digest_broadcasts,
            digest_approvals,
            block_signature_broadcasts,
        };
        // Keep the unrouted receivers alive for the duration of a test by
        // leaking them into the runtime; tests only watch the two returned.
        tokio::spawn(async move {
            let _keep = (_rx_req, _rx1, _rx2, _rx3, _rx4, _rx5, _rx6);
            std::future::pending::<()>().await;
        });
        (senders, rx_tsl, rx_responses)
    }

    #[tokio::test]
    async fn test_reader_routes_tsl_broadcast() {
        let (senders, mut rx_tsl, _rx_responses) = inbound_set();
        let (mut client, server) = tokio::io::duplex(1024);

        let reader = tokio::spawn(run_reader(server, 2, senders));

        // One enveloped 16-byte TSL broadcast: tag 130, length 16.
        let tsl = Tsl::new(TxId::from_bytes([0xAB; 16]), Vec::new());
        let payload = tsl.marshal_binary().unwrap();
        let mut wire = vec![130u8, 16, 0, 0, 0];
        wire.extend_from_slice(&payload);
        client.write_all(&wire).await.unwrap();

        let delivered = rx_tsl.recv().await.expect("routed message");
        assert_eq!(delivered.from, 2);
        assert_eq!(delivered.body, tsl);

        drop(client);
        reader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reader_stamps_time_frame_responses() {
        let (senders, _rx_tsl, mut rx_responses) = inbound_set();
        let (mut client, server) = tokio::io::duplex(1024);
        let _reader = tokio::spawn(run_reader(server, 1, senders));

        let response = ResponseTimeFrame::new(5, 900);
        let payload = response.marshal_binary().unwrap();
        let mut wire = vec![129u8, 10, 0, 0, 0];
        wire.extend_from_slice(&payload);
        client.write_all(&wire).await.unwrap();

        let before = tokio::time::Instant::now();
        let delivered = rx_responses.recv().await.expect("routed response");
        assert_eq!(delivered, response);
        assert!(delivered.received_at >= before - std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_reader_drops_connection_on_unknown_tag() {
        let (senders, _rx_tsl, _rx_responses) = inbound_set();
        let (mut client, server) = tokio::io::duplex(1024);
        let reader = tokio::spawn(run_reader(server, 0, senders));

        client.write_all(&[7u8, 0, 0, 0, 0]).await.unwrap();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(NetError::Codec(_))));
    }

    #[tokio::test]
    async fn test_reader_drops_connection_on_truncated_payload() {
        let (senders, _rx_tsl, _rx_responses) = inbound_set();
        let (mut client, server) = tokio::io::duplex(1024);
        let reader = tokio::spawn(run_reader(server, 0, senders));

        // Claim broadcast too short to hold a claim.
        client.write_all(&[132u8, 2, 0, 0, 0, 1, 2]).await.unwrap();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(NetError::Codec(_))));
    }
}
