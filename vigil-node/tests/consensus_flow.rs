//! Full-stack flow over real sockets: a scripted peer broadcasts a claim,
//! the node pools it, answers with a signed approval and records the
//! peer's approval vote. The peer lives on a second loopback address so
//! the listener can tell the two observers apart by host.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};
use vigil_core::{KeyStore, StaticReporter};
use vigil_model::codec::MarshalBinary;
use vigil_model::{
    Artifact, Claim, ClaimMembers, Digest, MemberId, Observer, ObserversConfiguration,
    Settings, TxId,
};
use vigil_node::ObserverNode;
use vigil_proto::{Approval, EnvelopeCodec, Message};

const NODE_HOST: &str = "127.0.0.1";
const PEER_HOST: &str = "127.0.0.2";

fn test_claim() -> Claim {
    Claim::new(
        TxId::from_bytes([0x31; 16]),
        ClaimMembers::new(vec![MemberId::from_bytes([0x32; 16])]),
    )
}

#[tokio::test]
async fn test_claim_broadcast_approval_roundtrip() {
    let node_keys = Arc::new(KeyStore::generate());
    let peer_keys = Arc::new(KeyStore::generate());

    // The scripted peer listens on its own loopback address; the node
    // dials it there for replies and broadcasts.
    let peer_listener = TcpListener::bind((PEER_HOST, 0)).await.expect("peer listener");
    let peer_port = peer_listener.local_addr().unwrap().port();

    let configuration = ObserversConfiguration::new(vec![
        Observer {
            index: 0,
            host: NODE_HOST.into(),
            port: 0,
            public_key: Some(node_keys.public_key_sec1()),
        },
        Observer {
            index: 1,
            host: PEER_HOST.into(),
            port: peer_port,
            public_key: Some(peer_keys.public_key_sec1()),
        },
    ])
    .expect("valid roster");

    let settings = Settings {
        listen_addr: format!("{NODE_HOST}:0").parse().unwrap(),
        ..Settings::default()
    };
    let handle = ObserverNode::start_with_keystore(
        settings,
        Arc::new(StaticReporter::new(configuration)),
        node_keys.clone(),
    )
    .await
    .expect("node start");
    assert_eq!(handle.local_index, 0);

    // Dial the node from the peer's address so the acceptor can identify
    // observer 1, then broadcast a claim.
    let socket = TcpSocket::new_v4().expect("socket");
    socket
        .bind(format!("{PEER_HOST}:0").parse().unwrap())
        .expect("bind source address");
    let stream = socket.connect(handle.local_addr).await.expect("dial node");
    let (_peer_read, peer_write) = stream.into_split();
    let mut peer_sink = FramedWrite::new(peer_write, EnvelopeCodec);

    let claim = test_claim();
    let hash = Digest::of(&claim.marshal_binary().unwrap());
    peer_sink
        .send(&Message::ClaimBroadcast(claim.clone()))
        .await
        .expect("send broadcast");

    // The node answers over its own outbound connection. The same link
    // also carries the startup sync request, so skim until the approval.
    let (node_link, _) = timeout(Duration::from_secs(5), peer_listener.accept())
        .await
        .expect("node dials back")
        .expect("accept");
    let mut node_frames = FramedRead::new(node_link, EnvelopeCodec);

    let approval = loop {
        let frame = timeout(Duration::from_secs(5), node_frames.next())
            .await
            .expect("frame in time")
            .expect("link open")
            .expect("clean frame");
        match frame {
            Message::ClaimApprove(approval) => break approval,
            other => {
                assert!(
                    matches!(other, Message::TimeFramesRequest(_)),
                    "unexpected message: {other:?}"
                );
            }
        }
    };

    assert_eq!(approval.hash, hash);
    assert_eq!(approval.observer, 0);
    assert!(node_keys.verify_own(hash.as_bytes(), &approval.signature));

    // Vote back as observer 1; the node records it.
    let signature = peer_keys.sign_hash(hash.as_bytes()).unwrap();
    peer_sink
        .send(&Message::ClaimApprove(Approval { hash, observer: 1, signature }))
        .await
        .expect("send approval");

    let mut votes = 0;
    for _ in 0..50 {
        if let Some(entry) = handle.inspect(hash).await.expect("inspect") {
            votes = entry.positive_votes;
            if votes == 2 {
                break;
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(votes, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_time_frame_request_is_served() {
    let node_keys = Arc::new(KeyStore::generate());
    let peer_keys = Arc::new(KeyStore::generate());

    let peer_listener = TcpListener::bind((PEER_HOST, 0)).await.expect("peer listener");
    let peer_port = peer_listener.local_addr().unwrap().port();

    let configuration = ObserversConfiguration::new(vec![
        Observer {
            index: 0,
            host: NODE_HOST.into(),
            port: 0,
            public_key: Some(node_keys.public_key_sec1()),
        },
        Observer {
            index: 1,
            host: PEER_HOST.into(),
            port: peer_port,
            public_key: Some(peer_keys.public_key_sec1()),
        },
    ])
    .expect("valid roster");

    let settings = Settings {
        listen_addr: format!("{NODE_HOST}:0").parse().unwrap(),
        ..Settings::default()
    };
    let handle = ObserverNode::start_with_keystore(
        settings,
        Arc::new(StaticReporter::new(configuration)),
        node_keys,
    )
    .await
    .expect("node start");

    let socket = TcpSocket::new_v4().expect("socket");
    socket
        .bind(format!("{PEER_HOST}:0").parse().unwrap())
        .expect("bind source address");
    let stream = socket.connect(handle.local_addr).await.expect("dial node");
    let (_peer_read, peer_write) = stream.into_split();
    let mut peer_sink = FramedWrite::new(peer_write, EnvelopeCodec);

    peer_sink
        .send(&Message::TimeFramesRequest(Default::default()))
        .await
        .expect("send request");

    let (node_link, _) = timeout(Duration::from_secs(5), peer_listener.accept())
        .await
        .expect("node dials back")
        .expect("accept");
    let mut node_frames = FramedRead::new(node_link, EnvelopeCodec);

    let response = loop {
        let frame = timeout(Duration::from_secs(5), node_frames.next())
            .await
            .expect("frame in time")
            .expect("link open")
            .expect("clean frame");
        if let Message::TimeFrameResponse(response) = frame {
            break response;
        }
    };

    // Still synchronising: index 0 with around an interval plus the sync
    // window remaining.
    assert_eq!(response.frame_index, 0);
    assert!(response.nanoseconds_left > 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_publish_reaches_the_roster() {
    let node_keys = Arc::new(KeyStore::generate());
    let peer_keys = Arc::new(KeyStore::generate());

    let peer_listener = TcpListener::bind((PEER_HOST, 0)).await.expect("peer listener");
    let peer_port = peer_listener.local_addr().unwrap().port();

    let configuration = ObserversConfiguration::new(vec![
        Observer {
            index: 0,
            host: NODE_HOST.into(),
            port: 0,
            public_key: Some(node_keys.public_key_sec1()),
        },
        Observer {
            index: 1,
            host: PEER_HOST.into(),
            port: peer_port,
            public_key: Some(peer_keys.public_key_sec1()),
        },
    ])
    .expect("valid roster");

    let settings = Settings {
        listen_addr: format!("{NODE_HOST}:0").parse().unwrap(),
        ..Settings::default()
    };
    let handle = ObserverNode::start_with_keystore(
        settings,
        Arc::new(StaticReporter::new(configuration)),
        node_keys,
    )
    .await
    .expect("node start");

    let claim = test_claim();
    let hash = handle
        .publish(Artifact::Claim(claim.clone()))
        .await
        .expect("publish");
    assert_eq!(hash, Digest::of(&claim.marshal_binary().unwrap()));

    let (node_link, _) = timeout(Duration::from_secs(5), peer_listener.accept())
        .await
        .expect("node dials out")
        .expect("accept");
    let mut node_frames = FramedRead::new(node_link, EnvelopeCodec);

    let broadcast = loop {
        let frame = timeout(Duration::from_secs(5), node_frames.next())
            .await
            .expect("frame in time")
            .expect("link open")
            .expect("clean frame");
        if let Message::ClaimBroadcast(broadcast) = frame {
            break broadcast;
        }
    };
    assert_eq!(broadcast, claim);

    let entry = handle
        .inspect(hash)
        .await
        .expect("inspect")
        .expect("pooled entry");
    assert_eq!(entry.positive_votes, 1);

    handle.shutdown().await;
}
