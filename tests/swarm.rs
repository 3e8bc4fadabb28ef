use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use libp2p::identity::Keypair;
use libp2p::PeerId;
use serde_json::json;

use nrn_gateway::config::RelayConfig;
use nrn_gateway::interfaces::transport::{PeerStream, SharedStream, StreamHost};
use nrn_gateway::providers::memory::InMemoryPeerRegistry;
use nrn_gateway::providers::notifier::LogNotifier;
use nrn_gateway::services::identity::HexKeyResolver;
use nrn_gateway::services::swarm::SwarmHost;
use nrn_gateway::shutdown::{shutdown_channel, ShutdownTrigger};
use nrn_gateway::{run_buyer_pipeline, run_seller_pipeline, Envelope, PipelineContext, RoleChannels};

const PROTOCOL: &str = "nrn-nodered/v1";
const WAIT: Duration = Duration::from_secs(10);

struct Node {
    host: Arc<SwarmHost>,
    key: String,
    // Dropping the node stops its host.
    _stop: ShutdownTrigger,
}

impl Node {
    fn peer_id(&self) -> PeerId {
        self.host.local_peer_id()
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn start_node(bootstrap: Option<&Node>) -> Node {
    let keypair = Keypair::generate_secp256k1();
    let key = hex::encode(keypair.public().try_into_secp256k1().unwrap().to_bytes());
    let bootstrap = match bootstrap {
        Some(node) => node.host.listen_addrs().await,
        None => Vec::new(),
    };
    let (trigger, shutdown) = shutdown_channel();
    let host = SwarmHost::start(
        keypair,
        vec!["/ip4/127.0.0.1/tcp/0".parse().unwrap()],
        bootstrap,
        PROTOCOL,
        shutdown,
    )
    .await
    .unwrap();
    let host = Arc::new(host);
    let listening = host.clone();
    eventually("listen address", || {
        let host = listening.clone();
        async move { !host.listen_addrs().await.is_empty() }
    })
    .await;
    Node {
        host,
        key,
        _stop: trigger,
    }
}

/// Two hosts on loopback, the second dialled into the first.
async fn connected_pair() -> (Node, Node) {
    let first = start_node(None).await;
    let second = start_node(Some(&first)).await;

    let (a, b) = (first.host.clone(), second.host.clone());
    let (a_id, b_id) = (first.peer_id(), second.peer_id());
    eventually("connection", || {
        let (a, b) = (a.clone(), b.clone());
        async move {
            a.connected_peers().await.contains(&b_id) && b.connected_peers().await.contains(&a_id)
        }
    })
    .await;
    (first, second)
}

async fn first_listed(host: &Arc<SwarmHost>) -> SharedStream {
    let listed = host.clone();
    eventually("listed stream", || {
        let host = listed.clone();
        async move { !host.streams().await.is_empty() }
    })
    .await;
    host.streams().await.remove(0)
}

async fn read_line(stream: &SharedStream) -> String {
    let mut collected = Vec::new();
    let mut buf = [0u8; 256];
    let deadline = tokio::time::Instant::now() + WAIT;
    while !collected.ends_with(b"\n") {
        assert!(tokio::time::Instant::now() < deadline, "no full line arrived");
        match stream.read(&mut buf, Duration::from_millis(200)).await {
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
            Err(err) => panic!("read failed: {err}"),
        }
    }
    String::from_utf8(collected).unwrap()
}

fn fast_relay() -> RelayConfig {
    RelayConfig {
        read_deadline_ms: 100,
        timeout_backoff_ms: 5,
        poll_interval_ms: 20,
        ..RelayConfig::default()
    }
}

fn context(node: &Node) -> PipelineContext {
    PipelineContext {
        host: node.host.clone(),
        registry: Arc::new(InMemoryPeerRegistry::new()),
        notifier: Arc::new(LogNotifier),
        resolver: Arc::new(HexKeyResolver),
        protocol: PROTOCOL.to_string(),
        relay: fast_relay(),
    }
}

async fn next_envelope(channel: &nrn_gateway::RelayChannel) -> Envelope {
    tokio::time::timeout(WAIT, channel.recv())
        .await
        .expect("no envelope arrived")
        .expect("channel closed")
}

#[tokio::test]
async fn inbound_streams_are_listed_without_a_subscriber() {
    let (buyer, seller) = connected_pair().await;

    let opened = buyer
        .host
        .open_stream(seller.peer_id(), PROTOCOL)
        .await
        .unwrap();
    opened.write_all(b"hello\n").await.unwrap();

    let inbound = first_listed(&seller.host).await;
    assert_eq!(inbound.protocol(), PROTOCOL);
    assert_eq!(inbound.remote_peer(), buyer.peer_id());
    assert_eq!(read_line(&inbound).await, "hello\n");

    inbound.write_all(b"back\n").await.unwrap();
    assert_eq!(read_line(&opened).await, "back\n");
}

#[tokio::test]
async fn idle_read_reports_timed_out() {
    let (buyer, seller) = connected_pair().await;
    let opened = buyer
        .host
        .open_stream(seller.peer_id(), PROTOCOL)
        .await
        .unwrap();
    opened.write_all(b"x\n").await.unwrap();
    first_listed(&seller.host).await;

    let mut buf = [0u8; 16];
    let err = opened
        .read(&mut buf, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    assert!(!opened.is_closed());
}

#[tokio::test]
async fn end_of_stream_marks_the_reader_closed() {
    let (buyer, seller) = connected_pair().await;
    let opened = buyer
        .host
        .open_stream(seller.peer_id(), PROTOCOL)
        .await
        .unwrap();
    opened.write_all(b"last\n").await.unwrap();

    let inbound = first_listed(&seller.host).await;
    assert_eq!(read_line(&inbound).await, "last\n");
    opened.close().await;
    assert!(opened.is_closed());

    let mut buf = [0u8; 16];
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        assert!(tokio::time::Instant::now() < deadline, "remote close never arrived");
        match inbound.read(&mut buf, Duration::from_millis(100)).await {
            Ok(0) => break,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
            other => panic!("unexpected read result {other:?}"),
        }
    }
    assert!(inbound.is_closed());
}

#[tokio::test]
async fn stopped_peer_closes_and_prunes_its_streams() {
    let (buyer, seller) = connected_pair().await;
    let opened = buyer
        .host
        .open_stream(seller.peer_id(), PROTOCOL)
        .await
        .unwrap();
    opened.write_all(b"bye\n").await.unwrap();
    let inbound = first_listed(&seller.host).await;

    drop(buyer);

    let host = seller.host.clone();
    eventually("connection closed", || {
        let host = host.clone();
        async move { host.connected_peers().await.is_empty() }
    })
    .await;
    assert!(inbound.is_closed());
    assert!(seller.host.streams().await.is_empty());
}

#[tokio::test]
async fn subscriber_receives_inbound_and_locally_opened_streams() {
    let (buyer, seller) = connected_pair().await;
    let mut incoming = buyer.host.accept(PROTOCOL).unwrap();

    let from_seller = seller
        .host
        .open_stream(buyer.peer_id(), PROTOCOL)
        .await
        .unwrap();
    from_seller.write_all(b"offer\n").await.unwrap();
    let delivered = tokio::time::timeout(WAIT, incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.remote_peer(), seller.peer_id());
    assert_eq!(read_line(&delivered).await, "offer\n");

    let to_seller = buyer
        .host
        .open_stream(seller.peer_id(), PROTOCOL)
        .await
        .unwrap();
    let delivered = tokio::time::timeout(WAIT, incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.id(), to_seller.id());
}

#[tokio::test]
async fn accept_rejects_a_protocol_the_host_does_not_serve() {
    let node = start_node(None).await;
    assert!(node.host.accept("other/v1").is_err());
    assert!(node.host.accept(PROTOCOL).is_ok());
}

#[tokio::test]
async fn seller_pipeline_relays_both_ways_over_real_hosts() {
    let (buyer, seller) = connected_pair().await;
    let channels = RoleChannels::new(1);
    let (_stop, shutdown) = shutdown_channel();
    let pipeline = run_seller_pipeline(shutdown, &context(&seller), &channels).unwrap();

    let opened = buyer
        .host
        .open_stream(seller.peer_id(), PROTOCOL)
        .await
        .unwrap();
    opened.write_all(b"order\n").await.unwrap();

    let inbound = next_envelope(&channels.to_ws).await;
    assert_eq!(inbound.kind, "p2p");
    assert!(inbound.payload_text().starts_with("order"));
    assert_eq!(inbound.public_key.as_deref(), Some(buyer.key.as_str()));

    channels
        .to_p2p
        .sender()
        .send(Envelope::new("p2p", json!("reply")).with_public_key(buyer.key.clone()))
        .await
        .unwrap();
    assert_eq!(next_envelope(&channels.responses).await.kind, "success");
    assert_eq!(read_line(&opened).await, "reply\n");

    pipeline.abort();
}

#[tokio::test]
async fn buyer_pipeline_reads_streams_sellers_open() {
    let (buyer, seller) = connected_pair().await;
    let channels = RoleChannels::new(1);
    let (_stop, shutdown) = shutdown_channel();
    let pipeline = run_buyer_pipeline(shutdown, &context(&buyer), &channels).unwrap();

    let opened = seller
        .host
        .open_stream(buyer.peer_id(), PROTOCOL)
        .await
        .unwrap();
    opened.write_all(b"offer\n").await.unwrap();

    let inbound = next_envelope(&channels.to_ws).await;
    assert!(inbound.payload_text().starts_with("offer"));
    assert_eq!(inbound.public_key.as_deref(), Some(seller.key.as_str()));

    pipeline.abort();
}
