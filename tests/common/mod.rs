#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use serde_json::Value;
use tokio::sync::mpsc;

use nrn_gateway::error::{GatewayError, Result};
use nrn_gateway::interfaces::keys::PeerKeyResolver;
use nrn_gateway::interfaces::registry::{
    BufferHandle, DeliveryMode, PeerNotifier, PeerRegistry, PeerState, WriteErrorKind,
};
use nrn_gateway::interfaces::transport::{
    IncomingStreams, PeerStream, SharedStream, StreamHost, StreamId,
};
use nrn_gateway::providers::memory::InMemoryPeerRegistry;

pub const PROTOCOL: &str = "nrn-nodered/v1";

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Hex public key and the peer id it resolves to.
pub fn secp_identity() -> (String, PeerId) {
    let keypair = Keypair::generate_secp256k1();
    let key = hex::encode(keypair.public().try_into_secp256k1().unwrap().to_bytes());
    (key, PeerId::from(keypair.public()))
}

pub enum ReadStep {
    Data(Vec<u8>),
    Timeout,
    Fail(io::ErrorKind),
    Eof,
}

pub struct MockStream {
    id: StreamId,
    protocol: String,
    peer: PeerId,
    script: Mutex<VecDeque<ReadStep>>,
    closed: AtomicBool,
    fail_writes: AtomicBool,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub close_calls: AtomicUsize,
}

impl MockStream {
    pub fn new(peer: PeerId, protocol: &str, script: Vec<ReadStep>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::SeqCst),
            protocol: protocol.to_string(),
            peer,
            script: Mutex::new(script.into()),
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn shared(self: &Arc<Self>) -> SharedStream {
        self.clone()
    }
}

#[async_trait]
impl PeerStream for MockStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn remote_peer(&self) -> PeerId {
        self.peer
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn read(&self, buf: &mut [u8], deadline: Duration) -> io::Result<usize> {
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(ReadStep::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.script
                        .lock()
                        .unwrap()
                        .push_front(ReadStep::Data(bytes[n..].to_vec()));
                }
                Ok(n)
            }
            Some(ReadStep::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "deadline")),
            Some(ReadStep::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Some(ReadStep::Eof) => {
                self.set_closed();
                Ok(0)
            }
            None => {
                tokio::time::sleep(deadline.min(Duration::from_millis(5))).await;
                Err(io::Error::new(io::ErrorKind::TimedOut, "deadline"))
            }
        }
    }

    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream reset"));
        }
        self.writes.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.set_closed();
    }
}

pub struct MockHost {
    peer_id: PeerId,
    addrs: Mutex<Vec<Multiaddr>>,
    connected: Mutex<Vec<PeerId>>,
    streams: Mutex<Vec<SharedStream>>,
    openable: Mutex<HashMap<PeerId, SharedStream>>,
    accept_tx: Mutex<Option<mpsc::Sender<SharedStream>>>,
    pub opened: Mutex<Vec<PeerId>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peer_id: PeerId::random(),
            addrs: Mutex::new(vec!["/ip4/127.0.0.1/tcp/1354".parse().unwrap()]),
            connected: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            openable: Mutex::new(HashMap::new()),
            accept_tx: Mutex::new(None),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn without_addrs(self: &Arc<Self>) -> Arc<Self> {
        self.addrs.lock().unwrap().clear();
        self.clone()
    }

    pub fn list_stream(&self, stream: SharedStream) {
        self.streams.lock().unwrap().push(stream);
    }

    pub fn unlist_stream(&self, id: StreamId) {
        self.streams.lock().unwrap().retain(|stream| stream.id() != id);
    }

    pub fn connect(&self, peer: PeerId) {
        self.connected.lock().unwrap().push(peer);
    }

    /// Stream handed out by the next `open_stream` for `peer`.
    pub fn allow_open(&self, peer: PeerId, stream: SharedStream) {
        self.openable.lock().unwrap().insert(peer, stream);
    }

    /// Delivers a stream to whoever called `accept`.
    pub async fn push_inbound(&self, stream: SharedStream) {
        let tx = self.accept_tx.lock().unwrap().clone();
        tx.expect("accept was not called").send(stream).await.unwrap();
    }
}

#[async_trait]
impl StreamHost for MockHost {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.addrs.lock().unwrap().clone()
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.lock().unwrap().clone()
    }

    fn accept(&self, _protocol: &str) -> Result<IncomingStreams> {
        let (tx, rx) = mpsc::channel(8);
        *self.accept_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn streams(&self) -> Vec<SharedStream> {
        self.streams.lock().unwrap().clone()
    }

    async fn open_stream(&self, peer: PeerId, _protocol: &str) -> Result<SharedStream> {
        self.opened.lock().unwrap().push(peer);
        self.openable
            .lock()
            .unwrap()
            .remove(&peer)
            .ok_or_else(|| GatewayError::Transport(format!("no route to {peer}")))
    }
}

/// Delegates to the in-memory registry and records what the relay asked of it.
#[derive(Default)]
pub struct RecordingRegistry {
    pub inner: InMemoryPeerRegistry,
    pub state_updates: Mutex<Vec<(PeerId, PeerState)>>,
    pub write_calls: AtomicUsize,
    pub attached: Mutex<Vec<(PeerId, StreamId)>>,
}

impl RecordingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<(PeerId, PeerState)> {
        self.state_updates.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerRegistry for RecordingRegistry {
    async fn lookup(&self, peer: &PeerId) -> Option<BufferHandle> {
        self.inner.lookup(peer).await
    }

    async fn write_and_flush(
        &self,
        buffer: &BufferHandle,
        peer: &PeerId,
        bytes: &[u8],
        host: &dyn StreamHost,
        protocol: &str,
    ) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .write_and_flush(buffer, peer, bytes, host, protocol)
            .await
    }

    async fn buffers(&self) -> HashMap<PeerId, BufferHandle> {
        self.inner.buffers().await
    }

    async fn attach_stream(&self, peer: PeerId, stream: SharedStream) {
        self.attached.lock().unwrap().push((peer, stream.id()));
        self.inner.attach_stream(peer, stream).await;
    }

    async fn update_state(&self, peer: &PeerId, state: PeerState) {
        self.state_updates.lock().unwrap().push((*peer, state));
        self.inner.update_state(peer, state).await;
    }

    async fn replace_peer_set(
        &self,
        target_public_keys: &[String],
        host: &dyn StreamHost,
        reachable_addrs: &[Multiaddr],
        protocol: &str,
    ) -> Result<()> {
        self.inner
            .replace_peer_set(target_public_keys, host, reachable_addrs, protocol)
            .await
    }

    async fn detailed_status(&self, host: &dyn StreamHost) -> Value {
        self.inner.detailed_status(host).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: Mutex<Vec<(String, WriteErrorKind, String, DeliveryMode)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, WriteErrorKind, String, DeliveryMode)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerNotifier for RecordingNotifier {
    async fn notify_write_error(
        &self,
        control_ref: &str,
        kind: WriteErrorKind,
        message: &str,
        mode: DeliveryMode,
    ) {
        self.calls
            .lock()
            .unwrap()
            .push((control_ref.to_string(), kind, message.to_string(), mode));
    }
}

/// Resolver whose output never parses as a peer id.
pub struct GarbageResolver;

impl PeerKeyResolver for GarbageResolver {
    fn peer_identifier(&self, _public_key: &str) -> Result<String> {
        Ok("not-a-peer-id".to_string())
    }
}
