use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use futures::StreamExt;
use libp2p::swarm::SwarmEvent;
use libp2p::{identity, noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm, Transport};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{GatewayError, Result};
use crate::interfaces::transport::{
    IncomingStreams, PeerStream, SharedStream, StreamHost, StreamId,
};
use crate::shutdown::Shutdown;

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// libp2p stream with separately locked halves so a reader and a writer never
/// wait on each other.
pub struct Libp2pStream {
    id: StreamId,
    protocol: String,
    peer: PeerId,
    reader: Mutex<ReadHalf<libp2p::Stream>>,
    writer: Mutex<WriteHalf<libp2p::Stream>>,
    closed: AtomicBool,
}

impl Libp2pStream {
    fn new(id: StreamId, protocol: String, peer: PeerId, stream: libp2p::Stream) -> Self {
        let (reader, writer) = stream.split();
        Self {
            id,
            protocol,
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerStream for Libp2pStream {
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
        let mut reader = self.reader.lock().await;
        match tokio::time::timeout(deadline, reader.read(buf)).await {
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "read deadline exceeded",
            )),
            Ok(Ok(0)) => {
                self.mark_closed();
                Ok(0)
            }
            Ok(result) => result,
        }
    }

    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    async fn close(&self) {
        self.mark_closed();
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}

/// Stream-oriented libp2p host serving one protocol. Every stream on that
/// protocol, accepted or opened locally, lands in an id-keyed arena so callers
/// can enumerate it, and is also handed to the `accept` subscriber if any.
#[derive(Clone)]
pub struct SwarmHost {
    peer_id: PeerId,
    protocol: String,
    control: libp2p_stream::Control,
    listen_addrs: Arc<RwLock<Vec<Multiaddr>>>,
    connected: Arc<RwLock<HashSet<PeerId>>>,
    streams: Arc<RwLock<HashMap<StreamId, Arc<Libp2pStream>>>>,
    subscriber: Arc<StdMutex<Option<mpsc::Sender<SharedStream>>>>,
    next_stream_id: Arc<AtomicU64>,
}

impl SwarmHost {
    /// Starts the swarm and registers `protocol` for inbound streams. The host
    /// stops, dropping its connections, when `shutdown` fires.
    pub async fn start(
        local_key: identity::Keypair,
        listen_addrs: Vec<Multiaddr>,
        bootstrap: Vec<Multiaddr>,
        protocol: &str,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let peer_id = PeerId::from(local_key.public());

        let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
            .upgrade(libp2p::core::upgrade::Version::V1Lazy)
            .authenticate(
                noise::Config::new(&local_key)
                    .map_err(|e| GatewayError::Transport(e.to_string()))?,
            )
            .multiplex(yamux::Config::default())
            .boxed();

        let behaviour = libp2p_stream::Behaviour::new();
        let mut control = behaviour.new_control();
        let mut incoming = control
            .accept(stream_protocol(protocol)?)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let mut swarm = Swarm::new(
            transport,
            behaviour,
            peer_id,
            libp2p::swarm::Config::with_tokio_executor()
                .with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT),
        );

        for addr in listen_addrs {
            swarm
                .listen_on(addr)
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
        }

        for addr in bootstrap {
            if let Err(err) = swarm.dial(addr.clone()) {
                tracing::warn!(%addr, error = %err, "bootstrap dial failed");
            }
        }

        let host = Self {
            peer_id,
            protocol: protocol.to_string(),
            control,
            listen_addrs: Arc::new(RwLock::new(Vec::new())),
            connected: Arc::new(RwLock::new(HashSet::new())),
            streams: Arc::new(RwLock::new(HashMap::new())),
            subscriber: Arc::new(StdMutex::new(None)),
            next_stream_id: Arc::new(AtomicU64::new(1)),
        };

        let event_host = host.clone();
        let mut swarm_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = swarm_shutdown.wait() => break,
                    event = swarm.select_next_some() => event_host.on_swarm_event(event).await,
                }
            }
            tracing::info!("p2p host stopped");
        });

        let accept_host = host.clone();
        let mut accept_shutdown = shutdown;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.wait() => return,
                    accepted = incoming.next() => {
                        let Some((peer, stream)) = accepted else {
                            return;
                        };
                        tracing::debug!(%peer, "inbound stream accepted");
                        let protocol = accept_host.protocol.clone();
                        accept_host.track(peer, &protocol, stream).await;
                    }
                }
            }
        });

        tracing::info!(%peer_id, protocol, "p2p host started");
        Ok(host)
    }

    async fn on_swarm_event<E>(&self, event: SwarmEvent<E>) {
        match event {
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                tracing::debug!(peer = %peer_id, "connection established");
                self.connected.write().await.insert(peer_id);
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } if num_established == 0 => {
                tracing::info!(peer = %peer_id, "connection closed");
                self.streams.write().await.retain(|_, stream| {
                    if stream.peer == peer_id {
                        stream.mark_closed();
                        return false;
                    }
                    true
                });
                self.connected.write().await.remove(&peer_id);
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!(%address, "listening");
                let mut list = self.listen_addrs.write().await;
                if !list.iter().any(|addr| addr == &address) {
                    list.push(address);
                }
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.listen_addrs.write().await.retain(|addr| addr != &address);
            }
            _ => {}
        }
    }

    async fn track(&self, peer: PeerId, protocol: &str, stream: libp2p::Stream) -> SharedStream {
        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let stream = Arc::new(Libp2pStream::new(id, protocol.to_string(), peer, stream));
        {
            let mut streams = self.streams.write().await;
            streams.retain(|_, stream| !stream.is_closed());
            streams.insert(id, stream.clone());
        }

        let stream: SharedStream = stream;
        self.publish(stream.clone()).await;
        stream
    }

    async fn publish(&self, stream: SharedStream) {
        let subscriber = match self.subscriber.lock() {
            Ok(subscriber) => subscriber.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(tx) = subscriber else {
            return;
        };
        if tx.send(stream).await.is_err() {
            tracing::debug!("stream subscriber went away");
            match self.subscriber.lock() {
                Ok(mut subscriber) => *subscriber = None,
                Err(poisoned) => *poisoned.into_inner() = None,
            }
        }
    }
}

/// libp2p requires protocol names to start with `/`; configured tags may not.
pub fn stream_protocol(tag: &str) -> Result<StreamProtocol> {
    let name = if tag.starts_with('/') {
        tag.to_string()
    } else {
        format!("/{tag}")
    };
    StreamProtocol::try_from_owned(name).map_err(|e| GatewayError::Config(e.to_string()))
}

#[async_trait]
impl StreamHost for SwarmHost {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    async fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.read().await.clone()
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.read().await.iter().copied().collect()
    }

    fn accept(&self, protocol: &str) -> Result<IncomingStreams> {
        if protocol != self.protocol {
            return Err(GatewayError::Config(format!(
                "host serves {}, not {protocol}",
                self.protocol
            )));
        }
        let (tx, rx) = mpsc::channel(16);
        match self.subscriber.lock() {
            Ok(mut subscriber) => *subscriber = Some(tx),
            Err(poisoned) => *poisoned.into_inner() = Some(tx),
        }
        Ok(rx)
    }

    async fn streams(&self) -> Vec<SharedStream> {
        let mut streams = self.streams.write().await;
        streams.retain(|_, stream| !stream.is_closed());
        streams
            .values()
            .map(|stream| stream.clone() as SharedStream)
            .collect()
    }

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<SharedStream> {
        let stream = self
            .control
            .clone()
            .open_stream(peer, stream_protocol(protocol)?)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(self.track(peer, protocol, stream).await)
    }
}
