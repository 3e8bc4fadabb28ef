use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::domains::message::now_millis;
use crate::domains::Envelope;
use crate::error::Result;
use crate::interfaces::registry::{PeerRegistry, PeerState};
use crate::interfaces::transport::{is_timeout, SharedStream, StreamHost, StreamId};
use crate::services::identity::sender_public_key;
use crate::shutdown::Shutdown;

#[derive(Debug)]
pub enum ReadLoopExit {
    /// The connection under the stream reported closed.
    Closed,
    /// A read failed with something other than a timeout.
    Failed(io::Error),
    /// Nobody consumes the outbound channel any more.
    Detached,
    Cancelled,
}

/// Stream ids that currently have a read loop attached.
///
/// Entries outlive their loop: an exited stream stays marked until the host
/// stops listing it, so a dead stream is never attached twice.
#[derive(Clone, Default)]
pub struct BoundStreams {
    ids: Arc<Mutex<HashSet<StreamId>>>,
}

impl BoundStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id was already bound.
    pub fn bind(&self, id: StreamId) -> bool {
        match self.ids.lock() {
            Ok(mut ids) => ids.insert(id),
            Err(poisoned) => poisoned.into_inner().insert(id),
        }
    }

    /// Forgets every id not in `live`.
    pub fn retain_live(&self, live: &HashSet<StreamId>) {
        let mut ids = match self.ids.lock() {
            Ok(ids) => ids,
            Err(poisoned) => poisoned.into_inner(),
        };
        ids.retain(|id| live.contains(id));
    }

    pub fn len(&self) -> usize {
        match self.ids.lock() {
            Ok(ids) => ids.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads peer streams and forwards every chunk to the WebSocket side.
#[derive(Clone)]
pub struct StreamIngress {
    registry: Arc<dyn PeerRegistry>,
    outbound: mpsc::Sender<Envelope>,
    relay: RelayConfig,
    bound: BoundStreams,
}

impl StreamIngress {
    pub fn new(
        registry: Arc<dyn PeerRegistry>,
        outbound: mpsc::Sender<Envelope>,
        relay: RelayConfig,
    ) -> Self {
        Self {
            registry,
            outbound,
            relay,
            bound: BoundStreams::new(),
        }
    }

    pub fn bound_streams(&self) -> &BoundStreams {
        &self.bound
    }

    /// Spawns a read loop for `stream` unless one was already attached.
    pub fn attach(&self, stream: SharedStream, shutdown: Shutdown) -> Option<JoinHandle<ReadLoopExit>> {
        if !self.bound.bind(stream.id()) {
            return None;
        }
        Some(self.spawn_reader(stream, shutdown))
    }

    // Passive streams arrive exactly once, so they skip the bound set.
    fn spawn_reader(&self, stream: SharedStream, shutdown: Shutdown) -> JoinHandle<ReadLoopExit> {
        let ingress = self.clone();
        tokio::spawn(async move {
            ingress
                .registry
                .attach_stream(stream.remote_peer(), stream.clone())
                .await;
            ingress.read_loop(stream, shutdown).await
        })
    }

    /// Buyer acquisition: the host hands over each inbound stream once.
    pub fn listen_passive(
        &self,
        host: &dyn StreamHost,
        protocol: &str,
        mut shutdown: Shutdown,
    ) -> Result<JoinHandle<()>> {
        tracing::info!(protocol, "setting up stream handler");
        let mut incoming = host.accept(protocol)?;
        let ingress = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => return,
                    stream = incoming.recv() => {
                        let Some(stream) = stream else {
                            tracing::info!("stream handler closed by host");
                            return;
                        };
                        ingress.spawn_reader(stream, shutdown.clone());
                    }
                }
            }
        }))
    }

    /// Seller acquisition: every poll interval, attach to each listed stream
    /// that speaks `protocol` and has no reader yet.
    pub fn poll_active(
        &self,
        host: Arc<dyn StreamHost>,
        protocol: &str,
        mut shutdown: Shutdown,
    ) -> JoinHandle<()> {
        let ingress = self.clone();
        let protocol = protocol.to_string();
        let period = self.relay.poll_interval();
        tokio::spawn(async move {
            loop {
                if shutdown.is_triggered() {
                    return;
                }
                ingress.poll_once(host.as_ref(), &protocol, &shutdown).await;
                tokio::select! {
                    _ = shutdown.wait() => return,
                    _ = tokio::time::sleep(period) => {}
                }
            }
        })
    }

    /// One enumeration pass; returns how many new read loops were attached.
    pub async fn poll_once(
        &self,
        host: &dyn StreamHost,
        protocol: &str,
        shutdown: &Shutdown,
    ) -> usize {
        let streams = host.streams().await;
        let live: HashSet<StreamId> = streams.iter().map(|stream| stream.id()).collect();
        self.bound.retain_live(&live);

        let mut attached = 0;
        for stream in streams {
            if stream.protocol() != protocol {
                continue;
            }
            if self.attach(stream, shutdown.clone()).is_some() {
                attached += 1;
            }
        }
        attached
    }

    pub async fn read_loop(&self, stream: SharedStream, shutdown: Shutdown) -> ReadLoopExit {
        let peer = stream.remote_peer();
        let stream_id = stream.id();
        let sender = sender_public_key(&peer);
        if sender.is_none() {
            tracing::warn!(%peer, "cannot derive public key from peer id, forwarding unattributed");
        }
        tracing::info!(%peer, stream = stream_id, "stream established");

        let deadline = self.relay.read_deadline();
        let backoff = self.relay.timeout_backoff();
        let mut buffer = vec![0u8; self.relay.read_buffer_size.max(1)];
        let mut last_timestamp = i64::MIN;

        let exit = loop {
            if shutdown.is_triggered() {
                break ReadLoopExit::Cancelled;
            }
            if stream.is_closed() {
                tracing::info!(%peer, stream = stream_id, "stream closed");
                self.registry
                    .update_state(&peer, PeerState::ConnectionLost)
                    .await;
                break ReadLoopExit::Closed;
            }

            match stream.read(&mut buffer, deadline).await {
                Ok(0) => {
                    tokio::time::sleep(backoff).await;
                }
                Ok(n) => {
                    tracing::debug!(%peer, stream = stream_id, bytes = n, "received chunk");
                    last_timestamp = now_millis().max(last_timestamp);
                    let envelope =
                        Envelope::from_stream_chunk(&buffer[..n], sender.clone(), last_timestamp);
                    if self.outbound.send(envelope).await.is_err() {
                        break ReadLoopExit::Detached;
                    }
                }
                Err(err) if is_timeout(&err) => {
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    tracing::warn!(%peer, stream = stream_id, error = %err, "error reading from stream");
                    break ReadLoopExit::Failed(err);
                }
            }
        };

        stream.close().await;
        exit
    }
}
