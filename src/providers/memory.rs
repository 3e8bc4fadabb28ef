use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::domains::message::now_millis;
use crate::error::{GatewayError, Result};
use crate::interfaces::registry::{BufferHandle, PeerRegistry, PeerState};
use crate::interfaces::transport::{SharedStream, StreamHost};
use crate::services::identity::{peer_id_from_public_key, sender_public_key};

struct PeerEntry {
    stream: Option<SharedStream>,
    state: PeerState,
    control_ref: Option<String>,
    public_key: Option<String>,
    updated_at: i64,
}

impl PeerEntry {
    fn new(peer: &PeerId, stream: Option<SharedStream>, state: PeerState) -> Self {
        Self {
            stream,
            state,
            control_ref: None,
            public_key: sender_public_key(peer),
            updated_at: now_millis(),
        }
    }

    fn handle(&self, peer: PeerId) -> BufferHandle {
        BufferHandle {
            peer,
            stream: self.stream.clone(),
            control_ref: self.control_ref.clone(),
        }
    }
}

/// Process-local peer registry. One lock guards the whole table, so every
/// operation is atomic for its callers.
#[derive(Default)]
pub struct InMemoryPeerRegistry {
    peers: RwLock<HashMap<PeerId, PeerEntry>>,
    targets: RwLock<Vec<String>>,
}

impl InMemoryPeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            targets: RwLock::new(Vec::new()),
        }
    }

    /// Records the remote peer's out-of-band control reference, used when a
    /// write to that peer fails.
    pub async fn set_control_ref(&self, peer: PeerId, control_ref: impl Into<String>) {
        let mut peers = self.peers.write().await;
        let entry = peers
            .entry(peer)
            .or_insert_with(|| PeerEntry::new(&peer, None, PeerState::Pending));
        entry.control_ref = Some(control_ref.into());
        entry.updated_at = now_millis();
    }

    pub async fn state_of(&self, peer: &PeerId) -> Option<PeerState> {
        self.peers.read().await.get(peer).map(|entry| entry.state)
    }

    pub async fn targets(&self) -> Vec<String> {
        self.targets.read().await.clone()
    }

    async fn set_stream(&self, peer: PeerId, stream: SharedStream) {
        let mut peers = self.peers.write().await;
        let entry = peers
            .entry(peer)
            .or_insert_with(|| PeerEntry::new(&peer, None, PeerState::Pending));
        entry.stream = Some(stream);
        entry.state = PeerState::Connected;
        entry.updated_at = now_millis();
    }
}

#[async_trait]
impl PeerRegistry for InMemoryPeerRegistry {
    async fn lookup(&self, peer: &PeerId) -> Option<BufferHandle> {
        let peers = self.peers.read().await;
        let entry = peers.get(peer)?;
        if entry.stream.is_none() && entry.state == PeerState::Pending {
            return None;
        }
        Some(entry.handle(*peer))
    }

    async fn write_and_flush(
        &self,
        buffer: &BufferHandle,
        peer: &PeerId,
        bytes: &[u8],
        host: &dyn StreamHost,
        protocol: &str,
    ) -> Result<()> {
        let stream = match buffer.stream.as_ref().filter(|stream| !stream.is_closed()) {
            Some(stream) => stream.clone(),
            None => {
                tracing::info!(%peer, "no open stream, opening a new one");
                let stream = match host.open_stream(*peer, protocol).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        self.update_state(peer, PeerState::ConnectionLost).await;
                        return Err(GatewayError::Delivery(err.to_string()));
                    }
                };
                self.set_stream(*peer, stream.clone()).await;
                stream
            }
        };

        if let Err(err) = stream.write_all(bytes).await {
            self.update_state(peer, PeerState::WriteFailed).await;
            return Err(GatewayError::Delivery(err.to_string()));
        }
        Ok(())
    }

    async fn buffers(&self) -> HashMap<PeerId, BufferHandle> {
        let peers = self.peers.read().await;
        peers
            .iter()
            .map(|(peer, entry)| (*peer, entry.handle(*peer)))
            .collect()
    }

    async fn attach_stream(&self, peer: PeerId, stream: SharedStream) {
        tracing::debug!(%peer, stream = stream.id(), "binding stream to peer");
        self.set_stream(peer, stream).await;
    }

    async fn update_state(&self, peer: &PeerId, state: PeerState) {
        let mut peers = self.peers.write().await;
        if let Some(entry) = peers.get_mut(peer) {
            entry.state = state;
            entry.updated_at = now_millis();
        }
    }

    async fn replace_peer_set(
        &self,
        target_public_keys: &[String],
        host: &dyn StreamHost,
        reachable_addrs: &[Multiaddr],
        protocol: &str,
    ) -> Result<()> {
        let mut wanted = Vec::with_capacity(target_public_keys.len());
        for key in target_public_keys {
            let peer = peer_id_from_public_key(key)
                .map_err(|e| GatewayError::Command(format!("{key}: {e}")))?;
            wanted.push(peer);
        }
        let wanted_set: HashSet<PeerId> = wanted.iter().copied().collect();

        let dropped: Vec<SharedStream> = {
            let mut peers = self.peers.write().await;
            let stale: Vec<PeerId> = peers
                .keys()
                .filter(|peer| !wanted_set.contains(peer))
                .copied()
                .collect();
            stale
                .iter()
                .filter_map(|peer| peers.remove(peer).and_then(|entry| entry.stream))
                .collect()
        };
        for stream in dropped {
            stream.close().await;
        }

        let connected: HashSet<PeerId> = host.connected_peers().await.into_iter().collect();
        for peer in wanted {
            let has_stream = self
                .peers
                .read()
                .await
                .get(&peer)
                .and_then(|entry| entry.stream.as_ref())
                .is_some_and(|stream| !stream.is_closed());
            if has_stream {
                continue;
            }
            if connected.contains(&peer) {
                match host.open_stream(peer, protocol).await {
                    Ok(stream) => {
                        self.set_stream(peer, stream).await;
                        continue;
                    }
                    Err(err) => tracing::warn!(%peer, error = %err, "opening stream to seller failed"),
                }
            }
            self.peers
                .write()
                .await
                .entry(peer)
                .or_insert_with(|| PeerEntry::new(&peer, None, PeerState::Pending));
        }

        *self.targets.write().await = target_public_keys.to_vec();
        tracing::info!(
            peers = target_public_keys.len(),
            advertised = reachable_addrs.len(),
            "peer set replaced"
        );
        Ok(())
    }

    async fn detailed_status(&self, host: &dyn StreamHost) -> Value {
        let connected: HashSet<PeerId> = host.connected_peers().await.into_iter().collect();
        let listen: Vec<String> = host
            .listen_addrs()
            .await
            .iter()
            .map(|addr| addr.to_string())
            .collect();

        let targets = self.targets.read().await.clone();
        let peers = self.peers.read().await;
        let mut rows: Vec<(String, Value)> = peers
            .iter()
            .map(|(peer, entry)| {
                let id = peer.to_base58();
                let row = json!({
                    "peerId": id,
                    "publicKey": entry.public_key,
                    "state": entry.state.as_str(),
                    "connected": connected.contains(peer),
                    "hasStream": entry.stream.as_ref().is_some_and(|stream| !stream.is_closed()),
                    "controlRef": entry.control_ref,
                    "updatedAt": entry.updated_at,
                });
                (id, row)
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        json!({
            "localPeerId": host.local_peer_id().to_base58(),
            "listenAddrs": listen,
            "targets": targets,
            "peerCount": rows.len(),
            "peers": rows.into_iter().map(|(_, row)| row).collect::<Vec<_>>(),
        })
    }
}
