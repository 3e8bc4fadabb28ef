use std::collections::HashMap;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use serde_json::Value;

use crate::error::Result;
use crate::interfaces::transport::{SharedStream, StreamHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    Pending,
    ConnectionLost,
    WriteFailed,
}

impl PeerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Connected => "connected",
            PeerState::Pending => "pending",
            PeerState::ConnectionLost => "connection_lost",
            PeerState::WriteFailed => "write_failed",
        }
    }
}

/// Live binding handed out by the registry. Only the registry interprets the
/// stream; callers pass the handle back into [`PeerRegistry::write_and_flush`].
#[derive(Clone)]
pub struct BufferHandle {
    pub peer: PeerId,
    pub stream: Option<SharedStream>,
    /// Out-of-band control channel of the remote peer, used to report write
    /// failures it cannot observe itself.
    pub control_ref: Option<String>,
}

/// Tracks which peers have a live stream. Every method is atomic with respect
/// to concurrent callers.
#[async_trait]
pub trait PeerRegistry: Send + Sync {
    async fn lookup(&self, peer: &PeerId) -> Option<BufferHandle>;

    async fn write_and_flush(
        &self,
        buffer: &BufferHandle,
        peer: &PeerId,
        bytes: &[u8],
        host: &dyn StreamHost,
        protocol: &str,
    ) -> Result<()>;

    async fn buffers(&self) -> HashMap<PeerId, BufferHandle>;

    async fn attach_stream(&self, peer: PeerId, stream: SharedStream);

    async fn update_state(&self, peer: &PeerId, state: PeerState);

    async fn replace_peer_set(
        &self,
        target_public_keys: &[String],
        host: &dyn StreamHost,
        reachable_addrs: &[Multiaddr],
        protocol: &str,
    ) -> Result<()>;

    async fn detailed_status(&self, host: &dyn StreamHost) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    WriteError,
}

impl WriteErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteErrorKind::WriteError => "write_error",
        }
    }
}

/// What the remote side should do after it learns about the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    SendFreshRequest,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::SendFreshRequest => "send_fresh_request",
        }
    }
}

#[async_trait]
pub trait PeerNotifier: Send + Sync {
    async fn notify_write_error(
        &self,
        control_ref: &str,
        kind: WriteErrorKind,
        message: &str,
        mode: DeliveryMode,
    );
}
