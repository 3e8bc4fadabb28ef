use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::{Multiaddr, PeerId};
use tokio::sync::mpsc;

use crate::error::Result;

pub type StreamId = u64;

pub type SharedStream = Arc<dyn PeerStream>;

/// Newly opened inbound streams for one protocol, in arrival order.
pub type IncomingStreams = mpsc::Receiver<SharedStream>;

/// One multiplexed stream to a remote peer.
///
/// Reads and writes go through `&self` so a read loop and a writer can share
/// the stream; implementations keep the halves behind their own locks.
#[async_trait]
pub trait PeerStream: Send + Sync {
    fn id(&self) -> StreamId;
    fn protocol(&self) -> &str;
    fn remote_peer(&self) -> PeerId;
    fn is_closed(&self) -> bool;

    /// Best-effort read bounded by `deadline`. An expired deadline surfaces
    /// as `io::ErrorKind::TimedOut`.
    async fn read(&self, buf: &mut [u8], deadline: Duration) -> io::Result<usize>;

    /// Writes all bytes and flushes.
    async fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    async fn close(&self);
}

#[async_trait]
pub trait StreamHost: Send + Sync {
    fn local_peer_id(&self) -> PeerId;

    async fn listen_addrs(&self) -> Vec<Multiaddr>;

    async fn connected_peers(&self) -> Vec<PeerId>;

    /// Subscribes to the protocol the host serves: every stream on it, opened
    /// by a remote peer or locally, is delivered once on the returned channel.
    /// A later call replaces the earlier subscriber.
    fn accept(&self, protocol: &str) -> Result<IncomingStreams>;

    /// Every stream currently open on any connection, regardless of protocol.
    async fn streams(&self) -> Vec<SharedStream>;

    async fn open_stream(&self, peer: PeerId, protocol: &str) -> Result<SharedStream>;
}

pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
