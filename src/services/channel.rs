use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::domains::Envelope;

/// Bounded envelope channel that outlives any single session.
///
/// Any number of producers hold senders; consumers compete for the receiver,
/// so each message reaches exactly one of them. Messages are not replayed to
/// later consumers.
#[derive(Clone)]
pub struct RelayChannel {
    tx: mpsc::Sender<Envelope>,
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
}

impl RelayChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.tx.clone()
    }

    /// Cancel-safe: dropping the future loses no message.
    pub async fn recv(&self) -> Option<Envelope> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

/// The four channels of one role: payload relay in both directions, plus the
/// command channel pair that never shares a queue with payloads.
#[derive(Clone)]
pub struct RoleChannels {
    /// WebSocket → peers.
    pub to_p2p: RelayChannel,
    /// Peers → WebSocket.
    pub to_ws: RelayChannel,
    pub commands: RelayChannel,
    pub responses: RelayChannel,
}

impl RoleChannels {
    pub fn new(capacity: usize) -> Self {
        Self {
            to_p2p: RelayChannel::new(capacity),
            to_ws: RelayChannel::new(capacity),
            commands: RelayChannel::new(capacity),
            responses: RelayChannel::new(capacity),
        }
    }
}
