use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domains::{Envelope, ErrorCode};
use crate::interfaces::keys::PeerKeyResolver;
use crate::interfaces::registry::{DeliveryMode, PeerNotifier, PeerRegistry, WriteErrorKind};
use crate::interfaces::transport::StreamHost;
use crate::services::channel::RelayChannel;
use crate::services::identity::decode_peer_id;
use crate::shutdown::Shutdown;

const MESSAGE_DELIMITER: u8 = b'\n';

/// Delivers client envelopes to peers, one at a time in arrival order, and
/// answers each with exactly one success or error envelope.
pub struct OutboundDispatcher {
    host: Arc<dyn StreamHost>,
    registry: Arc<dyn PeerRegistry>,
    notifier: Arc<dyn PeerNotifier>,
    resolver: Arc<dyn PeerKeyResolver>,
    protocol: String,
}

impl OutboundDispatcher {
    pub fn new(
        host: Arc<dyn StreamHost>,
        registry: Arc<dyn PeerRegistry>,
        notifier: Arc<dyn PeerNotifier>,
        resolver: Arc<dyn PeerKeyResolver>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            host,
            registry,
            notifier,
            resolver,
            protocol: protocol.into(),
        }
    }

    pub async fn run(
        self,
        inbound: RelayChannel,
        responses: mpsc::Sender<Envelope>,
        mut shutdown: Shutdown,
    ) {
        loop {
            if shutdown.is_triggered() {
                return;
            }
            let envelope = tokio::select! {
                _ = shutdown.wait() => return,
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => return,
                },
            };
            let reply = self.dispatch(envelope).await;
            if responses.send(reply).await.is_err() {
                tracing::warn!("response channel closed, stopping dispatcher");
                return;
            }
        }
    }

    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        let Some(target) = envelope.target() else {
            return Envelope::error(
                ErrorCode::MissingPublicKey,
                "No target public key specified in message",
            );
        };
        tracing::debug!(public_key = target, len = target.len(), "received target public key");

        let identifier = match self.resolver.peer_identifier(target) {
            Ok(identifier) => identifier,
            Err(err) => {
                return Envelope::error(
                    ErrorCode::InvalidPublicKey,
                    format!("Error converting public key: {err}"),
                )
            }
        };

        let peer = match decode_peer_id(&identifier) {
            Ok(peer) => peer,
            Err(err) => {
                return Envelope::error(
                    ErrorCode::PeerIdDecodeError,
                    format!("Error decoding peer ID: {err}"),
                )
            }
        };
        tracing::debug!(public_key = target, %peer, "resolved target peer");

        if tracing::enabled!(tracing::Level::DEBUG) {
            for known in self.registry.buffers().await.keys() {
                tracing::debug!(peer = %known, "available registry entry");
            }
        }

        let Some(buffer) = self.registry.lookup(&peer).await else {
            return Envelope::error(
                ErrorCode::PeerNotFound,
                format!("No buffer found for peer {target}"),
            );
        };

        let payload = envelope.payload_text();
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.extend_from_slice(payload.as_bytes());
        bytes.push(MESSAGE_DELIMITER);

        tracing::info!(public_key = target, %peer, bytes = bytes.len(), "sending message to peer");
        if let Err(err) = self
            .registry
            .write_and_flush(&buffer, &peer, &bytes, self.host.as_ref(), &self.protocol)
            .await
        {
            tracing::warn!(%peer, error = %err, "write to peer failed");
            match buffer.control_ref.as_deref() {
                Some(control_ref) => {
                    let message = format!("Failed to send message: {err}{payload}\n");
                    self.notifier
                        .notify_write_error(
                            control_ref,
                            WriteErrorKind::WriteError,
                            &message,
                            DeliveryMode::SendFreshRequest,
                        )
                        .await;
                }
                None => tracing::debug!(%peer, "peer has no control channel to notify"),
            }
            return Envelope::error(
                ErrorCode::SendError,
                format!("Error sending to peer {target}: {err}"),
            );
        }

        Envelope::success(format!("Successfully sent message to peer {target}"))
            .with_public_key(target)
    }
}
