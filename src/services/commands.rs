use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domains::message::{KIND_CURRENT_PEERS, KIND_REPLACE_SELLERS, KIND_SHOW_CURRENT_PEERS};
use crate::domains::{Envelope, ErrorCode, ReplaceSellersRequest, Role};
use crate::interfaces::registry::PeerRegistry;
use crate::interfaces::transport::StreamHost;
use crate::services::channel::RelayChannel;
use crate::shutdown::Shutdown;

/// Control operations for one role. Runs on its own channel pair so peer-set
/// management is never queued behind payload traffic.
pub struct CommandProcessor {
    role: Role,
    host: Arc<dyn StreamHost>,
    registry: Arc<dyn PeerRegistry>,
    protocol: String,
}

impl CommandProcessor {
    pub fn new(
        role: Role,
        host: Arc<dyn StreamHost>,
        registry: Arc<dyn PeerRegistry>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            role,
            host,
            registry,
            protocol: protocol.into(),
        }
    }

    pub async fn run(
        self,
        commands: RelayChannel,
        responses: mpsc::Sender<Envelope>,
        mut shutdown: Shutdown,
    ) {
        loop {
            if shutdown.is_triggered() {
                return;
            }
            let command = tokio::select! {
                _ = shutdown.wait() => return,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => return,
                },
            };
            let reply = self.handle(command).await;
            if responses.send(reply).await.is_err() {
                tracing::warn!(role = %self.role, "command response channel closed");
                return;
            }
        }
    }

    pub async fn handle(&self, command: Envelope) -> Envelope {
        match command.kind.as_str() {
            KIND_REPLACE_SELLERS => self.replace_sellers(&command).await,
            KIND_SHOW_CURRENT_PEERS => {
                let status = self.registry.detailed_status(self.host.as_ref()).await;
                Envelope::new(KIND_CURRENT_PEERS, status)
            }
            other => Envelope::error(
                ErrorCode::UnknownCommand,
                format!("Unknown command type: {other}"),
            ),
        }
    }

    async fn replace_sellers(&self, command: &Envelope) -> Envelope {
        let request = match ReplaceSellersRequest::from_data(&command.data) {
            Ok(request) => request,
            Err(err) => {
                return Envelope::error(
                    ErrorCode::ParseError,
                    format!("Error parsing replaceSellers request: {err}"),
                )
            }
        };

        if !self.role.can_replace_sellers() {
            return Envelope::error(
                ErrorCode::BuyerOnlyOperation,
                "replaceSellers is a buyer-only operation. Sellers cannot manage seller lists.",
            );
        }

        tracing::info!(
            count = request.seller_public_keys.len(),
            "received replaceSellers request"
        );

        let addrs = self.host.listen_addrs().await;
        if addrs.is_empty() {
            return Envelope::error(ErrorCode::NoAddresses, "No reachable addresses available");
        }

        if let Err(err) = self
            .registry
            .replace_peer_set(
                &request.seller_public_keys,
                self.host.as_ref(),
                &addrs,
                &self.protocol,
            )
            .await
        {
            return Envelope::error(
                ErrorCode::ReplaceError,
                format!("Error replacing sellers: {err}"),
            );
        }

        Envelope::success(format!(
            "Successfully replaced sellers with {} new sellers",
            request.seller_public_keys.len()
        ))
    }
}
