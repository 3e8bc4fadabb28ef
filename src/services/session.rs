use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::domains::Envelope;
use crate::error::{GatewayError, Result};
use crate::services::channel::RelayChannel;

/// Drives one WebSocket connection until the first failure in either
/// direction: decoded client envelopes go to `inbound`, envelopes taken from
/// `outbound` are written back to the client.
pub async fn run_session(
    socket: WebSocket,
    inbound: mpsc::Sender<Envelope>,
    outbound: RelayChannel,
    route: &'static str,
) {
    tracing::info!(route, "websocket session opened");
    let (mut sink, mut stream) = socket.split();

    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let envelope = match frame {
                Ok(message) => match decode_frame(message) {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => continue,
                    Err(err) => return err,
                },
                Err(err) => return GatewayError::Transport(err.to_string()),
            };
            if inbound.send(envelope).await.is_err() {
                return GatewayError::Runtime("relay channel closed".to_string());
            }
        }
        GatewayError::Transport("connection closed by client".to_string())
    });

    loop {
        tokio::select! {
            ended = &mut reader => {
                match ended {
                    Ok(err) => tracing::info!(route, reason = %err, "websocket reader finished"),
                    Err(err) => tracing::warn!(route, error = %err, "websocket reader task failed"),
                }
                break;
            }
            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                if let Err(err) = send_envelope(&mut sink, &envelope).await {
                    tracing::warn!(route, error = %err, "error writing message");
                    break;
                }
            }
        }
    }

    reader.abort();
    let _ = sink.close().await;
    tracing::info!(route, "websocket session closed");
}

/// `Ok(None)` for control frames that carry no envelope.
fn decode_frame(message: Message) -> Result<Option<Envelope>> {
    let envelope = match message {
        Message::Text(text) => serde_json::from_str(&text),
        Message::Binary(bytes) => serde_json::from_slice(&bytes),
        Message::Ping(_) | Message::Pong(_) => return Ok(None),
        Message::Close(_) => {
            return Err(GatewayError::Transport("close frame received".to_string()))
        }
    };
    envelope
        .map(Some)
        .map_err(|e| GatewayError::Protocol(e.to_string()))
}

async fn send_envelope<S>(sink: &mut S, envelope: &Envelope) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text =
        serde_json::to_string(envelope).map_err(|e| GatewayError::Serialization(e.to_string()))?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))
}
