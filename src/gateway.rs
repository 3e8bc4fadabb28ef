use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use libp2p::Multiaddr;
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::domains::Role;
use crate::error::{GatewayError, Result};
use crate::interfaces::transport::StreamHost;
use crate::providers::memory::InMemoryPeerRegistry;
use crate::providers::notifier::LogNotifier;
use crate::services::channel::{RelayChannel, RoleChannels};
use crate::services::identity::{load_or_create_keypair, HexKeyResolver};
use crate::services::pipeline::{run_pipeline, PipelineContext};
use crate::services::session::run_session;
use crate::services::swarm::SwarmHost;
use crate::shutdown::shutdown_channel;

#[derive(Clone)]
pub struct AppState {
    pub buyer: Arc<RoleChannels>,
    pub seller: Arc<RoleChannels>,
}

impl AppState {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            buyer: Arc::new(RoleChannels::new(channel_capacity)),
            seller: Arc::new(RoleChannels::new(channel_capacity)),
        }
    }

    pub fn channels(&self, role: Role) -> &Arc<RoleChannels> {
        match role {
            Role::Buyer => &self.buyer,
            Role::Seller => &self.seller,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/buyer/p2p", get(buyer_p2p))
        .route("/seller/p2p", get(seller_p2p))
        .route("/buyer/commands", get(buyer_commands))
        .route("/seller/commands", get(seller_commands))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn buyer_p2p(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let channels = state.buyer.clone();
    upgrade(ws, channels.to_p2p.clone(), channels.to_ws.clone(), "/buyer/p2p")
}

async fn seller_p2p(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let channels = state.seller.clone();
    upgrade(ws, channels.to_p2p.clone(), channels.to_ws.clone(), "/seller/p2p")
}

async fn buyer_commands(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let channels = state.buyer.clone();
    upgrade(
        ws,
        channels.commands.clone(),
        channels.responses.clone(),
        "/buyer/commands",
    )
}

async fn seller_commands(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let channels = state.seller.clone();
    upgrade(
        ws,
        channels.commands.clone(),
        channels.responses.clone(),
        "/seller/commands",
    )
}

fn upgrade(
    ws: WebSocketUpgrade,
    inbound: RelayChannel,
    outbound: RelayChannel,
    route: &'static str,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, inbound.sender(), outbound, route))
        .into_response()
}

pub async fn serve_with_shutdown<F>(addr: &str, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::Runtime(format!("listen on {addr}: {e}")))?;
    tracing::info!(%addr, "starting websocket server");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GatewayError::Runtime(e.to_string()))
}

/// Starts the p2p host, the configured role's relay pipeline and the
/// WebSocket server, and runs until Ctrl-C or SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<()> {
    run_with_shutdown(config, wait_for_signal()).await
}

pub async fn run_with_shutdown<F>(config: GatewayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;

    let listen = parse_multiaddrs(&config.p2p.listen)?;
    let bootstrap = parse_multiaddrs(&config.p2p.bootstrap)?;
    let keypair = load_or_create_keypair(&config.p2p.key_path)?;

    let (trigger, cancel) = shutdown_channel();
    let host: Arc<dyn StreamHost> = Arc::new(
        SwarmHost::start(keypair, listen, bootstrap, &config.protocol, cancel.clone()).await?,
    );

    let state = AppState::new(config.relay.channel_capacity);
    let context = PipelineContext {
        host,
        registry: Arc::new(InMemoryPeerRegistry::new()),
        notifier: Arc::new(LogNotifier),
        resolver: Arc::new(HexKeyResolver),
        protocol: config.protocol.clone(),
        relay: config.relay.clone(),
    };

    let pipeline = run_pipeline(
        config.role,
        cancel,
        &context,
        state.channels(config.role),
    )?;

    let server_shutdown = async move {
        shutdown.await;
        trigger.trigger();
    };
    let served = serve_with_shutdown(&config.ws_addr(), state, server_shutdown).await;

    pipeline.abort();
    served
}

fn parse_multiaddrs(raw: &[String]) -> Result<Vec<Multiaddr>> {
    raw.iter()
        .map(|addr| {
            addr.parse::<Multiaddr>()
                .map_err(|e| GatewayError::Config(format!("{addr}: {e}")))
        })
        .collect()
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            let _ = tokio::signal::ctrl_c().await;
            return;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl-C, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl-C, shutting down");
    }
}
