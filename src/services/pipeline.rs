use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::domains::Role;
use crate::error::Result;
use crate::interfaces::keys::PeerKeyResolver;
use crate::interfaces::registry::{PeerNotifier, PeerRegistry};
use crate::interfaces::transport::StreamHost;
use crate::services::channel::RoleChannels;
use crate::services::commands::CommandProcessor;
use crate::services::dispatch::OutboundDispatcher;
use crate::services::ingress::StreamIngress;
use crate::shutdown::Shutdown;

/// Everything a role pipeline consumes from the outside.
#[derive(Clone)]
pub struct PipelineContext {
    pub host: Arc<dyn StreamHost>,
    pub registry: Arc<dyn PeerRegistry>,
    pub notifier: Arc<dyn PeerNotifier>,
    pub resolver: Arc<dyn PeerKeyResolver>,
    pub protocol: String,
    pub relay: RelayConfig,
}

/// Tasks spawned for one role.
pub struct RolePipeline {
    pub role: Role,
    pub ingress: StreamIngress,
    tasks: Vec<JoinHandle<()>>,
}

impl RolePipeline {
    /// Waits until every task of the role has returned.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!(role = %self.role, error = %err, "pipeline task failed");
            }
        }
    }

    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub fn run_buyer_pipeline(
    shutdown: Shutdown,
    context: &PipelineContext,
    channels: &RoleChannels,
) -> Result<RolePipeline> {
    run_pipeline(Role::Buyer, shutdown, context, channels)
}

pub fn run_seller_pipeline(
    shutdown: Shutdown,
    context: &PipelineContext,
    channels: &RoleChannels,
) -> Result<RolePipeline> {
    run_pipeline(Role::Seller, shutdown, context, channels)
}

pub fn run_pipeline(
    role: Role,
    shutdown: Shutdown,
    context: &PipelineContext,
    channels: &RoleChannels,
) -> Result<RolePipeline> {
    tracing::info!(%role, protocol = %context.protocol, "starting relay pipeline");
    let ingress = StreamIngress::new(
        context.registry.clone(),
        channels.to_ws.sender(),
        context.relay.clone(),
    );

    let mut tasks = Vec::with_capacity(3);
    if role.acquires_passively() {
        tasks.push(ingress.listen_passive(
            context.host.as_ref(),
            &context.protocol,
            shutdown.clone(),
        )?);
    } else {
        tasks.push(ingress.poll_active(context.host.clone(), &context.protocol, shutdown.clone()));
    }

    let dispatcher = OutboundDispatcher::new(
        context.host.clone(),
        context.registry.clone(),
        context.notifier.clone(),
        context.resolver.clone(),
        context.protocol.clone(),
    );
    tasks.push(tokio::spawn(dispatcher.run(
        channels.to_p2p.clone(),
        channels.to_ws.sender(),
        shutdown.clone(),
    )));

    let commands = CommandProcessor::new(
        role,
        context.host.clone(),
        context.registry.clone(),
        context.protocol.clone(),
    );
    tasks.push(tokio::spawn(commands.run(
        channels.commands.clone(),
        channels.responses.sender(),
        shutdown,
    )));

    Ok(RolePipeline {
        role,
        ingress,
        tasks,
    })
}
