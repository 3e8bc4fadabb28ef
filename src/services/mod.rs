pub mod channel;
pub mod commands;
pub mod dispatch;
pub mod identity;
pub mod ingress;
pub mod pipeline;
pub mod session;
pub mod swarm;
