pub mod config;
pub mod domains;
pub mod error;
pub mod gateway;
pub mod interfaces;
pub mod providers;
pub mod services;
pub mod shutdown;

pub use crate::config::GatewayConfig;
pub use crate::domains::{Envelope, ErrorCode, Role};
pub use crate::error::{GatewayError, Result};
pub use crate::services::channel::{RelayChannel, RoleChannels};
pub use crate::services::pipeline::{run_buyer_pipeline, run_seller_pipeline, PipelineContext};
