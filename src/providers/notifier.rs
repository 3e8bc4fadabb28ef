use async_trait::async_trait;

use crate::interfaces::registry::{DeliveryMode, PeerNotifier, WriteErrorKind};

/// Reports write failures to the log only. Used when no ledger control
/// channel is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl PeerNotifier for LogNotifier {
    async fn notify_write_error(
        &self,
        control_ref: &str,
        kind: WriteErrorKind,
        message: &str,
        mode: DeliveryMode,
    ) {
        tracing::warn!(
            control_ref,
            kind = kind.as_str(),
            mode = mode.as_str(),
            message,
            "peer write error"
        );
    }
}
