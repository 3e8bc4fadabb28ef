use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("client protocol error: {0}")]
    Protocol(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("peer resolution error: {0}")]
    Resolution(String),
    #[error("delivery error: {0}")]
    Delivery(String),
    #[error("command error: {0}")]
    Command(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl GatewayError {
    /// Protocol and transport failures end the session or stream they occur on;
    /// everything else is reported back to the client and the session continues.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GatewayError::Protocol(_) | GatewayError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
