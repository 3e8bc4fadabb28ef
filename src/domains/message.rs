use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const KIND_P2P: &str = "p2p";
pub const KIND_P2P_BINARY: &str = "p2pBinary";
pub const KIND_SUCCESS: &str = "success";
pub const KIND_ERROR: &str = "error";
pub const KIND_REPLACE_SELLERS: &str = "replaceSellers";
pub const KIND_SHOW_CURRENT_PEERS: &str = "showCurrentPeers";
pub const KIND_CURRENT_PEERS: &str = "currentPeers";

/// JSON unit exchanged with the local WebSocket client.
///
/// `kind` decides which optional fields carry meaning: relay messages use
/// `public_key` for the target (outbound) or the sender (inbound), error
/// envelopes set `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: now_millis(),
            public_key: None,
            error: None,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: Some(code.as_str().to_string()),
            ..Self::new(KIND_ERROR, Value::String(message.into()))
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(KIND_SUCCESS, Value::String(message.into()))
    }

    /// Wraps a chunk read from a peer stream. Text stays text; anything that is
    /// not UTF-8 is base64-encoded under a separate kind so no byte is lost.
    pub fn from_stream_chunk(chunk: &[u8], sender: Option<String>, timestamp: i64) -> Self {
        let (kind, data) = match std::str::from_utf8(chunk) {
            Ok(text) => (KIND_P2P, Value::String(text.to_string())),
            Err(_) => (KIND_P2P_BINARY, Value::String(BASE64.encode(chunk))),
        };
        Self {
            kind: kind.to_string(),
            data,
            timestamp,
            public_key: sender.filter(|key| !key.is_empty()),
            error: None,
        }
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    /// Target key of an outbound message, treating an empty string as absent.
    pub fn target(&self) -> Option<&str> {
        self.public_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Payload as text: strings verbatim, other JSON values serialised compactly.
    pub fn payload_text(&self) -> String {
        match &self.data {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_deref().and_then(ErrorCode::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    MissingPublicKey,
    InvalidPublicKey,
    PeerIdDecodeError,
    PeerNotFound,
    SendError,
    ParseError,
    BuyerOnlyOperation,
    NoAddresses,
    ReplaceError,
    UnknownCommand,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingPublicKey => "MISSING_PUBLIC_KEY",
            ErrorCode::InvalidPublicKey => "INVALID_PUBLIC_KEY",
            ErrorCode::PeerIdDecodeError => "PEER_ID_DECODE_ERROR",
            ErrorCode::PeerNotFound => "PEER_NOT_FOUND",
            ErrorCode::SendError => "SEND_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::BuyerOnlyOperation => "BUYER_ONLY_OPERATION",
            ErrorCode::NoAddresses => "NO_ADDRESSES",
            ErrorCode::ReplaceError => "REPLACE_ERROR",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let code = match value {
            "MISSING_PUBLIC_KEY" => ErrorCode::MissingPublicKey,
            "INVALID_PUBLIC_KEY" => ErrorCode::InvalidPublicKey,
            "PEER_ID_DECODE_ERROR" => ErrorCode::PeerIdDecodeError,
            "PEER_NOT_FOUND" => ErrorCode::PeerNotFound,
            "SEND_ERROR" => ErrorCode::SendError,
            "PARSE_ERROR" => ErrorCode::ParseError,
            "BUYER_ONLY_OPERATION" => ErrorCode::BuyerOnlyOperation,
            "NO_ADDRESSES" => ErrorCode::NoAddresses,
            "REPLACE_ERROR" => ErrorCode::ReplaceError,
            "UNKNOWN_COMMAND" => ErrorCode::UnknownCommand,
            _ => return None,
        };
        Some(code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceSellersRequest {
    #[serde(rename = "sellerPublicKeys")]
    pub seller_public_keys: Vec<String>,
}

impl ReplaceSellersRequest {
    /// Accepts the request either as a JSON-encoded string (what existing
    /// clients send) or as an inline object.
    pub fn from_data(data: &Value) -> serde_json::Result<Self> {
        match data {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        }
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
