use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use libp2p::identity::{self, ed25519, secp256k1};
use libp2p::PeerId;

use crate::error::{GatewayError, Result};
use crate::interfaces::keys::PeerKeyResolver;

const ED25519_DER_PREFIX: &str = "302a300506032b6570032100";
const SECP256K1_DER_PREFIX: &str = "302d300706052b8104000a032200";
const IDENTITY_MULTIHASH_CODE: u8 = 0x00;

/// Resolves ledger-style hex public keys (secp256k1 or ed25519, raw or DER
/// wrapped) to libp2p peer ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexKeyResolver;

impl PeerKeyResolver for HexKeyResolver {
    fn peer_identifier(&self, public_key: &str) -> Result<String> {
        let key = decode_public_key(public_key)?;
        Ok(PeerId::from_public_key(&key).to_base58())
    }
}

pub fn decode_peer_id(identifier: &str) -> Result<PeerId> {
    PeerId::from_str(identifier).map_err(|e| GatewayError::Resolution(e.to_string()))
}

pub fn peer_id_from_public_key(public_key: &str) -> Result<PeerId> {
    let key = decode_public_key(public_key)?;
    Ok(PeerId::from_public_key(&key))
}

pub fn decode_public_key(public_key: &str) -> Result<identity::PublicKey> {
    let trimmed = public_key.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err(GatewayError::Resolution("public key is empty".to_string()));
    }

    let (raw_hex, der_kind) = if let Some(rest) = trimmed.strip_prefix(ED25519_DER_PREFIX) {
        (rest, Some(KeyKind::Ed25519))
    } else if let Some(rest) = trimmed.strip_prefix(SECP256K1_DER_PREFIX) {
        (rest, Some(KeyKind::Secp256k1))
    } else {
        (trimmed.as_str(), None)
    };

    let bytes = hex::decode(raw_hex).map_err(|e| GatewayError::Resolution(e.to_string()))?;
    let kind = match der_kind {
        Some(kind) => kind,
        None => match bytes.len() {
            32 => KeyKind::Ed25519,
            33 | 65 => KeyKind::Secp256k1,
            other => {
                return Err(GatewayError::Resolution(format!(
                    "unsupported public key length: {other} bytes"
                )))
            }
        },
    };

    match kind {
        KeyKind::Ed25519 => {
            let key = ed25519::PublicKey::try_from_bytes(&bytes)
                .map_err(|e| GatewayError::Resolution(e.to_string()))?;
            Ok(identity::PublicKey::from(key))
        }
        KeyKind::Secp256k1 => {
            let compressed = compress_secp256k1(&bytes)?;
            let key = secp256k1::PublicKey::try_from_bytes(&compressed)
                .map_err(|e| GatewayError::Resolution(e.to_string()))?;
            Ok(identity::PublicKey::from(key))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum KeyKind {
    Ed25519,
    Secp256k1,
}

fn compress_secp256k1(bytes: &[u8]) -> Result<Vec<u8>> {
    match bytes.len() {
        33 => Ok(bytes.to_vec()),
        65 if bytes[0] == 0x04 => {
            let parity = if bytes[64] & 1 == 0 { 0x02 } else { 0x03 };
            let mut compressed = Vec::with_capacity(33);
            compressed.push(parity);
            compressed.extend_from_slice(&bytes[1..33]);
            Ok(compressed)
        }
        other => Err(GatewayError::Resolution(format!(
            "malformed secp256k1 key ({other} bytes)"
        ))),
    }
}

/// Hex form of the public key embedded in `peer`, in the same encoding
/// [`decode_public_key`] accepts. Hashed peer ids carry no key and yield `None`.
pub fn sender_public_key(peer: &PeerId) -> Option<String> {
    let bytes = peer.to_bytes();
    if bytes.len() < 2 || bytes[0] != IDENTITY_MULTIHASH_CODE {
        return None;
    }
    let len = bytes[1] as usize;
    let digest = bytes.get(2..)?;
    if len >= 0x80 || digest.len() != len {
        return None;
    }

    let key = identity::PublicKey::try_decode_protobuf(digest).ok()?;
    let raw = match key.clone().try_into_secp256k1() {
        Ok(secp) => secp.to_bytes().to_vec(),
        Err(_) => key.try_into_ed25519().ok()?.to_bytes().to_vec(),
    };
    Some(hex::encode(raw))
}

/// Loads the node key at `path`, generating and persisting one only when the
/// file does not exist. An unreadable or corrupt key is a config error.
pub fn load_or_create_keypair(path: &str) -> Result<identity::Keypair> {
    match fs::read_to_string(path) {
        Ok(encoded) => {
            let raw = BASE64
                .decode(encoded.trim())
                .map_err(|e| GatewayError::Config(format!("node key {path}: {e}")))?;
            identity::Keypair::from_protobuf_encoding(&raw)
                .map_err(|e| GatewayError::Config(format!("node key {path}: {e}")))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = Path::new(path).parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| GatewayError::Config(format!("{}: {e}", parent.display())))?;
            }
            let keypair = identity::Keypair::generate_secp256k1();
            let raw = keypair
                .to_protobuf_encoding()
                .map_err(|e| GatewayError::Config(e.to_string()))?;
            fs::write(path, BASE64.encode(raw))
                .map_err(|e| GatewayError::Config(format!("node key {path}: {e}")))?;
            tracing::info!(path, "generated new node key");
            Ok(keypair)
        }
        Err(err) => Err(GatewayError::Config(format!("node key {path}: {err}"))),
    }
}
