use crate::error::Result;

/// Deterministic, one-way mapping from a client-facing public key to the
/// textual network peer identifier.
pub trait PeerKeyResolver: Send + Sync {
    fn peer_identifier(&self, public_key: &str) -> Result<String>;
}
