//! Opaque tokens clients compare against their cached copy of an entity.

use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Changes whenever the entity it was derived for changes.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheToken(pub String);

impl CacheToken {
    /// Derive a token from entity identity and the mutation that produced it.
    pub fn derive(
        entity_type: &str,
        entity_id: &str,
        mutation_id: &TransactionId,
        version: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(entity_type.as_bytes());
        hasher.update([0]);
        hasher.update(entity_id.as_bytes());
        hasher.update([0]);
        hasher.update(mutation_id.as_str().as_bytes());
        hasher.update(version.to_le_bytes());
        let digest = hasher.finalize();
        CacheToken(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheToken({})", self.0)
    }
}

impl fmt::Display for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
