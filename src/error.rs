//! Error types for the sync engine.

use crate::transactions::FieldConflict;
use crate::types::{ActivityId, SubscriberId};
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more changed fields were written by another transaction.
    #[error("Field conflict on {entity_type}: {}", format_conflict_fields(.conflicts))]
    FieldConflict {
        entity_type: String,
        conflicts: Vec<FieldConflict>,
    },

    #[error("Malformed activity event {id}: {reason}")]
    MalformedActivityEvent { id: ActivityId, reason: String },

    #[error("Delivery to subscriber {subscriber} failed: {reason}")]
    DeliveryFailure {
        subscriber: SubscriberId,
        reason: String,
    },

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid stream request: {0}")]
    InvalidRequest(String),

    #[error("Activity {got} is not after journal head {last}")]
    OutOfOrder { last: ActivityId, got: ActivityId },

    #[error("Sync engine is shutting down")]
    ShuttingDown,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid journal format: {0}")]
    InvalidFormat(String),

    #[error("Journal is locked by another process")]
    Locked,
}

impl SyncError {
    /// Conflicting field names, if this is a field conflict.
    pub fn conflicting_fields(&self) -> Vec<&str> {
        match self {
            SyncError::FieldConflict { conflicts, .. } => {
                conflicts.iter().map(|c| c.field.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn format_conflict_fields(conflicts: &[FieldConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SyncError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SyncError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
