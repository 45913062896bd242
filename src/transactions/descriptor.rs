//! Transaction descriptors and hybrid-logical-clock ids.

use crate::error::{Result, SyncError};
use crate::types::TransactionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Concurrency metadata a client attaches to one field of a mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDescriptor {
    /// New version stamp, also the idempotency key.
    pub transaction_id: TransactionId,

    /// Originating client tab or instance.
    pub source_id: String,

    /// Target field; `None` for whole-entity create/delete.
    pub changed_field: Option<String>,

    /// Stamp the client believes is on `changed_field` (`None` = never written).
    pub expected_transaction_id: Option<TransactionId>,
}

impl TransactionDescriptor {
    /// Descriptor for a single-field update.
    pub fn field(
        transaction_id: impl Into<TransactionId>,
        source_id: impl Into<String>,
        field: impl Into<String>,
        expected: Option<TransactionId>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            source_id: source_id.into(),
            changed_field: Some(field.into()),
            expected_transaction_id: expected,
        }
    }

    /// Descriptor for a whole-entity create or delete.
    pub fn whole_entity(
        transaction_id: impl Into<TransactionId>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            source_id: source_id.into(),
            changed_field: None,
            expected_transaction_id: None,
        }
    }
}

/// Parsed hybrid-logical-clock transaction id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hlc {
    pub wall_ms: u64,
    pub logical: u32,
    pub node_id: String,
}

impl Hlc {
    /// Parse a `timestamp.logical.nodeId` id. The node id may itself contain dots.
    pub fn parse(id: &TransactionId) -> Result<Self> {
        let mut parts = id.as_str().splitn(3, '.');
        let (Some(wall), Some(logical), Some(node_id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SyncError::InvalidTransaction(format!(
                "transaction id {id} is not timestamp.logical.nodeId"
            )));
        };

        let wall_ms = wall.parse::<u64>().map_err(|_| {
            SyncError::InvalidTransaction(format!("bad timestamp in transaction id {id}"))
        })?;
        let logical = logical.parse::<u32>().map_err(|_| {
            SyncError::InvalidTransaction(format!("bad logical counter in transaction id {id}"))
        })?;
        if node_id.is_empty() {
            return Err(SyncError::InvalidTransaction(format!(
                "missing node id in transaction id {id}"
            )));
        }

        Ok(Self {
            wall_ms,
            logical,
            node_id: node_id.to_string(),
        })
    }

    pub fn to_transaction_id(&self) -> TransactionId {
        TransactionId(self.to_string())
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.wall_ms, self.logical, self.node_id)
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.wall_ms, self.logical, &self.node_id).cmp(&(
            other.wall_ms,
            other.logical,
            &other.node_id,
        ))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Remote ids more than this far ahead of local wall time are not observed.
pub const MAX_REMOTE_DRIFT_MS: u64 = 60_000;

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Issues monotonic transaction ids for server-originated mutations.
pub struct HlcClock {
    node_id: String,
    /// Highest (wall_ms, logical) issued or observed.
    last: Mutex<(u64, u32)>,
}

impl HlcClock {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            last: Mutex::new((0, 0)),
        }
    }

    /// Next id at the current wall time.
    pub fn now(&self) -> TransactionId {
        self.tick(wall_clock_ms())
    }

    /// Fold a remote id into the clock so later ids sort after it.
    ///
    /// Returns `false` when the remote wall time is more than
    /// [`MAX_REMOTE_DRIFT_MS`] ahead of local time; such ids are ignored.
    pub fn observe(&self, remote: &Hlc) -> bool {
        self.observe_at(remote, wall_clock_ms())
    }

    fn observe_at(&self, remote: &Hlc, local_ms: u64) -> bool {
        if remote.wall_ms > local_ms.saturating_add(MAX_REMOTE_DRIFT_MS) {
            tracing::warn!(
                remote = %remote,
                local_ms,
                "Ignoring transaction id too far ahead of local clock"
            );
            return false;
        }
        let mut last = self.last.lock();
        if (remote.wall_ms, remote.logical) > *last {
            *last = (remote.wall_ms, remote.logical);
        }
        true
    }

    fn tick(&self, wall_ms: u64) -> TransactionId {
        let mut last = self.last.lock();
        if wall_ms > last.0 {
            *last = (wall_ms, 0);
        } else if let Some(logical) = last.1.checked_add(1) {
            last.1 = logical;
        } else {
            // Logical counter exhausted: carry into the wall component
            *last = (last.0.saturating_add(1), 0);
        }

        Hlc {
            wall_ms: last.0,
            logical: last.1,
            node_id: self.node_id.clone(),
        }
        .to_transaction_id()
    }
}
