//! Read access to the activity log for catch-up.

use crate::activity::ActivityEvent;
use crate::error::{Result, SyncError};
use crate::types::ActivityId;
use parking_lot::RwLock;

/// The durable activity log, seen read-only by the engine.
pub trait ActivitySource: Send + Sync {
    /// Up to `limit` events strictly after `after` (from the start when `None`),
    /// in log order.
    fn read_after(&self, after: Option<&ActivityId>, limit: usize) -> Result<Vec<ActivityEvent>>;

    /// Id of the newest event, if any.
    fn head(&self) -> Result<Option<ActivityId>>;
}

/// Activity log held in memory.
pub struct InMemoryActivityLog {
    events: RwLock<Vec<ActivityEvent>>,
}

impl InMemoryActivityLog {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    /// Append an event. Ids must increase.
    pub fn append(&self, event: ActivityEvent) -> Result<()> {
        let mut events = self.events.write();
        if let Some(last) = events.last() {
            if event.id <= last.id {
                return Err(SyncError::OutOfOrder {
                    last: last.id.clone(),
                    got: event.id,
                });
            }
        }
        events.push(event);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl Default for InMemoryActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivitySource for InMemoryActivityLog {
    fn read_after(&self, after: Option<&ActivityId>, limit: usize) -> Result<Vec<ActivityEvent>> {
        let events = self.events.read();
        let start = match after {
            Some(after) => events.partition_point(|e| &e.id <= after),
            None => 0,
        };
        Ok(events.iter().skip(start).take(limit).cloned().collect())
    }

    fn head(&self) -> Result<Option<ActivityId>> {
        Ok(self.events.read().last().map(|e| e.id.clone()))
    }
}
