//! Bounded memory of applied transaction ids.

use crate::types::TransactionId;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Remembers recently applied transaction ids so a retried mutation
/// can be recognized as a replay instead of a second write.
pub struct TransactionLedger {
    seen: Mutex<LruCache<TransactionId, ()>>,
}

impl TransactionLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record a transaction id. Returns `true` the first time it is seen.
    pub fn record(&self, id: &TransactionId) -> bool {
        self.seen.lock().put(id.clone(), ()).is_none()
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.seen.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_detected() {
        let ledger = TransactionLedger::new(8);
        let id = TransactionId::new("1.0.a");

        assert!(ledger.record(&id));
        assert!(!ledger.record(&id));
        assert!(ledger.contains(&id));
    }

    #[test]
    fn test_oldest_evicted() {
        let ledger = TransactionLedger::new(2);
        ledger.record(&TransactionId::new("1.0.a"));
        ledger.record(&TransactionId::new("2.0.a"));
        ledger.record(&TransactionId::new("3.0.a"));

        assert_eq!(ledger.len(), 2);
        assert!(!ledger.contains(&TransactionId::new("1.0.a")));
        assert!(ledger.contains(&TransactionId::new("3.0.a")));
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let ledger = TransactionLedger::new(0);
        assert!(ledger.record(&TransactionId::new("1.0.a")));
        assert_eq!(ledger.len(), 1);
    }
}
