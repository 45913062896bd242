//! Indexed store of live subscribers.

use crate::subscriptions::Subscriber;
use crate::types::{IndexKey, SubscriberId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct RegistryState<C> {
    /// Subscribers by ID.
    subscribers: HashMap<SubscriberId, Arc<Subscriber<C>>>,
    /// Index key to the IDs registered under it. Buckets are never empty.
    index: HashMap<IndexKey, HashSet<SubscriberId>>,
}

impl<C> RegistryState<C> {
    fn remove_from_index(&mut self, subscriber: &Subscriber<C>) {
        let Some(key) = &subscriber.index_key else {
            return;
        };
        if let Some(bucket) = self.index.get_mut(key) {
            bucket.remove(&subscriber.id);
            if bucket.is_empty() {
                self.index.remove(key);
            }
        }
    }
}

/// Live subscribers, bucketed by index key.
///
/// Both maps sit behind one lock so a bucket never names an ID the
/// primary store has dropped.
pub struct SubscriberRegistry<C> {
    state: RwLock<RegistryState<C>>,
}

impl<C> SubscriberRegistry<C> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                subscribers: HashMap::new(),
                index: HashMap::new(),
            }),
        }
    }

    /// Add a subscriber. Returns the previous subscriber with the same ID, if any.
    pub fn register(&self, subscriber: Arc<Subscriber<C>>) -> Option<Arc<Subscriber<C>>> {
        let mut state = self.state.write();

        let previous = state.subscribers.remove(&subscriber.id);
        if let Some(previous) = &previous {
            state.remove_from_index(previous);
        }

        if let Some(key) = &subscriber.index_key {
            state
                .index
                .entry(key.clone())
                .or_default()
                .insert(subscriber.id.clone());
        }
        state.subscribers.insert(subscriber.id.clone(), subscriber);

        previous
    }

    /// Remove a subscriber, dropping its bucket when it becomes empty.
    pub fn unregister(&self, id: &SubscriberId) -> Option<Arc<Subscriber<C>>> {
        let mut state = self.state.write();
        let removed = state.subscribers.remove(id)?;
        state.remove_from_index(&removed);
        Some(removed)
    }

    /// Subscribers registered under `key`; empty for unknown keys.
    pub fn get_by_index(&self, key: &IndexKey) -> Vec<Arc<Subscriber<C>>> {
        let state = self.state.read();
        let Some(bucket) = state.index.get(key) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter_map(|id| state.subscribers.get(id).cloned())
            .collect()
    }

    pub fn get(&self, id: &SubscriberId) -> Option<Arc<Subscriber<C>>> {
        self.state.read().subscribers.get(id).cloned()
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.state.read().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().subscribers.is_empty()
    }

    /// Number of non-empty index buckets.
    pub fn index_len(&self) -> usize {
        self.state.read().index.len()
    }

    /// Snapshot of every registered subscriber.
    pub fn all(&self) -> Vec<Arc<Subscriber<C>>> {
        self.state.read().subscribers.values().cloned().collect()
    }
}

impl<C> Default for SubscriberRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::ChannelStream;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn subscriber(id: &str, key: Option<&str>) -> Arc<Subscriber<()>> {
        let (stream, _rx) = ChannelStream::bounded(1);
        Arc::new(Subscriber::new(
            SubscriberId::new(id),
            key.map(IndexKey::organization),
            (),
            Arc::new(stream),
        ))
    }

    fn ids(subs: Vec<Arc<Subscriber<()>>>) -> BTreeSet<String> {
        subs.into_iter().map(|s| s.id.0.clone()).collect()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = SubscriberRegistry::new();
        registry.register(subscriber("a", Some("org-1")));
        registry.register(subscriber("b", Some("org-1")));
        registry.register(subscriber("c", Some("org-2")));
        registry.register(subscriber("d", None));

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.index_len(), 2);
        assert_eq!(
            ids(registry.get_by_index(&IndexKey::organization("org-1"))),
            ["a", "b"].iter().map(|s| s.to_string()).collect()
        );
        assert!(registry
            .get_by_index(&IndexKey::organization("org-9"))
            .is_empty());
    }

    #[test]
    fn test_unregister_drops_empty_bucket() {
        let registry = SubscriberRegistry::new();
        registry.register(subscriber("a", Some("org-1")));
        assert_eq!(registry.index_len(), 1);

        assert!(registry.unregister(&SubscriberId::new("a")).is_some());
        assert_eq!(registry.index_len(), 0);
        assert!(registry.is_empty());

        // Second removal is a no-op
        assert!(registry.unregister(&SubscriberId::new("a")).is_none());
    }

    #[test]
    fn test_reregister_moves_bucket() {
        let registry = SubscriberRegistry::new();
        registry.register(subscriber("a", Some("org-1")));
        let previous = registry.register(subscriber("a", Some("org-2")));

        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry
            .get_by_index(&IndexKey::organization("org-1"))
            .is_empty());
        assert_eq!(
            registry.get_by_index(&IndexKey::organization("org-2")).len(),
            1
        );
        assert_eq!(registry.index_len(), 1);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Register(u8, Option<u8>),
        Unregister(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8, proptest::option::of(0u8..3)).prop_map(|(id, key)| Op::Register(id, key)),
            (0u8..8).prop_map(Op::Unregister),
        ]
    }

    proptest! {
        #[test]
        fn prop_index_matches_model(ops in proptest::collection::vec(op(), 0..60)) {
            let registry = SubscriberRegistry::new();
            let mut model: BTreeMap<String, Option<String>> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Register(id, key) => {
                        let id = format!("s{id}");
                        let key = key.map(|k| format!("org-{k}"));
                        registry.register(subscriber(&id, key.as_deref()));
                        model.insert(id, key);
                    }
                    Op::Unregister(id) => {
                        let id = format!("s{id}");
                        registry.unregister(&SubscriberId::new(id.clone()));
                        model.remove(&id);
                    }
                }
            }

            prop_assert_eq!(registry.len(), model.len());
            let mut live_keys = BTreeSet::new();
            for k in 0..3u8 {
                let org = format!("org-{k}");
                let expected: BTreeSet<String> = model
                    .iter()
                    .filter(|(_, key)| key.as_deref() == Some(org.as_str()))
                    .map(|(id, _)| id.clone())
                    .collect();
                if !expected.is_empty() {
                    live_keys.insert(org.clone());
                }
                let bucket = registry.get_by_index(&IndexKey::organization(&org));
                prop_assert_eq!(ids(bucket), expected);
            }
            prop_assert_eq!(registry.index_len(), live_keys.len());
        }
    }
}
