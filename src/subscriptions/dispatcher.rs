//! Generic fan-out of activity events to registered subscribers.

use crate::activity::ActivityEvent;
use crate::error::Result;
use crate::notifications::{Notification, NotificationBuilder};
use crate::stream::SseFrame;
use crate::subscriptions::{Subscriber, SubscriberRegistry};
use crate::types::IndexKey;
use std::sync::Arc;

/// Resolves the routing key of an event; `None` means not routable.
pub type IndexKeyFn = Box<dyn Fn(&ActivityEvent) -> Option<IndexKey> + Send + Sync>;

/// Per-subscriber admission predicate.
pub type AdmissionFn<C> = Box<dyn Fn(&Subscriber<C>, &ActivityEvent) -> bool + Send + Sync>;

/// How a dispatcher routes and filters events.
pub struct DispatcherConfig<C> {
    /// Name used in log lines.
    pub label: String,
    pub index_key: IndexKeyFn,
    pub should_receive: AdmissionFn<C>,
}

/// Counts from one dispatch pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers found in the event's bucket.
    pub candidates: usize,
    /// Candidates that passed admission.
    pub admitted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Routes each event to the subscribers of its index bucket.
pub struct Dispatcher<C> {
    registry: Arc<SubscriberRegistry<C>>,
    builder: NotificationBuilder,
    config: DispatcherConfig<C>,
}

impl<C> Dispatcher<C> {
    pub fn new(
        registry: Arc<SubscriberRegistry<C>>,
        builder: NotificationBuilder,
        config: DispatcherConfig<C>,
    ) -> Self {
        Self {
            registry,
            builder,
            config,
        }
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry<C>> {
        &self.registry
    }

    pub fn builder(&self) -> &NotificationBuilder {
        &self.builder
    }

    pub fn index_key(&self, event: &ActivityEvent) -> Option<IndexKey> {
        (self.config.index_key)(event)
    }

    pub fn should_receive(&self, subscriber: &Subscriber<C>, event: &ActivityEvent) -> bool {
        (self.config.should_receive)(subscriber, event)
    }

    /// Build the notification for an event, logging malformed events.
    pub fn notification_for(&self, event: &ActivityEvent) -> Result<Notification> {
        SseFrame::check_id(&event.id)
            .and_then(|()| self.builder.build(event))
            .map_err(|e| {
                tracing::error!(
                    dispatcher = %self.config.label,
                    activity = %event.id,
                    entity_type = %event.entity_type,
                    error = %e,
                    "Rejecting malformed activity event"
                );
                e
            })
    }

    /// Deliver `event` to every admitted subscriber in its bucket.
    ///
    /// A failed delivery is logged and counted; it neither stops delivery
    /// to the remaining subscribers nor removes the subscriber.
    pub fn dispatch(&self, event: &ActivityEvent) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        let Some(key) = self.index_key(event) else {
            tracing::trace!(
                dispatcher = %self.config.label,
                activity = %event.id,
                "Event has no index key, skipping"
            );
            return Ok(report);
        };

        let candidates = self.registry.get_by_index(&key);
        report.candidates = candidates.len();

        let admitted: Vec<_> = candidates
            .iter()
            .filter(|subscriber| self.should_receive(subscriber, event))
            .collect();
        report.admitted = admitted.len();
        if admitted.is_empty() {
            return Ok(report);
        }

        let notification = self.notification_for(event)?;
        let frame = SseFrame::change(&event.id, &notification)?;

        for subscriber in admitted {
            match subscriber.deliver(&event.id, frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        dispatcher = %self.config.label,
                        subscriber = %subscriber.id,
                        activity = %event.id,
                        error = %e,
                        "Delivery failed"
                    );
                }
            }
        }

        tracing::debug!(
            dispatcher = %self.config.label,
            activity = %event.id,
            index_key = %key,
            delivered = report.delivered,
            failed = report.failed,
            "Dispatched activity"
        );

        Ok(report)
    }
}
