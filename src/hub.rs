//! Engine facade tying the sync components together.

use crate::activity::{ActivityEvent, ActivitySource};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::notifications::NotificationBuilder;
use crate::permissions::PermissionEngine;
use crate::stream::{
    CatchUpBatch, LiveRegistration, LiveSummary, SseFrame, SseTransport, StreamHandler,
    StreamRequest,
};
use crate::subscriptions::{
    organization_dispatcher, ChannelStream, DispatchReport, Dispatcher, OrgAdmission, OrgContext,
    OrgSubscriber, Subscriber, SubscriberRegistry,
};
use crate::transactions::{
    prepare_mutation, FieldVersionMap, Hlc, HlcClock, PreparedMutation, TransactionDescriptor,
    TransactionLedger,
};
use crate::types::{SubscriberId, TransactionId};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of serving one stream request.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Catch-up only; the caller writes the batch as JSON.
    Batch(CatchUpBatch),
    /// Live stream that has ended.
    Closed(LiveSummary),
}

/// The realtime sync engine.
///
/// `publish` is called by change capture once an activity is in the log;
/// `serve` is called on the connection's own thread and blocks for the
/// lifetime of a live stream.
pub struct SyncHub {
    config: SyncConfig,
    source: Arc<dyn ActivitySource>,
    registry: Arc<SubscriberRegistry<OrgContext>>,
    dispatcher: Dispatcher<OrgContext>,
    ledger: TransactionLedger,
    clock: HlcClock,
    next_subscriber: AtomicU64,
    /// Dropped on shutdown; every live loop selects on the receiver.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

impl SyncHub {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn ActivitySource>,
        permissions: Arc<dyn PermissionEngine>,
    ) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let builder = NotificationBuilder::new(config.product_entity_types.iter().cloned());
        let admission = Arc::new(OrgAdmission::new(
            config.realtime_entity_types.iter().cloned(),
            permissions,
        ));
        let dispatcher = organization_dispatcher(Arc::clone(&registry), builder, admission);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        Self {
            ledger: TransactionLedger::new(config.ledger_capacity),
            clock: HlcClock::new(config.node_id.clone()),
            config,
            source,
            registry,
            dispatcher,
            next_subscriber: AtomicU64::new(1),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry<OrgContext>> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher<OrgContext> {
        &self.dispatcher
    }

    /// Clock for server-originated transaction ids.
    pub fn clock(&self) -> &HlcClock {
        &self.clock
    }

    /// Validate a client mutation against the stored field versions.
    ///
    /// Returns `None` when the transaction id was already committed (a
    /// client retry); the caller should answer as if it succeeded. A
    /// prepared mutation counts as applied only once the caller has
    /// persisted it and called [`SyncHub::commit_transaction`].
    pub fn prepare_mutation(
        &self,
        entity_type: &str,
        previous: &FieldVersionMap,
        descriptors: &[TransactionDescriptor],
    ) -> Result<Option<PreparedMutation>> {
        let Some(first) = descriptors.first() else {
            return Err(SyncError::InvalidTransaction(
                "mutation has no transaction descriptors".to_string(),
            ));
        };
        if self.ledger.contains(&first.transaction_id) {
            tracing::debug!(
                transaction = %first.transaction_id,
                entity_type,
                "Replayed transaction, skipping"
            );
            return Ok(None);
        }

        let prepared = prepare_mutation(entity_type, previous, descriptors)?;
        self.clock.observe(&Hlc::parse(&first.transaction_id)?);
        Ok(Some(prepared))
    }

    /// Mark a prepared transaction as persisted so retries are answered
    /// as replays. Returns `false` if it was already committed.
    pub fn commit_transaction(&self, id: &TransactionId) -> bool {
        self.ledger.record(id)
    }

    /// Whether `id` was already applied.
    pub fn is_replay(&self, id: &TransactionId) -> bool {
        self.ledger.contains(id)
    }

    /// Fan an activity out to live subscribers of its organization.
    pub fn publish(&self, event: &ActivityEvent) -> Result<DispatchReport> {
        self.dispatcher.dispatch(event)
    }

    /// Bounded catch-up for a subscriber that is not kept open.
    pub fn catch_up(&self, context: OrgContext, request: &StreamRequest) -> Result<CatchUpBatch> {
        let (subscriber, _frames) = self.subscriber(context, request);
        self.handler().catch_up(&subscriber, &request.offset)
    }

    /// Serve one stream request.
    ///
    /// Live requests block until the transport fails, the frame channel
    /// closes or the hub shuts down. The subscriber is registered before
    /// catch-up starts and unregistered when this returns.
    pub fn serve<T>(
        &self,
        request: &StreamRequest,
        context: OrgContext,
        transport: &mut T,
    ) -> Result<StreamOutcome>
    where
        T: SseTransport + ?Sized,
    {
        if !request.live {
            return self.catch_up(context, request).map(StreamOutcome::Batch);
        }
        if self.is_shutting_down() {
            return Err(SyncError::ShuttingDown);
        }

        let (subscriber, frames) = self.subscriber(context, request);
        let registration = LiveRegistration::register(Arc::clone(&self.registry), subscriber);
        let summary = self.handler().run_live(
            transport,
            &registration,
            &frames,
            &self.shutdown_rx,
            &request.offset,
        )?;

        tracing::info!(
            subscriber = %summary.subscriber,
            caught_up = summary.caught_up,
            delivered = summary.delivered,
            pings = summary.pings,
            reason = ?summary.reason,
            "Live stream finished"
        );
        Ok(StreamOutcome::Closed(summary))
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// End every live stream and refuse new ones.
    pub fn shutdown(&self) {
        if self.shutdown_tx.lock().take().is_some() {
            tracing::info!(subscribers = self.registry.len(), "Shutting down sync hub");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_tx.lock().is_none()
    }

    fn handler(&self) -> StreamHandler<'_> {
        StreamHandler::new(
            self.source.as_ref(),
            &self.dispatcher,
            self.config.catch_up_limit,
            self.config.keepalive_interval,
        )
    }

    fn subscriber(
        &self,
        mut context: OrgContext,
        request: &StreamRequest,
    ) -> (Arc<OrgSubscriber>, Receiver<SseFrame>) {
        if !request.entity_types.is_empty() {
            context.entity_types = request.entity_types.clone();
        }
        let id = SubscriberId::new(format!(
            "sub-{}",
            self.next_subscriber.fetch_add(1, Ordering::Relaxed)
        ));
        let (stream, frames) = ChannelStream::bounded(self.config.channel_buffer);
        let key = context.index_key();
        let subscriber = Subscriber::new(id, Some(key), context, Arc::new(stream));
        (Arc::new(subscriber), frames)
    }
}

impl Drop for SyncHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
