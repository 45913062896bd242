//! Catch-up and live tailing for one stream connection.

use crate::activity::ActivitySource;
use crate::error::Result;
use crate::notifications::Notification;
use crate::stream::{SseFrame, SseTransport, StreamOffset};
use crate::subscriptions::{Dispatcher, OrgContext, OrgSubscriber, SubscriberRegistry};
use crate::types::{ActivityId, SubscriberId};
use crossbeam_channel::{select, Receiver};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Response body of a catch-up request.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CatchUpBatch {
    pub activities: Vec<Notification>,
    /// Id of the last returned activity; `None` when nothing was returned.
    pub cursor: Option<ActivityId>,
}

/// One bounded page of admitted activities.
#[derive(Clone, Debug, Default)]
pub struct CatchUpPage {
    pub entries: Vec<(ActivityId, Notification)>,
    /// The limit was reached before the log head.
    pub truncated: bool,
}

impl CatchUpPage {
    pub fn last_id(&self) -> Option<&ActivityId> {
        self.entries.last().map(|(id, _)| id)
    }

    pub fn into_batch(self) -> CatchUpBatch {
        let cursor = self.last_id().cloned();
        CatchUpBatch {
            activities: self.entries.into_iter().map(|(_, n)| n).collect(),
            cursor,
        }
    }
}

/// Why a live stream ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Writing to the client failed.
    TransportClosed,
    /// The subscriber's frame channel was disconnected.
    StreamClosed,
    /// The engine is shutting down.
    Shutdown,
}

/// Counters for a finished live stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSummary {
    pub subscriber: SubscriberId,
    /// Change frames written during catch-up.
    pub caught_up: usize,
    /// Change frames written from the live channel.
    pub delivered: usize,
    /// Live frames dropped as already sent during catch-up.
    pub skipped: usize,
    pub pings: usize,
    pub reason: CloseReason,
}

/// Keeps a subscriber registered for the lifetime of a live stream.
///
/// Dropping the guard unregisters the subscriber, on every exit path.
pub struct LiveRegistration {
    registry: Arc<SubscriberRegistry<OrgContext>>,
    subscriber: Arc<OrgSubscriber>,
}

impl LiveRegistration {
    pub fn register(
        registry: Arc<SubscriberRegistry<OrgContext>>,
        subscriber: Arc<OrgSubscriber>,
    ) -> Self {
        registry.register(Arc::clone(&subscriber));
        tracing::info!(
            subscriber = %subscriber.id,
            organization = %subscriber.context.org_id,
            user = %subscriber.context.user_id,
            "Live stream opened"
        );
        Self {
            registry,
            subscriber,
        }
    }

    pub fn subscriber(&self) -> &Arc<OrgSubscriber> {
        &self.subscriber
    }
}

impl Drop for LiveRegistration {
    fn drop(&mut self) {
        let id = &self.subscriber.id;
        // Only remove the entry if it is still ours.
        if let Some(current) = self.registry.get(id) {
            if Arc::ptr_eq(&current, &self.subscriber) {
                self.registry.unregister(id);
            }
        }
        tracing::info!(subscriber = %id, "Live stream closed");
    }
}

/// Serves catch-up reads and live tails against one activity source.
pub struct StreamHandler<'a> {
    source: &'a dyn ActivitySource,
    dispatcher: &'a Dispatcher<OrgContext>,
    catch_up_limit: usize,
    keepalive_interval: Duration,
}

impl<'a> StreamHandler<'a> {
    pub fn new(
        source: &'a dyn ActivitySource,
        dispatcher: &'a Dispatcher<OrgContext>,
        catch_up_limit: usize,
        keepalive_interval: Duration,
    ) -> Self {
        Self {
            source,
            dispatcher,
            catch_up_limit: catch_up_limit.max(1),
            keepalive_interval,
        }
    }

    /// Activity id a stream starts reading after.
    pub fn resolve_offset(&self, offset: &StreamOffset) -> Result<Option<ActivityId>> {
        match offset {
            StreamOffset::Beginning => Ok(None),
            StreamOffset::Now => self.source.head(),
            StreamOffset::After(id) => Ok(Some(id.clone())),
        }
    }

    /// Collect up to the catch-up limit of admitted activities after `after`.
    ///
    /// Applies the live admission rules. Malformed events are logged and
    /// skipped so one bad row cannot stall a client.
    pub fn catch_up_page(
        &self,
        subscriber: &OrgSubscriber,
        after: Option<ActivityId>,
    ) -> Result<CatchUpPage> {
        let mut page = CatchUpPage::default();
        let mut after = after;

        loop {
            let events = self.source.read_after(after.as_ref(), self.catch_up_limit)?;
            let exhausted = events.len() < self.catch_up_limit;

            for event in &events {
                after = Some(event.id.clone());
                if !self.dispatcher.should_receive(subscriber, event) {
                    continue;
                }
                let Ok(notification) = self.dispatcher.notification_for(event) else {
                    continue;
                };
                page.entries.push((event.id.clone(), notification));
                subscriber.advance_cursor(&event.id);

                if page.entries.len() >= self.catch_up_limit {
                    page.truncated = true;
                    tracing::warn!(
                        subscriber = %subscriber.id,
                        limit = self.catch_up_limit,
                        cursor = %event.id,
                        "Catch-up truncated at limit"
                    );
                    return Ok(page);
                }
            }

            if exhausted {
                return Ok(page);
            }
        }
    }

    /// Bounded catch-up for a request without live mode.
    pub fn catch_up(
        &self,
        subscriber: &OrgSubscriber,
        offset: &StreamOffset,
    ) -> Result<CatchUpBatch> {
        let after = self.resolve_offset(offset)?;
        Ok(self.catch_up_page(subscriber, after)?.into_batch())
    }

    /// Stream catch-up then tail `frames` until the connection ends.
    ///
    /// The subscriber must already be registered so activities committed
    /// during catch-up reach `frames`. Live frames are dropped only when
    /// catch-up already covered them: ids at or before the requested cursor,
    /// or within the range catch-up read. Starting from `Now`, the log head
    /// is only where catch-up begins; frames at or before it still go out.
    pub fn run_live<T>(
        &self,
        transport: &mut T,
        registration: &LiveRegistration,
        frames: &Receiver<SseFrame>,
        shutdown: &Receiver<()>,
        offset: &StreamOffset,
    ) -> Result<LiveSummary>
    where
        T: SseTransport + ?Sized,
    {
        let subscriber = registration.subscriber();
        let mut summary = LiveSummary {
            subscriber: subscriber.id.clone(),
            caught_up: 0,
            delivered: 0,
            skipped: 0,
            pings: 0,
            reason: CloseReason::TransportClosed,
        };

        let start = self.resolve_offset(offset)?;
        let mut covered = match offset {
            StreamOffset::Now => CatchUpRange {
                floor: start.clone(),
                last: None,
            },
            _ => CatchUpRange {
                floor: None,
                last: start.clone(),
            },
        };
        let mut after = start;
        loop {
            let page = self.catch_up_page(subscriber, after.clone())?;
            for (id, notification) in &page.entries {
                let frame = SseFrame::change(id, notification)?;
                if let Err(e) = transport.send(&frame) {
                    tracing::debug!(
                        subscriber = %subscriber.id,
                        error = %e,
                        "Transport closed during catch-up"
                    );
                    return Ok(summary);
                }
                summary.caught_up += 1;
            }
            if let Some(id) = page.last_id() {
                covered.last = Some(id.clone());
                after = Some(id.clone());
            }
            if !page.truncated {
                break;
            }
        }

        loop {
            select! {
                recv(frames) -> msg => {
                    let Ok(frame) = msg else {
                        summary.reason = CloseReason::StreamClosed;
                        return Ok(summary);
                    };
                    if covered.contains(&frame) {
                        summary.skipped += 1;
                        tracing::debug!(
                            subscriber = %subscriber.id,
                            activity = ?frame.id,
                            "Skipping activity already sent in catch-up"
                        );
                        continue;
                    }
                    if transport.send(&frame).is_err() {
                        summary.reason = CloseReason::TransportClosed;
                        return Ok(summary);
                    }
                    summary.delivered += 1;
                }
                recv(shutdown) -> _ => {
                    summary.reason = CloseReason::Shutdown;
                    return Ok(summary);
                }
                default(self.keepalive_interval) => {
                    if transport.send(&SseFrame::ping()).is_err() {
                        summary.reason = CloseReason::TransportClosed;
                        return Ok(summary);
                    }
                    summary.pings += 1;
                }
            }
        }
    }
}

/// Ids in `(floor, last]` were already written by catch-up.
struct CatchUpRange {
    floor: Option<ActivityId>,
    last: Option<ActivityId>,
}

impl CatchUpRange {
    fn contains(&self, frame: &SseFrame) -> bool {
        let (Some(id), Some(last)) = (frame.id.as_deref(), self.last.as_ref()) else {
            return false;
        };
        let above_floor = self.floor.as_ref().map_or(true, |floor| id > floor.as_str());
        above_floor && id <= last.as_str()
    }
}
