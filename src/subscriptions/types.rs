//! Subscriber types and stream handles.

use crate::error::{Result, SyncError};
use crate::permissions::{Membership, SystemRole};
use crate::stream::SseFrame;
use crate::types::{ActivityId, IndexKey, SubscriberId};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Why a frame could not be queued on a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushError {
    /// Send buffer is full (slow consumer).
    Full,
    /// Connection side has gone away.
    Closed,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PushError::Full => "send buffer full",
            PushError::Closed => "stream closed",
        })
    }
}

/// Handle for server-push writes to one connection.
pub trait EventStream: Send + Sync {
    fn push(&self, frame: SseFrame) -> std::result::Result<(), PushError>;
}

/// Stream handle backed by a bounded channel.
///
/// The connection loop owns the receiving end and writes frames to the
/// transport in order.
#[derive(Clone)]
pub struct ChannelStream {
    sender: Sender<SseFrame>,
}

impl ChannelStream {
    pub fn bounded(buffer_size: usize) -> (Self, Receiver<SseFrame>) {
        let (sender, receiver) = bounded(buffer_size.max(1));
        (Self { sender }, receiver)
    }
}

impl EventStream for ChannelStream {
    fn push(&self, frame: SseFrame) -> std::result::Result<(), PushError> {
        match self.sender.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PushError::Full),
            Err(TrySendError::Disconnected(_)) => Err(PushError::Closed),
        }
    }
}

/// Registration record for one live connection.
pub struct Subscriber<C> {
    pub id: SubscriberId,
    /// Routing key this subscriber is bucketed under.
    pub index_key: Option<IndexKey>,
    /// Variant-specific filter context.
    pub context: C,
    stream: Arc<dyn EventStream>,
    /// Last delivered activity. Held while pushing so deliveries to one
    /// subscriber never interleave.
    cursor: Mutex<Option<ActivityId>>,
}

impl<C> Subscriber<C> {
    pub fn new(
        id: SubscriberId,
        index_key: Option<IndexKey>,
        context: C,
        stream: Arc<dyn EventStream>,
    ) -> Self {
        Self {
            id,
            index_key,
            context,
            stream,
            cursor: Mutex::new(None),
        }
    }

    pub fn cursor(&self) -> Option<ActivityId> {
        self.cursor.lock().clone()
    }

    /// Move the cursor forward to `id`. Never moves backwards.
    pub fn advance_cursor(&self, id: &ActivityId) -> bool {
        let mut cursor = self.cursor.lock();
        Self::advance(&mut cursor, id)
    }

    /// Push a frame for activity `id` and advance the cursor on success.
    pub fn deliver(&self, id: &ActivityId, frame: SseFrame) -> Result<()> {
        let mut cursor = self.cursor.lock();
        self.stream
            .push(frame)
            .map_err(|e| SyncError::DeliveryFailure {
                subscriber: self.id.clone(),
                reason: e.to_string(),
            })?;
        Self::advance(&mut cursor, id);
        Ok(())
    }

    fn advance(cursor: &mut Option<ActivityId>, id: &ActivityId) -> bool {
        if cursor.as_ref().is_some_and(|current| current >= id) {
            return false;
        }
        *cursor = Some(id.clone());
        true
    }
}

impl<C: fmt::Debug> fmt::Debug for Subscriber<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("index_key", &self.index_key)
            .field("context", &self.context)
            .field("cursor", &*self.cursor.lock())
            .finish()
    }
}

/// Filter context of an organization-scoped subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrgContext {
    pub org_id: String,
    /// Requested entity types; empty means all.
    pub entity_types: BTreeSet<String>,
    pub user_id: String,
    pub memberships: Vec<Membership>,
    pub system_role: SystemRole,
}

impl OrgContext {
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            entity_types: BTreeSet::new(),
            user_id: user_id.into(),
            memberships: Vec::new(),
            system_role: SystemRole::User,
        }
    }

    pub fn with_memberships(mut self, memberships: Vec<Membership>) -> Self {
        self.memberships = memberships;
        self
    }

    pub fn with_entity_types(mut self, entity_types: BTreeSet<String>) -> Self {
        self.entity_types = entity_types;
        self
    }

    pub fn with_system_role(mut self, role: SystemRole) -> Self {
        self.system_role = role;
        self
    }

    pub fn index_key(&self) -> IndexKey {
        IndexKey::organization(&self.org_id)
    }
}

pub type OrgSubscriber = Subscriber<OrgContext>;
