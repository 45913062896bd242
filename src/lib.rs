//! # Syncline
//!
//! Field-versioned change streams with organization-scoped fan-out.
//!
//! ## Core Concepts
//!
//! - **Transactions**: Every client write names the field it changes and the
//!   stamp it last saw; conflicts are detected per field, never per row
//! - **Activities**: Committed mutations, read back in id order for catch-up
//! - **Subscriptions**: Live connections bucketed by organization so an event
//!   is only evaluated against the subscribers that could receive it
//! - **Streams**: One contract for "replay since X" and "tail from now" over
//!   server-sent events
//!
//! ## Example
//!
//! ```ignore
//! use syncline::{SyncConfig, SyncHub, InMemoryActivityLog, OrganizationMembers};
//!
//! let log = Arc::new(InMemoryActivityLog::new());
//! let hub = SyncHub::new(SyncConfig::default(), log.clone(), Arc::new(OrganizationMembers));
//!
//! // Write path
//! if let Some(prepared) = hub.prepare_mutation("page", &stored_versions, &descriptors)? {
//!     db.save(&prepared.field_versions)?;
//!     hub.commit_transaction(&prepared.transaction.mutation_id);
//! }
//!
//! // Change capture
//! log.append(event.clone())?;
//! hub.publish(&event)?;
//!
//! // Connection thread
//! let request = StreamRequest::from_query(query_pairs, &hub.config().live_token)?;
//! let outcome = hub.serve(&request, context, &mut socket)?;
//! ```

pub mod activity;
pub mod config;
pub mod error;
pub mod hub;
pub mod notifications;
pub mod permissions;
pub mod stream;
pub mod subscriptions;
pub mod transactions;
pub mod types;

// Re-exports
pub use activity::{
    ActivityEvent, ActivityJournal, ActivityKind, ActivitySource, CacheToken,
    InMemoryActivityLog, SyncTransaction,
};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use hub::{StreamOutcome, SyncHub};
pub use notifications::{Notification, NotificationBuilder};
pub use permissions::{
    Membership, OrganizationMembers, PermissionAction, PermissionDecision, PermissionEngine,
    PermissionSubject, SystemRole,
};
pub use stream::{
    CatchUpBatch, CloseReason, LiveSummary, SseFrame, SseTransport, StreamOffset, StreamRequest,
};
pub use subscriptions::{
    DispatchReport, Dispatcher, OrgAdmission, OrgContext, OrgSubscriber, Subscriber,
    SubscriberRegistry,
};
pub use transactions::{
    build_field_versions, check_field_conflicts, prepare_mutation, throw_if_conflicts,
    FieldConflict, FieldVersion, FieldVersionMap, PreparedMutation, TransactionDescriptor,
    TransactionLedger,
};
pub use types::{Action, ActivityId, IndexKey, SubscriberId, Timestamp, TransactionId};
