//! Live subscribers and event fan-out.
//!
//! Every open stream connection is represented by a [`Subscriber`] held in
//! a [`SubscriberRegistry`], bucketed by routing key. The [`Dispatcher`]
//! routes each activity only to the bucket for its key, so the cost of an
//! event grows with the size of one organization, not with the number of
//! connected clients.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(SubscriberRegistry::new());
//! let admission = Arc::new(OrgAdmission::new(realtime_types, permissions));
//! let dispatcher = organization_dispatcher(Arc::clone(&registry), builder, admission);
//!
//! let (stream, frames) = ChannelStream::bounded(1000);
//! registry.register(Arc::new(Subscriber::new(id, Some(key), context, Arc::new(stream))));
//!
//! let report = dispatcher.dispatch(&event)?;
//! ```

mod dispatcher;
mod organization;
mod registry;
mod types;

pub use dispatcher::{AdmissionFn, DispatchReport, Dispatcher, DispatcherConfig, IndexKeyFn};
pub use organization::{organization_dispatcher, organization_index_key, OrgAdmission};
pub use registry::SubscriberRegistry;
pub use types::{ChannelStream, EventStream, OrgContext, OrgSubscriber, PushError, Subscriber};
