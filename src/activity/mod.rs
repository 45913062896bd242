//! Activity events: the normalized record of one committed mutation.
//!
//! Events are produced by the external change-capture process in commit
//! order. The engine never mutates them; it routes them to live
//! subscribers and replays them from an [`ActivitySource`] during
//! catch-up.

mod cache_token;
mod event;
mod journal;
mod source;

pub use cache_token::CacheToken;
pub use event::{ActivityEvent, ActivityKind, MembershipEvent, ProductEntityEvent, SyncTransaction};
pub use journal::ActivityJournal;
pub use source::{ActivitySource, InMemoryActivityLog};
