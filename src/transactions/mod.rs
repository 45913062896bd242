//! Optimistic-concurrency metadata for syncable entities.
//!
//! Every mutation carries one [`TransactionDescriptor`] per changed field.
//! The write path checks each descriptor against the entity's
//! [`FieldVersionMap`] and, when nothing conflicts, stamps the changed
//! fields with the new transaction id:
//!
//! ```ignore
//! let prepared = prepare_mutation("page", &row.field_versions, &descriptors)?;
//! row.field_versions = prepared.field_versions;
//! ```
//!
//! Conflicts are detected per field, so concurrent edits to different
//! fields of the same entity never collide.

mod descriptor;
mod field_versions;
mod ledger;

pub use descriptor::{Hlc, HlcClock, TransactionDescriptor};
pub use field_versions::{
    build_field_versions, check_field_conflicts, prepare_mutation, throw_if_conflicts,
    FieldConflict, FieldVersion, FieldVersionMap, PreparedMutation,
};
pub use ledger::TransactionLedger;
