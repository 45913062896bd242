//! Activity event types.

use crate::activity::CacheToken;
use crate::error::{Result, SyncError};
use crate::transactions::FieldVersionMap;
use crate::types::{Action, ActivityId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Transaction metadata echoed on product-entity events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTransaction {
    /// Transaction id of the mutation (the new field stamp).
    pub mutation_id: TransactionId,
    pub source_id: String,
    pub changed_field: Option<String>,
    pub expected_transaction_id: Option<TransactionId>,
    /// Highest field version this mutation produced.
    pub version: u64,
    /// Field-version snapshot after the mutation.
    pub field_versions: FieldVersionMap,
}

/// One committed mutation as emitted by change capture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: ActivityId,
    pub action: Action,
    pub entity_type: String,
    /// `None` for pure metadata events, which are never delivered live.
    pub entity_id: Option<String>,
    pub organization_id: Option<String>,
    /// Membership context (organization, project, ...) for non-product resources.
    pub context_type: Option<String>,
    pub changed_keys: Option<Vec<String>>,
    pub stx: Option<SyncTransaction>,
    pub cache_token: Option<CacheToken>,
    /// Gap-detection counter for resources without `stx`.
    pub seq: Option<u64>,
    /// Full entity snapshot, for payload-bearing consumers.
    pub entity: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl ActivityEvent {
    pub fn new(
        id: impl Into<ActivityId>,
        action: Action,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            entity_type: entity_type.into(),
            entity_id: Some(entity_id.into()),
            organization_id: None,
            context_type: None,
            changed_keys: None,
            stx: None,
            cache_token: None,
            seq: None,
            entity: None,
            created_at: Timestamp::now(),
        }
    }

    pub fn in_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_changed_keys(mut self, keys: Vec<String>) -> Self {
        self.changed_keys = Some(keys);
        self
    }

    /// Attach transaction metadata and a cache token derived from it.
    pub fn with_transaction(mut self, stx: SyncTransaction) -> Self {
        if let Some(entity_id) = &self.entity_id {
            self.cache_token = Some(CacheToken::derive(
                &self.entity_type,
                entity_id,
                &stx.mutation_id,
                stx.version,
            ));
        }
        self.stx = Some(stx);
        self
    }

    pub fn with_membership_context(mut self, context_type: impl Into<String>, seq: u64) -> Self {
        self.context_type = Some(context_type.into());
        self.seq = Some(seq);
        self
    }

    pub fn with_entity(mut self, entity: serde_json::Value) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Entity id, treating an empty string as absent.
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Split into product or membership view.
    ///
    /// Product entity types must carry `stx` and a cache token; anything
    /// else is a producer bug and is rejected.
    pub fn classify(&self, product_types: &BTreeSet<String>) -> Result<ActivityKind<'_>> {
        if !product_types.contains(&self.entity_type) {
            return Ok(ActivityKind::Membership(MembershipEvent { event: self }));
        }

        let stx = self
            .stx
            .as_ref()
            .ok_or_else(|| self.malformed("product entity event without stx"))?;
        let cache_token = self
            .cache_token
            .as_ref()
            .ok_or_else(|| self.malformed("product entity event without cache token"))?;

        Ok(ActivityKind::Product(ProductEntityEvent {
            event: self,
            stx,
            cache_token,
        }))
    }

    fn malformed(&self, reason: &str) -> SyncError {
        SyncError::MalformedActivityEvent {
            id: self.id.clone(),
            reason: format!("{reason} ({})", self.entity_type),
        }
    }
}

/// Typed view over an [`ActivityEvent`].
#[derive(Clone, Copy, Debug)]
pub enum ActivityKind<'a> {
    Product(ProductEntityEvent<'a>),
    Membership(MembershipEvent<'a>),
}

/// Product entity event; transaction metadata is guaranteed present.
#[derive(Clone, Copy, Debug)]
pub struct ProductEntityEvent<'a> {
    pub event: &'a ActivityEvent,
    pub stx: &'a SyncTransaction,
    pub cache_token: &'a CacheToken,
}

/// Membership or other non-product resource event.
#[derive(Clone, Copy, Debug)]
pub struct MembershipEvent<'a> {
    pub event: &'a ActivityEvent,
}
