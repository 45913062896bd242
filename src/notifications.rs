//! Client-facing notifications derived from activity events.

use crate::activity::{ActivityEvent, ActivityKind, CacheToken};
use crate::error::Result;
use crate::transactions::FieldVersionMap;
use crate::types::{Action, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lean transaction echo sent with product notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStx {
    pub mutation_id: TransactionId,
    pub source_id: String,
    pub version: u64,
    pub field_versions: FieldVersionMap,
}

/// Change notification for a product entity.
///
/// Carries no entity payload; clients compare `cache_token` with their
/// cached copy and refetch on mismatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductNotification {
    pub action: Action,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub organization_id: Option<String>,
    /// Always null for product entities.
    pub seq: Option<u64>,
    pub stx: NotificationStx,
    pub cache_token: CacheToken,
}

/// Change notification for memberships and other untracked resources.
///
/// Clients invalidate and refetch, using `seq` to spot gaps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipNotification {
    pub action: Action,
    pub resource_type: String,
    pub entity_id: Option<String>,
    pub organization_id: Option<String>,
    pub context_type: Option<String>,
    pub seq: Option<u64>,
    /// Always null for non-product resources.
    pub stx: Option<NotificationStx>,
    /// Always null for non-product resources.
    pub cache_token: Option<CacheToken>,
}

/// Wire message for one activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Notification {
    Product(ProductNotification),
    Membership(MembershipNotification),
}

impl Notification {
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Notification::Product(n) => n.entity_id.as_deref(),
            Notification::Membership(n) => n.entity_id.as_deref(),
        }
    }

    pub fn cache_token(&self) -> Option<&CacheToken> {
        match self {
            Notification::Product(n) => Some(&n.cache_token),
            Notification::Membership(_) => None,
        }
    }
}

/// Turns activity events into notifications.
#[derive(Clone, Debug, Default)]
pub struct NotificationBuilder {
    product_types: BTreeSet<String>,
}

impl NotificationBuilder {
    pub fn new(product_types: impl IntoIterator<Item = String>) -> Self {
        Self {
            product_types: product_types.into_iter().collect(),
        }
    }

    pub fn product_types(&self) -> &BTreeSet<String> {
        &self.product_types
    }

    /// Build the notification for `event`.
    ///
    /// Fails with `MalformedActivityEvent` when a product entity event lacks
    /// transaction metadata.
    pub fn build(&self, event: &ActivityEvent) -> Result<Notification> {
        let notification = match event.classify(&self.product_types)? {
            ActivityKind::Product(product) => Notification::Product(ProductNotification {
                action: event.action,
                entity_type: event.entity_type.clone(),
                entity_id: event.entity_id.clone(),
                organization_id: event.organization_id.clone(),
                seq: None,
                stx: NotificationStx {
                    mutation_id: product.stx.mutation_id.clone(),
                    source_id: product.stx.source_id.clone(),
                    version: product.stx.version,
                    field_versions: product.stx.field_versions.clone(),
                },
                cache_token: product.cache_token.clone(),
            }),
            ActivityKind::Membership(membership) => {
                let event = membership.event;
                Notification::Membership(MembershipNotification {
                    action: event.action,
                    resource_type: event.entity_type.clone(),
                    entity_id: event.entity_id.clone(),
                    organization_id: event.organization_id.clone(),
                    context_type: event.context_type.clone(),
                    seq: event.seq,
                    stx: None,
                    cache_token: None,
                })
            }
        };
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::SyncTransaction;
    use crate::error::SyncError;
    use crate::transactions::build_field_versions;
    use serde_json::json;

    fn builder() -> NotificationBuilder {
        NotificationBuilder::new(["page".to_string(), "attachment".to_string()])
    }

    fn page_event() -> ActivityEvent {
        let stamp = TransactionId::new("10.0.tab-a");
        ActivityEvent::new("0001", Action::Update, "page", "page-1")
            .in_organization("org-1")
            .with_changed_keys(vec!["title".into()])
            .with_entity(json!({"title": "Big payload"}))
            .with_transaction(SyncTransaction {
                mutation_id: stamp.clone(),
                source_id: "tab-a".into(),
                changed_field: Some("title".into()),
                expected_transaction_id: None,
                version: 1,
                field_versions: build_field_versions(&FieldVersionMap::new(), &["title"], &stamp),
            })
    }

    #[test]
    fn test_product_notification_wire_form() {
        let event = page_event();
        let notification = builder().build(&event).unwrap();
        let json = serde_json::to_value(&notification).unwrap();

        assert_eq!(json["action"], "update");
        assert_eq!(json["entityType"], "page");
        assert_eq!(json["entityId"], "page-1");
        assert_eq!(json["organizationId"], "org-1");
        assert!(json["seq"].is_null());
        assert_eq!(json["stx"]["mutationId"], "10.0.tab-a");
        assert_eq!(json["stx"]["sourceId"], "tab-a");
        assert_eq!(json["stx"]["version"], 1);
        assert_eq!(json["stx"]["fieldVersions"]["title"]["version"], 1);
        assert_eq!(json["cacheToken"], event.cache_token.unwrap().0);
        assert!(json.get("entity").is_none());
    }

    #[test]
    fn test_membership_notification_wire_form() {
        let event = ActivityEvent::new("0002", Action::Create, "membership", "mem-1")
            .in_organization("org-1")
            .with_membership_context("organization", 7);
        let json = serde_json::to_value(builder().build(&event).unwrap()).unwrap();

        assert_eq!(json["resourceType"], "membership");
        assert_eq!(json["contextType"], "organization");
        assert_eq!(json["seq"], 7);
        assert!(json["stx"].is_null());
        assert!(json["cacheToken"].is_null());
        assert!(json.get("entityType").is_none());
    }

    #[test]
    fn test_product_without_stx_fails_loudly() {
        let mut event = page_event();
        event.stx = None;
        assert!(matches!(
            builder().build(&event),
            Err(SyncError::MalformedActivityEvent { .. })
        ));
    }

    #[test]
    fn test_accessors() {
        let notification = builder().build(&page_event()).unwrap();
        assert_eq!(notification.entity_id(), Some("page-1"));
        assert!(notification.cache_token().is_some());
    }
}
