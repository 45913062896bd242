//! Organization-scoped routing and admission.

use crate::activity::ActivityEvent;
use crate::notifications::NotificationBuilder;
use crate::permissions::{PermissionAction, PermissionEngine, PermissionSubject, SystemRole};
use crate::subscriptions::{
    Dispatcher, DispatcherConfig, OrgContext, OrgSubscriber, SubscriberRegistry,
};
use crate::types::IndexKey;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Route by `org:<organizationId>`; events outside an organization are not routable.
pub fn organization_index_key(event: &ActivityEvent) -> Option<IndexKey> {
    event.organization_id.as_deref().map(IndexKey::organization)
}

/// Decides whether an organization subscriber may see an event.
///
/// Shared by live dispatch and catch-up so both apply identical rules.
pub struct OrgAdmission {
    realtime_types: BTreeSet<String>,
    permissions: Arc<dyn PermissionEngine>,
}

impl OrgAdmission {
    pub fn new(
        realtime_types: impl IntoIterator<Item = String>,
        permissions: Arc<dyn PermissionEngine>,
    ) -> Self {
        Self {
            realtime_types: realtime_types.into_iter().collect(),
            permissions,
        }
    }

    pub fn should_receive(&self, subscriber: &OrgSubscriber, event: &ActivityEvent) -> bool {
        let ctx = &subscriber.context;

        let Some(organization_id) = event.organization_id.as_deref() else {
            return false;
        };
        if organization_id != ctx.org_id {
            return false;
        }
        let Some(entity_id) = event.entity_id() else {
            return false;
        };
        if !self.realtime_types.contains(&event.entity_type) {
            return false;
        }
        if !ctx.entity_types.is_empty() && !ctx.entity_types.contains(&event.entity_type) {
            return false;
        }
        if ctx.system_role == SystemRole::Admin {
            return true;
        }

        let subject = PermissionSubject {
            id: entity_id,
            entity_type: &event.entity_type,
            organization_id,
        };
        let decision = self
            .permissions
            .is_allowed(&ctx.memberships, PermissionAction::Read, &subject);
        if !decision.allowed {
            tracing::debug!(
                subscriber = %subscriber.id,
                user = %ctx.user_id,
                activity = %event.id,
                entity_type = %event.entity_type,
                entity_id,
                "Read denied, skipping activity"
            );
        }
        decision.allowed
    }
}

/// Dispatcher for organization-scoped subscribers.
pub fn organization_dispatcher(
    registry: Arc<SubscriberRegistry<OrgContext>>,
    builder: NotificationBuilder,
    admission: Arc<OrgAdmission>,
) -> Dispatcher<OrgContext> {
    Dispatcher::new(
        registry,
        builder,
        DispatcherConfig {
            label: "organization".to_string(),
            index_key: Box::new(organization_index_key),
            should_receive: Box::new(move |subscriber: &OrgSubscriber, event: &ActivityEvent| {
                admission.should_receive(subscriber, event)
            }),
        },
    )
}
