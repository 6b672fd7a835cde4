//! Post-login synchronisation of access groups and contact groups.
//!
//! Access groups and the contact group are reconciled in two separate
//! transactions. Either may fail and roll back on its own; failures are
//! logged and never reach the caller, so authorization can lag behind a
//! successful login.

use std::sync::Arc;

use crate::models::{AccessGroup, Contact, ContactGroup};
use crate::services::providers::Provider;
use crate::services::repositories::{AclStore, AclTransaction};
use crate::services::ServiceError;

#[derive(Clone)]
pub struct AclUpdater {
    store: Arc<dyn AclStore>,
}

impl AclUpdater {
    pub fn new(store: Arc<dyn AclStore>) -> Self {
        Self { store }
    }

    pub async fn update_for_provider_and_user(&self, provider: &dyn Provider, user: &Contact) {
        if !provider.is_update_acl_supported() {
            return;
        }
        let Some(claims_provider) = provider.as_claims_provider() else {
            tracing::warn!(
                provider_name = %provider.configuration().name,
                "Provider supports ACL updates but carries no claims"
            );
            return;
        };

        let access_groups = claims_provider.access_groups_from_claims();
        if let Err(e) = self
            .replace_access_groups(user.contact_id, &access_groups)
            .await
        {
            tracing::error!(
                contact_id = user.contact_id,
                error = %e,
                "Access group synchronisation failed"
            );
        } else {
            tracing::debug!(
                contact_id = user.contact_id,
                access_groups = access_groups.len(),
                "Access groups synchronised"
            );
        }

        if let Some(contact_group) = claims_provider.contact_group() {
            if let Err(e) = self
                .replace_contact_group(user.contact_id, contact_group)
                .await
            {
                tracing::error!(
                    contact_id = user.contact_id,
                    error = %e,
                    "Contact group synchronisation failed"
                );
            }
        }
    }

    async fn replace_access_groups(
        &self,
        contact_id: i64,
        access_groups: &[AccessGroup],
    ) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await.map_err(acl_sync)?;
        let applied = match tx.delete_access_groups_for_user(contact_id).await {
            Ok(()) => {
                tx.insert_access_groups_for_user(contact_id, access_groups)
                    .await
            }
            Err(e) => Err(e),
        };
        finish(tx, applied).await
    }

    async fn replace_contact_group(
        &self,
        contact_id: i64,
        contact_group: &ContactGroup,
    ) -> Result<(), ServiceError> {
        let mut tx = self.store.begin().await.map_err(acl_sync)?;
        let applied = match tx.delete_contact_groups_for_user(contact_id).await {
            Ok(()) => {
                tx.insert_contact_group_for_user(contact_id, contact_group)
                    .await
            }
            Err(e) => Err(e),
        };
        finish(tx, applied).await
    }
}

/// Commit on success, roll back otherwise.
async fn finish(
    tx: Box<dyn AclTransaction>,
    applied: Result<(), ServiceError>,
) -> Result<(), ServiceError> {
    match applied {
        Ok(()) => tx.commit().await.map_err(acl_sync),
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::error!(error = %rollback_error, "ACL rollback failed");
            }
            Err(acl_sync(e))
        }
    }
}

fn acl_sync(e: ServiceError) -> ServiceError {
    match e {
        e @ ServiceError::AclSync(_) => e,
        other => ServiceError::AclSync(other.to_string()),
    }
}
