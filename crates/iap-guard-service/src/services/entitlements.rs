//! Entitlement updates.
//!
//! The single writer of [`UserEntitlement`] records. Callers that run a
//! multi-step flow hold the user's lock from [`UserLocks`](crate::locks::UserLocks);
//! each individual update is atomic in the store.

use std::sync::Arc;

use iap_guard_core::{
    GuardError, ProductCatalog, ProductKind, TransactionFacts, UserEntitlement, UserId,
};
use iap_guard_store::{Mutation, Store};

/// Applies grants and lifecycle transitions to user entitlements.
#[derive(Clone)]
pub struct EntitlementUpdater {
    store: Arc<dyn Store>,
    catalog: Arc<ProductCatalog>,
}

impl EntitlementUpdater {
    /// Create an updater.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, catalog: Arc<ProductCatalog>) -> Self {
        Self { store, catalog }
    }

    /// The product catalog grants are resolved against.
    #[must_use]
    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    /// Grant what a validated transaction unlocks.
    ///
    /// Applying the same transaction twice changes nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::UnknownProduct` if the product is not in the
    /// catalog, or `GuardError::Storage` if the write fails.
    pub fn grant(
        &self,
        user_id: &UserId,
        facts: &TransactionFacts,
    ) -> Result<Mutation<UserEntitlement>, GuardError> {
        let kind = self
            .catalog
            .get(&facts.product_id)
            .ok_or_else(|| GuardError::UnknownProduct(facts.product_id.clone()))?;

        let mutation = self.update(user_id, &mut |entitlement| match kind {
            ProductKind::Subscription { tier } => entitlement.grant_subscription(
                &facts.transaction_id,
                *tier,
                facts.expiry_date,
                facts.auto_renew_status,
            ),
            ProductKind::Consumable { item, quantity } => {
                entitlement.grant_consumable(&facts.transaction_id, item, *quantity)
            }
        })?;

        if mutation.changed {
            tracing::info!(
                user_id = %user_id,
                transaction_id = %facts.transaction_id,
                product_id = %facts.product_id,
                "Entitlement granted"
            );
        } else {
            tracing::debug!(
                user_id = %user_id,
                transaction_id = %facts.transaction_id,
                "Grant already applied"
            );
        }
        Ok(mutation)
    }

    /// Apply an arbitrary transition. `apply` returns whether it changed
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Storage` if the write fails.
    pub fn update(
        &self,
        user_id: &UserId,
        apply: &mut dyn FnMut(&mut UserEntitlement) -> bool,
    ) -> Result<Mutation<UserEntitlement>, GuardError> {
        Ok(self.store.update_entitlement(user_id, apply)?)
    }
}
