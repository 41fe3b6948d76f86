//! Entitlement projection for a user.
//!
//! `UserEntitlement` is what the rest of the application reads to decide
//! whether premium features are unlocked and whether the account is
//! suspended. The mutators on this type are pure; persistence and per-user
//! serialization happen in the service's entitlement updater.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PremiumTier, TransactionId, UserId};

/// Premium and suspension state of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntitlement {
    /// The user this entitlement belongs to.
    pub user_id: UserId,

    /// Whether premium features are unlocked.
    pub is_premium: bool,

    /// Active premium tier, if any.
    pub premium_tier: Option<PremiumTier>,

    /// When the current subscription period ends.
    pub subscription_expiry_date: Option<DateTime<Utc>>,

    /// Whether the subscription is set to auto-renew.
    pub auto_renew_enabled: bool,

    /// Whether the platform reported a billing grace period.
    pub in_grace_period: bool,

    /// Whether the account is suspended.
    pub suspended: bool,

    /// Reason recorded with the suspension.
    pub suspension_reason: Option<String>,

    /// Consumable balances keyed by item name.
    pub consumables: BTreeMap<String, u32>,

    /// Transactions whose grant has already been applied.
    pub applied_transactions: BTreeSet<TransactionId>,

    /// When the entitlement was last changed.
    pub updated_at: DateTime<Utc>,
}

impl UserEntitlement {
    /// Create an empty (free, not suspended) entitlement.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            is_premium: false,
            premium_tier: None,
            subscription_expiry_date: None,
            auto_renew_enabled: false,
            in_grace_period: false,
            suspended: false,
            suspension_reason: None,
            consumables: BTreeMap::new(),
            applied_transactions: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Whether the grant for `transaction_id` was already applied.
    #[must_use]
    pub fn has_applied(&self, transaction_id: &TransactionId) -> bool {
        self.applied_transactions.contains(transaction_id)
    }

    /// Grant a subscription tier for a transaction.
    ///
    /// Returns `false` when the transaction was already applied. The expiry
    /// never moves backwards so an older receipt cannot shorten a newer
    /// subscription.
    pub fn grant_subscription(
        &mut self,
        transaction_id: &TransactionId,
        tier: PremiumTier,
        expiry: Option<DateTime<Utc>>,
        auto_renew: bool,
    ) -> bool {
        if !self.applied_transactions.insert(transaction_id.clone()) {
            return false;
        }

        self.is_premium = true;
        self.premium_tier = Some(tier);
        self.subscription_expiry_date = match (self.subscription_expiry_date, expiry) {
            (Some(current), Some(new)) => Some(current.max(new)),
            (current, new) => new.or(current),
        };
        self.auto_renew_enabled = auto_renew;
        self.in_grace_period = false;
        self.touch();
        true
    }

    /// Grant a consumable quantity for a transaction.
    ///
    /// Returns `false` when the transaction was already applied.
    pub fn grant_consumable(
        &mut self,
        transaction_id: &TransactionId,
        item: &str,
        quantity: u32,
    ) -> bool {
        if !self.applied_transactions.insert(transaction_id.clone()) {
            return false;
        }

        let balance = self.consumables.entry(item.to_string()).or_insert(0);
        *balance = balance.saturating_add(quantity);
        self.touch();
        true
    }

    /// Move the subscription expiry forward to `expiry`. An earlier date
    /// (a renewal delivered out of order) is ignored.
    pub fn extend_expiry(&mut self, expiry: DateTime<Utc>) -> bool {
        if self.subscription_expiry_date.is_some_and(|current| current >= expiry) {
            return false;
        }
        self.subscription_expiry_date = Some(expiry);
        self.touch();
        true
    }

    /// Restore premium for a tier (billing recovery).
    pub fn restore_premium(&mut self, tier: PremiumTier) -> bool {
        if self.is_premium && self.premium_tier == Some(tier) && !self.in_grace_period {
            return false;
        }
        self.is_premium = true;
        self.premium_tier = Some(tier);
        self.in_grace_period = false;
        self.touch();
        true
    }

    /// Clear premium state.
    pub fn clear_premium(&mut self) -> bool {
        if !self.is_premium && self.premium_tier.is_none() {
            return false;
        }
        self.is_premium = false;
        self.premium_tier = None;
        self.touch();
        true
    }

    /// Set the billing grace period flag.
    pub fn set_grace_period(&mut self, in_grace_period: bool) -> bool {
        if self.in_grace_period == in_grace_period {
            return false;
        }
        self.in_grace_period = in_grace_period;
        self.touch();
        true
    }

    /// Set the auto-renew flag.
    pub fn set_auto_renew(&mut self, enabled: bool) -> bool {
        if self.auto_renew_enabled == enabled {
            return false;
        }
        self.auto_renew_enabled = enabled;
        self.touch();
        true
    }

    /// Suspend the account. The first recorded reason is kept.
    pub fn suspend(&mut self, reason: &str) -> bool {
        if self.suspended {
            return false;
        }
        self.suspended = true;
        self.suspension_reason = Some(reason.to_string());
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
