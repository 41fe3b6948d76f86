//! Product catalog.
//!
//! Maps store product identifiers to what a purchase unlocks.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Premium subscription tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumTier {
    /// Standard premium: unlimited likes, see who liked you.
    Premium,

    /// VIP: premium plus priority placement.
    Vip,
}

impl PremiumTier {
    /// Wire name of the tier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Vip => "vip",
        }
    }
}

impl fmt::Display for PremiumTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a product grants when purchased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductKind {
    /// Auto-renewable subscription granting a tier.
    Subscription {
        /// Tier unlocked while the subscription is active.
        tier: PremiumTier,
    },

    /// One-off pack of consumable items.
    Consumable {
        /// Item name (e.g. `boost`).
        item: String,
        /// Quantity granted per purchase.
        quantity: u32,
    },
}

/// Product identifier to grant mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCatalog {
    products: HashMap<String, ProductKind>,
}

impl ProductCatalog {
    /// Create a catalog from explicit entries.
    #[must_use]
    pub fn new(products: impl IntoIterator<Item = (String, ProductKind)>) -> Self {
        Self {
            products: products.into_iter().collect(),
        }
    }

    /// Look up a product.
    #[must_use]
    pub fn get(&self, product_id: &str) -> Option<&ProductKind> {
        self.products.get(product_id)
    }

    /// Tier granted by a subscription product, if it is one.
    #[must_use]
    pub fn tier_for(&self, product_id: &str) -> Option<PremiumTier> {
        match self.get(product_id)? {
            ProductKind::Subscription { tier } => Some(*tier),
            ProductKind::Consumable { .. } => None,
        }
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        let subscription = |tier| ProductKind::Subscription { tier };
        let consumable = |item: &str, quantity| ProductKind::Consumable {
            item: item.to_string(),
            quantity,
        };

        Self::new([
            ("premium_monthly".to_string(), subscription(PremiumTier::Premium)),
            ("premium_yearly".to_string(), subscription(PremiumTier::Premium)),
            ("vip_monthly".to_string(), subscription(PremiumTier::Vip)),
            ("boost_pack_5".to_string(), consumable("boost", 5)),
            ("super_likes_10".to_string(), consumable("super_like", 10)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_maps_premium_monthly() {
        let catalog = ProductCatalog::default();
        assert_eq!(catalog.tier_for("premium_monthly"), Some(PremiumTier::Premium));
        assert_eq!(catalog.tier_for("vip_monthly"), Some(PremiumTier::Vip));
        assert_eq!(catalog.tier_for("boost_pack_5"), None);
        assert!(catalog.get("unknown").is_none());
    }

    #[test]
    fn product_kind_json_shape() {
        let kind: ProductKind =
            serde_json::from_str(r#"{"kind":"consumable","item":"boost","quantity":3}"#).unwrap();
        assert_eq!(
            kind,
            ProductKind::Consumable {
                item: "boost".into(),
                quantity: 3
            }
        );
    }
}
