//! Receipt validation and entitlement handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use iap_guard_core::UserEntitlement;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::services::ValidationRequest;
use crate::state::AppState;

/// Receipt validation request.
#[derive(Debug, Deserialize)]
pub struct ValidateReceiptRequest {
    /// Base64 receipt from the device.
    pub receipt_data: String,
    /// Product the client purchased.
    pub product_id: String,
    /// Device identifier.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Device compromise risk in `0..=1`.
    #[serde(default)]
    pub jailbreak_risk: Option<f64>,
}

/// Receipt validation response.
#[derive(Debug, Serialize)]
pub struct ValidateReceiptResponse {
    /// Always `true`; failures are error responses.
    pub success: bool,
    /// Ledger record id.
    pub purchase_id: String,
    /// Platform transaction id.
    pub transaction_id: String,
    /// Subscription expiry (RFC 3339).
    pub expiry_date: Option<String>,
    /// Composite fraud score.
    pub fraud_score: u8,
}

/// Validate a purchase receipt and grant the entitlement.
pub async fn validate_receipt(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<ValidateReceiptRequest>,
) -> Result<Json<ValidateReceiptResponse>, ApiError> {
    if req.receipt_data.trim().is_empty() {
        return Err(ApiError::invalid_argument("receipt_data is required"));
    }
    if req.product_id.trim().is_empty() {
        return Err(ApiError::invalid_argument("product_id is required"));
    }
    if let Some(risk) = req.jailbreak_risk {
        if !(0.0..=1.0).contains(&risk) {
            return Err(ApiError::invalid_argument(
                "jailbreak_risk must be between 0 and 1",
            ));
        }
    }

    let outcome = state
        .validator
        .validate(&ValidationRequest {
            user_id: auth.user_id,
            receipt_data: req.receipt_data,
            product_id: req.product_id,
            device_id: req.device_id.filter(|d| !d.is_empty()),
            jailbreak_risk: req.jailbreak_risk,
        })
        .await?;

    Ok(Json(ValidateReceiptResponse {
        success: true,
        purchase_id: outcome.purchase_id.to_string(),
        transaction_id: outcome.transaction_id.to_string(),
        expiry_date: outcome.expiry_date.map(|d| d.to_rfc3339()),
        fraud_score: outcome.fraud_score,
    }))
}

/// Entitlement projection for the client.
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    /// User ID.
    pub user_id: String,
    /// Whether premium features are unlocked.
    pub is_premium: bool,
    /// Active tier.
    pub premium_tier: Option<String>,
    /// Subscription expiry (RFC 3339).
    pub subscription_expiry_date: Option<String>,
    /// Whether the subscription renews.
    pub auto_renew_enabled: bool,
    /// Whether billing is in its grace period.
    pub in_grace_period: bool,
    /// Whether the account is suspended.
    pub suspended: bool,
    /// Consumable balances.
    pub consumables: BTreeMap<String, u32>,
}

impl From<&UserEntitlement> for EntitlementResponse {
    fn from(e: &UserEntitlement) -> Self {
        Self {
            user_id: e.user_id.to_string(),
            is_premium: e.is_premium,
            premium_tier: e.premium_tier.map(|t| t.as_str().to_string()),
            subscription_expiry_date: e.subscription_expiry_date.map(|d| d.to_rfc3339()),
            auto_renew_enabled: e.auto_renew_enabled,
            in_grace_period: e.in_grace_period,
            suspended: e.suspended,
            consumables: e.consumables.clone(),
        }
    }
}

/// Get the caller's entitlement. Users without one get the free projection.
pub async fn get_entitlement(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<EntitlementResponse>, ApiError> {
    let entitlement = state
        .store
        .get_entitlement(&auth.user_id)?
        .unwrap_or_else(|| UserEntitlement::new(auth.user_id));

    Ok(Json(EntitlementResponse::from(&entitlement)))
}
