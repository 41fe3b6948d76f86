//! Admin review handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use iap_guard_core::{AdminAlert, FlaggedTransaction, ReviewDecision, TransactionId, UserId};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::services::{RefundReport, UserRiskSummary};
use crate::state::AppState;

/// Upper bound for `limit` query parameters.
const MAX_LIMIT: usize = 500;

fn default_limit() -> usize {
    50
}

fn default_period_days() -> u32 {
    30
}

/// Query with a result limit.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    /// Maximum number of items (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Pending flagged transactions.
#[derive(Debug, Serialize)]
pub struct ListFlaggedResponse {
    /// Highest score first.
    pub flagged: Vec<FlaggedTransaction>,
}

/// List flagged transactions awaiting review.
pub async fn list_flagged(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ListFlaggedResponse>, ApiError> {
    let flagged = state.review.list_pending(query.limit.min(MAX_LIMIT))?;
    Ok(Json(ListFlaggedResponse { flagged }))
}

/// Reviewer decision on the wire.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionInput {
    /// Keep the purchase.
    Approve,
    /// Reject the purchase and suspend the user.
    Reject,
}

impl From<DecisionInput> for ReviewDecision {
    fn from(input: DecisionInput) -> Self {
        match input {
            DecisionInput::Approve => Self::Approved,
            DecisionInput::Reject => Self::Rejected,
        }
    }
}

/// Review request.
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    /// Flagged transaction.
    pub transaction_id: String,
    /// `approve` or `reject`.
    pub decision: DecisionInput,
    /// Free-form note for the audit trail.
    #[serde(default)]
    pub admin_note: Option<String>,
}

/// Review result.
#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    /// Whether the decision was recorded.
    pub success: bool,
    /// The reviewed transaction.
    pub flagged: FlaggedTransaction,
}

/// Record a decision on a flagged transaction.
pub async fn review_flagged(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>, ApiError> {
    let transaction_id = TransactionId::new(req.transaction_id)
        .map_err(|e| ApiError::invalid_argument(e.to_string()))?;

    let flagged = state
        .review
        .review(
            &transaction_id,
            req.decision.into(),
            req.admin_note,
            &admin.admin_id,
        )
        .await?;

    Ok(Json(ReviewResponse {
        success: true,
        flagged,
    }))
}

/// Refund history query.
#[derive(Debug, Deserialize)]
pub struct RefundsQuery {
    /// Maximum number of entries (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Look-back window in days (default: 30).
    #[serde(default = "default_period_days")]
    pub period_days: u32,
}

/// Refund history with per-user counts.
pub async fn list_refunds(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<RefundsQuery>,
) -> Result<Json<RefundReport>, ApiError> {
    let report = state
        .review
        .refund_history(query.period_days, query.limit.min(MAX_LIMIT))?;
    Ok(Json(report))
}

/// Unacknowledged alerts.
#[derive(Debug, Serialize)]
pub struct ListAlertsResponse {
    /// Newest first.
    pub alerts: Vec<AdminAlert>,
}

/// List unacknowledged alerts.
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<LimitQuery>,
) -> Result<Json<ListAlertsResponse>, ApiError> {
    let alerts = state.review.alerts(query.limit.min(MAX_LIMIT))?;
    Ok(Json(ListAlertsResponse { alerts }))
}

/// Risk summary for one user.
pub async fn get_user_summary(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<UserRiskSummary>, ApiError> {
    let user_id = user_id
        .parse::<UserId>()
        .map_err(|e| ApiError::invalid_argument(e.to_string()))?;

    Ok(Json(state.review.user_summary(&user_id)?))
}
