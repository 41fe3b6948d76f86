//! Payment platform notification types.
//!
//! Notification types arrive as strings; they are parsed into closed enums
//! so dispatch is an exhaustive `match`. Anything unrecognized is kept
//! verbatim in the `Unknown` variant for logging.

use std::fmt;

/// Subscription lifecycle notification type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationType {
    /// A new subscription started.
    Subscribed,
    /// The subscription renewed.
    DidRenew,
    /// A renewal failed.
    DidFailToRenew,
    /// The user toggled auto-renew.
    DidChangeRenewalStatus,
    /// The subscription expired.
    Expired,
    /// The billing grace period ended without recovery.
    GracePeriodExpired,
    /// Family sharing access was revoked.
    Revoke,
    /// The platform refunded the transaction.
    Refund,
    /// The platform asks for consumption data for a refund request.
    ConsumptionRequest,
    /// The renewal date was extended.
    RenewalExtended,
    /// A price increase was announced or accepted.
    PriceIncrease,
    /// A refund request was declined.
    RefundDeclined,
    /// Connectivity test from the platform.
    Test,
    /// Anything else, kept for logging.
    Unknown(String),
}

impl NotificationType {
    /// Parse a wire value. Never fails.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "SUBSCRIBED" => Self::Subscribed,
            "DID_RENEW" => Self::DidRenew,
            "DID_FAIL_TO_RENEW" => Self::DidFailToRenew,
            "DID_CHANGE_RENEWAL_STATUS" => Self::DidChangeRenewalStatus,
            "EXPIRED" => Self::Expired,
            "GRACE_PERIOD_EXPIRED" => Self::GracePeriodExpired,
            "REVOKE" => Self::Revoke,
            "REFUND" => Self::Refund,
            "CONSUMPTION_REQUEST" => Self::ConsumptionRequest,
            "RENEWAL_EXTENDED" => Self::RenewalExtended,
            "PRICE_INCREASE" => Self::PriceIncrease,
            "REFUND_DECLINED" => Self::RefundDeclined,
            "TEST" => Self::Test,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Subscribed => "SUBSCRIBED",
            Self::DidRenew => "DID_RENEW",
            Self::DidFailToRenew => "DID_FAIL_TO_RENEW",
            Self::DidChangeRenewalStatus => "DID_CHANGE_RENEWAL_STATUS",
            Self::Expired => "EXPIRED",
            Self::GracePeriodExpired => "GRACE_PERIOD_EXPIRED",
            Self::Revoke => "REVOKE",
            Self::Refund => "REFUND",
            Self::ConsumptionRequest => "CONSUMPTION_REQUEST",
            Self::RenewalExtended => "RENEWAL_EXTENDED",
            Self::PriceIncrease => "PRICE_INCREASE",
            Self::RefundDeclined => "REFUND_DECLINED",
            Self::Test => "TEST",
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification subtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationSubtype {
    /// Auto-renew switched on.
    AutoRenewEnabled,
    /// Auto-renew switched off.
    AutoRenewDisabled,
    /// Renewal failed but the user is in a billing grace period.
    GracePeriod,
    /// A previously failed renewal succeeded.
    BillingRecovery,
    /// Price increase awaiting user consent.
    Pending,
    /// Price increase accepted.
    Accepted,
    /// Any other subtype.
    Other(String),
}

impl NotificationSubtype {
    /// Parse a wire value. Never fails.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "AUTO_RENEW_ENABLED" => Self::AutoRenewEnabled,
            "AUTO_RENEW_DISABLED" => Self::AutoRenewDisabled,
            "GRACE_PERIOD" => Self::GracePeriod,
            "BILLING_RECOVERY" => Self::BillingRecovery,
            "PENDING" => Self::Pending,
            "ACCEPTED" => Self::Accepted,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::AutoRenewEnabled => "AUTO_RENEW_ENABLED",
            Self::AutoRenewDisabled => "AUTO_RENEW_DISABLED",
            Self::GracePeriod => "GRACE_PERIOD",
            Self::BillingRecovery => "BILLING_RECOVERY",
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for NotificationSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
