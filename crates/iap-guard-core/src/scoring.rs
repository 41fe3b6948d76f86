//! Fraud scoring for purchases.
//!
//! The score is a composite of independent risk signals, each mapped to a
//! bounded component and summed into `0..=100`. Every component is
//! non-decreasing in its signal, so raising any one signal never lowers the
//! total. Scoring does no I/O; the service gathers the signals.

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Highest possible score.
pub const MAX_SCORE: u8 = 100;

/// Default score at or above which a purchase is queued for review.
pub const DEFAULT_REVIEW_THRESHOLD: u8 = 50;

/// Default score at or above which a purchase is rejected.
pub const DEFAULT_HARD_REJECT_THRESHOLD: u8 = 75;

/// Weights and thresholds for the fraud scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudPolicy {
    /// Score at or above which a FlaggedTransaction is created.
    pub review_threshold: u8,

    /// Score at or above which the purchase is blocked.
    pub hard_reject_threshold: u8,

    /// Points at jailbreak risk 1.0.
    pub device_integrity_weight: u32,

    /// Points when a trial/promo is started on a device other accounts already used.
    pub promotional_abuse_weight: u32,

    /// Other accounts on the same device needed to count as trial abuse.
    pub trial_abuse_min_accounts: u32,

    /// Points at `refund_saturation` refunds.
    pub refund_weight: u32,

    /// Refund count at which the refund component is maxed out.
    pub refund_saturation: u32,

    /// Points at `velocity_saturation` purchases above baseline.
    pub velocity_weight: u32,

    /// Purchases per window considered normal.
    pub velocity_baseline: u32,

    /// Purchases above baseline at which the velocity component is maxed out.
    pub velocity_saturation: u32,

    /// Length of the velocity window in seconds.
    pub velocity_window_seconds: i64,

    /// Points at `fraud_history_saturation` prior critical events.
    pub fraud_history_weight: u32,

    /// Prior critical events at which the history component is maxed out.
    pub fraud_history_saturation: u32,
}

impl Default for FraudPolicy {
    fn default() -> Self {
        Self {
            review_threshold: DEFAULT_REVIEW_THRESHOLD,
            hard_reject_threshold: DEFAULT_HARD_REJECT_THRESHOLD,
            device_integrity_weight: 40,
            promotional_abuse_weight: 20,
            trial_abuse_min_accounts: 1,
            refund_weight: 20,
            refund_saturation: 3,
            velocity_weight: 20,
            velocity_baseline: 3,
            velocity_saturation: 5,
            velocity_window_seconds: 3600,
            fraud_history_weight: 10,
            fraud_history_saturation: 2,
        }
    }
}

/// Raw risk signals for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FraudSignals {
    /// Client-reported jailbreak/root risk, `0.0..=1.0`.
    pub jailbreak_risk: f64,

    /// Whether the transaction is a trial or promotional offer.
    pub introductory_offer: bool,

    /// Other accounts that started a trial/promo from the same device.
    pub other_accounts_on_device: u32,

    /// Lifetime refunds for the user.
    pub refund_count: u32,

    /// Purchases by the user inside the velocity window, including this one.
    pub purchases_in_window: u32,

    /// Prior `critical` fraud log entries for the user.
    pub prior_critical_events: u32,
}

/// Per-signal contribution to the score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Device integrity component.
    pub device_integrity: u32,
    /// Trial/promo abuse component.
    pub promotional_abuse: u32,
    /// Refund history component.
    pub refund_history: u32,
    /// Purchase velocity component.
    pub velocity: u32,
    /// Prior fraud component.
    pub fraud_history: u32,
}

impl ScoreBreakdown {
    fn total(&self) -> u32 {
        self.device_integrity
            .saturating_add(self.promotional_abuse)
            .saturating_add(self.refund_history)
            .saturating_add(self.velocity)
            .saturating_add(self.fraud_history)
    }
}

/// What to do with a scored purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Grant normally.
    Accept,
    /// Grant and queue for human review.
    Review,
    /// Block the purchase.
    Reject,
}

/// Result of scoring a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudAssessment {
    /// Composite score, `0..=100`.
    pub score: u8,
    /// Contribution of each signal before clamping.
    pub breakdown: ScoreBreakdown,
    /// Decision derived from the policy thresholds.
    pub verdict: Verdict,
}

impl FraudPolicy {
    /// Check that the thresholds are ordered and in range.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Configuration` if `review_threshold` exceeds
    /// `hard_reject_threshold`, the reject threshold exceeds 100, or the
    /// velocity window is not positive.
    pub fn validate(&self) -> Result<()> {
        if self.hard_reject_threshold > MAX_SCORE {
            return Err(GuardError::Configuration(format!(
                "hard_reject_threshold {} exceeds {MAX_SCORE}",
                self.hard_reject_threshold
            )));
        }
        if self.review_threshold > self.hard_reject_threshold {
            return Err(GuardError::Configuration(format!(
                "review_threshold {} exceeds hard_reject_threshold {}",
                self.review_threshold, self.hard_reject_threshold
            )));
        }
        if self.velocity_window_seconds <= 0 {
            return Err(GuardError::Configuration(
                "velocity_window_seconds must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Map a score onto a verdict.
    #[must_use]
    pub const fn verdict(&self, score: u8) -> Verdict {
        if score >= self.hard_reject_threshold {
            Verdict::Reject
        } else if score >= self.review_threshold {
            Verdict::Review
        } else {
            Verdict::Accept
        }
    }

    /// Score a transaction. Deterministic for fixed inputs.
    #[must_use]
    pub fn assess(&self, signals: &FraudSignals) -> FraudAssessment {
        let breakdown = self.breakdown(signals);
        let score = u8::try_from(breakdown.total().min(u32::from(MAX_SCORE))).unwrap_or(MAX_SCORE);

        FraudAssessment {
            score,
            breakdown,
            verdict: self.verdict(score),
        }
    }

    /// Compute each component separately.
    #[must_use]
    pub fn breakdown(&self, signals: &FraudSignals) -> ScoreBreakdown {
        let promotional_abuse = if signals.introductory_offer
            && signals.other_accounts_on_device >= self.trial_abuse_min_accounts.max(1)
        {
            self.promotional_abuse_weight
        } else {
            0
        };

        ScoreBreakdown {
            device_integrity: device_component(self.device_integrity_weight, signals.jailbreak_risk),
            promotional_abuse,
            refund_history: scaled(
                self.refund_weight,
                signals.refund_count,
                self.refund_saturation,
            ),
            velocity: scaled(
                self.velocity_weight,
                signals
                    .purchases_in_window
                    .saturating_sub(self.velocity_baseline),
                self.velocity_saturation,
            ),
            fraud_history: scaled(
                self.fraud_history_weight,
                signals.prior_critical_events,
                self.fraud_history_saturation,
            ),
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn device_component(weight: u32, risk: f64) -> u32 {
    let risk = if risk.is_nan() { 0.0 } else { risk.clamp(0.0, 1.0) };
    (risk * f64::from(weight)).round() as u32
}

/// `weight * min(value, saturation) / saturation`, integer arithmetic.
fn scaled(weight: u32, value: u32, saturation: u32) -> u32 {
    if saturation == 0 {
        return if value > 0 { weight } else { 0 };
    }
    let value = u64::from(value.min(saturation));
    let points = u64::from(weight) * value / u64::from(saturation);
    u32::try_from(points).unwrap_or(weight)
}
