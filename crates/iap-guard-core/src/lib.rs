//! Core types and utilities for iap-guard.
//!
//! This crate provides the foundational types used throughout the in-app
//! purchase protection service:
//!
//! - **Identifiers**: `UserId`, `TransactionId`, `RecordId`
//! - **Ledger**: `PurchaseRecord`, `TransactionFacts`
//! - **Entitlements**: `UserEntitlement`, `PremiumTier`, `ProductCatalog`
//! - **Audit**: `FraudLogEntry`, `RefundHistoryEntry`, `FlaggedTransaction`, `AdminAlert`
//! - **Scoring**: `FraudPolicy`, `FraudSignals`, `FraudAssessment`
//! - **Notifications**: `NotificationType`, `NotificationSubtype`
//!
//! # Fraud score
//!
//! Scores are integers in `0..=100`. With the default policy a score of 50
//! or more queues the purchase for review and 75 or more blocks it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod entitlement;
pub mod error;
pub mod fraud;
pub mod ids;
pub mod notification;
pub mod purchase;
pub mod scoring;

pub use catalog::{PremiumTier, ProductCatalog, ProductKind};
pub use entitlement::UserEntitlement;
pub use error::{GuardError, Result};
pub use fraud::{
    AdminAlert, AlertPriority, FlaggedTransaction, FraudEventType, FraudLogEntry, NoticeKind,
    RefundHistoryEntry, ReviewDecision, Severity, UserNotice,
};
pub use ids::{IdError, RecordId, TransactionId, UserId};
pub use notification::{NotificationSubtype, NotificationType};
pub use purchase::{PurchaseRecord, TransactionFacts};
pub use scoring::{
    FraudAssessment, FraudPolicy, FraudSignals, ScoreBreakdown, Verdict,
    DEFAULT_HARD_REJECT_THRESHOLD, DEFAULT_REVIEW_THRESHOLD, MAX_SCORE,
};
