//! API handlers.

pub mod admin;
pub mod health;
pub mod receipts;
pub mod webhooks;
