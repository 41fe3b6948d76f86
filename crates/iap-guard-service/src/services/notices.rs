//! User-facing notices.

use async_trait::async_trait;

use iap_guard_core::{GuardError, UserNotice};

/// Delivers a notice to the user (push, in-app inbox, email).
#[async_trait]
pub trait NoticeSender: Send + Sync {
    /// Deliver one notice.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::ExternalService` if delivery fails.
    async fn send(&self, notice: &UserNotice) -> Result<(), GuardError>;
}

/// Sender that only logs. Notices stay readable from the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNoticeSender;

#[async_trait]
impl NoticeSender for LogNoticeSender {
    async fn send(&self, notice: &UserNotice) -> Result<(), GuardError> {
        tracing::info!(
            user_id = %notice.user_id,
            notice_id = %notice.notice_id,
            kind = ?notice.kind,
            product_id = %notice.product_id,
            "User notice queued"
        );
        Ok(())
    }
}
