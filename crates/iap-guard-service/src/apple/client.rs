//! Receipt verification client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::types::{
    is_retryable_status, VerifyReceiptRequest, VerifyReceiptResponse, STATUS_OK,
    STATUS_SANDBOX_RECEIPT,
};

/// Error type for receipt verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The verification service answered with a non-success HTTP status.
    #[error("verification service returned HTTP {0}")]
    Unavailable(u16),

    /// The platform reported a transient failure status.
    #[error("verification service temporarily failed with status {0}")]
    Retryable(i64),

    /// The platform refused the receipt.
    #[error("receipt rejected with status {0}")]
    Rejected(i64),
}

/// Checks a receipt with the payment platform.
#[async_trait]
pub trait ReceiptVerifier: Send + Sync {
    /// Verify a base64 receipt.
    ///
    /// Returns the verification response only when the platform accepted the
    /// receipt (status 0).
    async fn verify(&self, receipt_data: &str) -> Result<VerifyReceiptResponse, VerifyError>;
}

/// `verifyReceipt` client with a production and a sandbox endpoint.
#[derive(Debug, Clone)]
pub struct AppStoreClient {
    client: Client,
    production_url: String,
    sandbox_url: String,
    shared_secret: Option<String>,
}

impl AppStoreClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        production_url: impl Into<String>,
        sandbox_url: impl Into<String>,
        shared_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VerifyError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            production_url: production_url.into(),
            sandbox_url: sandbox_url.into(),
            shared_secret,
        })
    }

    async fn post(
        &self,
        url: &str,
        receipt_data: &str,
    ) -> Result<VerifyReceiptResponse, VerifyError> {
        let request = VerifyReceiptRequest {
            receipt_data,
            password: self.shared_secret.as_deref(),
            exclude_old_transactions: true,
        };

        let response = self.client.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(VerifyError::Unavailable(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ReceiptVerifier for AppStoreClient {
    async fn verify(&self, receipt_data: &str) -> Result<VerifyReceiptResponse, VerifyError> {
        let mut response = self.post(&self.production_url, receipt_data).await?;

        if response.status == STATUS_SANDBOX_RECEIPT {
            tracing::debug!("Sandbox receipt sent to production, retrying against sandbox");
            response = self.post(&self.sandbox_url, receipt_data).await?;
        }

        match response.status {
            STATUS_OK => Ok(response),
            status if is_retryable_status(status) => Err(VerifyError::Retryable(status)),
            status => Err(VerifyError::Rejected(status)),
        }
    }
}
