//! Payout Processor Integration
//!
//! Abstraction over the external system that actually moves money.

mod http;
mod mock;

pub use http::{HttpPayoutProcessor, HttpProcessorConfig};
pub use mock::MockPayoutProcessor;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Currency;

/// Outbound payout instruction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSubmission {
    pub external_account_id: String,
    pub amount: Decimal,
    pub currency: Currency,

    /// Stable across retries so the processor creates at most one payout
    pub idempotency_key: String,
}

/// Processor acknowledgement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorReceipt {
    pub external_payout_id: String,
}

/// Submission failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// Refused outright; retrying will not help
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network failure, timeout or 5xx
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl SubmissionError {
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Payout processor trait (Strategy pattern)
///
/// Implement this for each processor backend.
#[async_trait]
pub trait PayoutProcessor: Send + Sync {
    /// Submit a payout; returns the processor's payout id on acceptance
    async fn submit_payout(
        &self,
        submission: &PayoutSubmission,
    ) -> Result<ProcessorReceipt, SubmissionError>;

    /// Processor name
    fn name(&self) -> &str;
}
