//! HTTP Payout Processor
//!
//! Talks to a processor exposing `POST /v1/payouts` with bearer auth and an
//! `Idempotency-Key` header.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{PayoutProcessor, PayoutSubmission, ProcessorReceipt, SubmissionError};
use crate::error::{LedgerError, Result};

/// HTTP processor configuration
#[derive(Clone, Debug)]
pub struct HttpProcessorConfig {
    /// Base URL, e.g. `https://api.processor.example`
    pub base_url: String,

    /// Secret API key
    pub api_key: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl HttpProcessorConfig {
    /// Create from environment variables; None when no processor is configured
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("PROCESSOR_BASE_URL").ok()?;
        let api_key = std::env::var("PROCESSOR_API_KEY").unwrap_or_default();
        let timeout_secs = std::env::var("PROCESSOR_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
            .unwrap_or(15);

        Some(Self {
            base_url,
            api_key,
            timeout_secs,
        })
    }
}

#[derive(Serialize)]
struct CreatePayoutBody<'a> {
    destination: &'a str,
    amount: String,
    currency: &'a str,
}

#[derive(Deserialize)]
struct CreatePayoutResponse {
    id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResponseClass {
    Accepted,
    /// Worth retrying with the same idempotency key
    Transient,
    Refused,
}

fn classify(status: StatusCode) -> ResponseClass {
    if status.is_success() {
        ResponseClass::Accepted
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ResponseClass::Transient
    } else {
        ResponseClass::Refused
    }
}

/// An accepted response we cannot read may still have created the payout,
/// so it is retried under the same key rather than treated as refused.
fn parse_receipt(body: &str) -> std::result::Result<ProcessorReceipt, SubmissionError> {
    let created: CreatePayoutResponse = serde_json::from_str(body)
        .map_err(|e| SubmissionError::Unavailable(format!("unreadable response: {e}")))?;

    Ok(ProcessorReceipt {
        external_payout_id: created.id,
    })
}

/// Processor client over HTTP
pub struct HttpPayoutProcessor {
    client: reqwest::Client,
    config: HttpProcessorConfig,
}

impl HttpPayoutProcessor {
    pub fn new(config: HttpProcessorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::Config(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn payouts_url(&self) -> String {
        format!("{}/v1/payouts", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PayoutProcessor for HttpPayoutProcessor {
    async fn submit_payout(
        &self,
        submission: &PayoutSubmission,
    ) -> std::result::Result<ProcessorReceipt, SubmissionError> {
        let body = CreatePayoutBody {
            destination: &submission.external_account_id,
            amount: submission.amount.to_string(),
            currency: submission.currency.as_str(),
        };

        let response = self
            .client
            .post(self.payouts_url())
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", &submission.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SubmissionError::Unavailable(e.to_string()))?;

        let status = response.status();
        // An unreadable body on success falls through to parse_receipt as transient
        let body = response.text().await.unwrap_or_default();

        match classify(status) {
            ResponseClass::Accepted => parse_receipt(&body),
            ResponseClass::Transient => Err(SubmissionError::Unavailable(format!(
                "processor returned {status}"
            ))),
            ResponseClass::Refused => Err(SubmissionError::Rejected(format!("{status}: {body}"))),
        }
    }

    fn name(&self) -> &str {
        "HttpProcessor"
    }
}
