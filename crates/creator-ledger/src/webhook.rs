//! Processor Webhook Authentication
//!
//! Inbound notifications carry a `Processor-Signature` header of the form
//! `t=<unix seconds>,v1=<hex hmac>`, where the MAC is HMAC-SHA256 over
//! `"{t}.{raw body}"`. Verification must happen before the body is trusted.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use crate::error::{LedgerError, Result};
use crate::model::{Currency, PayoutStatus};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "processor-signature";

/// Payout status notification from the processor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessorNotification {
    /// Unique per delivery-worthy event; redeliveries reuse it
    pub event_id: String,
    pub payout_id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: Currency,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl ProcessorNotification {
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| LedgerError::WebhookParse(e.to_string()))
    }
}

/// Map a processor status string onto the local payout lifecycle
pub fn map_external_status(status: &str) -> Option<PayoutStatus> {
    match status.to_ascii_lowercase().as_str() {
        "pending" | "submitted" => Some(PayoutStatus::Submitted),
        "in_transit" => Some(PayoutStatus::InTransit),
        "paid" => Some(PayoutStatus::Paid),
        "failed" | "canceled" | "cancelled" | "returned" => Some(PayoutStatus::Failed),
        _ => None,
    }
}

fn mac(secret: &str, timestamp: i64, payload: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LedgerError::Config(format!("webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Build a signature header for `payload` (used by tests and local tooling)
pub fn sign(payload: &str, secret: &str, timestamp: i64) -> Result<String> {
    let signature = hex::encode(mac(secret, timestamp, payload)?.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Verify a webhook signature header against the raw payload
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    LedgerError::WebhookSignature("malformed timestamp".into())
                })?);
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| LedgerError::WebhookSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(LedgerError::WebhookSignature("missing v1 signature".into()));
    }

    let skew = now.timestamp().abs_diff(timestamp);
    if skew > tolerance.as_secs() {
        return Err(LedgerError::WebhookSignature(format!(
            "timestamp outside tolerance ({skew}s)"
        )));
    }

    let expected = mac(secret, timestamp, payload)?;
    let valid = signatures.iter().any(|candidate| {
        hex::decode(candidate).is_ok_and(|bytes| expected.clone().verify_slice(&bytes).is_ok())
    });

    if valid {
        Ok(())
    } else {
        Err(LedgerError::WebhookSignature("no matching signature".into()))
    }
}
