//! Configuration
//!
//! Policy constants and service settings, read from the environment.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LedgerError, Result};

/// Payout handler policy
#[derive(Clone, Debug)]
pub struct PayoutPolicy {
    /// Smallest payout a creator may request
    pub minimum_payout_amount: Decimal,

    /// Non-terminal payouts allowed per creator at once
    pub max_concurrent_pending_payouts: usize,

    /// Total submission attempts before giving up
    pub submit_max_attempts: u32,

    /// Delay before the first retry; doubles each retry
    pub submit_initial_backoff: Duration,
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        Self {
            minimum_payout_amount: dec!(25),
            max_concurrent_pending_payouts: 3,
            submit_max_attempts: 3,
            submit_initial_backoff: Duration::from_millis(200),
        }
    }
}

impl PayoutPolicy {
    /// Reject settings under which no payout could ever succeed
    pub fn validate(&self) -> Result<()> {
        if self.minimum_payout_amount <= Decimal::ZERO {
            return Err(LedgerError::Config("MIN_PAYOUT_AMOUNT must be positive".into()));
        }
        if self.max_concurrent_pending_payouts == 0 {
            return Err(LedgerError::Config("MAX_PENDING_PAYOUTS must be at least 1".into()));
        }
        if self.submit_max_attempts == 0 {
            return Err(LedgerError::Config("PAYOUT_SUBMIT_ATTEMPTS must be at least 1".into()));
        }
        Ok(())
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        self.submit_initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

/// Ledger service configuration
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub policy: PayoutPolicy,

    /// Non-terminal payouts older than this are reported as stale
    pub stale_payout_after: Duration,

    /// Shared secret for processor webhook signatures
    pub webhook_secret: Option<String>,

    /// Accepted clock skew for webhook timestamps
    pub webhook_tolerance: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            policy: PayoutPolicy::default(),
            stale_payout_after: Duration::from_secs(7 * 24 * 60 * 60),
            webhook_secret: None,
            webhook_tolerance: Duration::from_secs(300),
        }
    }
}

impl LedgerConfig {
    /// Create from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let policy = PayoutPolicy {
            minimum_payout_amount: env_parse("MIN_PAYOUT_AMOUNT")?
                .unwrap_or(defaults.policy.minimum_payout_amount),
            max_concurrent_pending_payouts: env_parse("MAX_PENDING_PAYOUTS")?
                .unwrap_or(defaults.policy.max_concurrent_pending_payouts),
            submit_max_attempts: env_parse("PAYOUT_SUBMIT_ATTEMPTS")?
                .unwrap_or(defaults.policy.submit_max_attempts),
            submit_initial_backoff: env_parse("PAYOUT_SUBMIT_BACKOFF_MS")?
                .map_or(defaults.policy.submit_initial_backoff, Duration::from_millis),
        };

        policy.validate()?;

        Ok(Self {
            policy,
            stale_payout_after: env_parse("STALE_PAYOUT_AFTER_SECS")?
                .map_or(defaults.stale_payout_after, Duration::from_secs),
            webhook_secret: std::env::var("PROCESSOR_WEBHOOK_SECRET").ok(),
            webhook_tolerance: env_parse("WEBHOOK_TOLERANCE_SECS")?
                .map_or(defaults.webhook_tolerance, Duration::from_secs),
        })
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| LedgerError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}
