//! Ledger Error Types

use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::{Currency, PayoutStatus, VerificationState};

/// Result type alias
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Coarse error category, used to pick retry behaviour and HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; never retried
    Validation,
    /// A precondition the caller must resolve first
    Eligibility,
    /// The external payout processor rejected or could not be reached
    Processor,
    /// Duplicate or out-of-order webhook; resolved as a no-op
    Reconciliation,
    /// Storage or configuration failure
    System,
}

/// Ledger, payout and reconciliation errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Amount was zero or negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    /// Reference id already used for a different revenue event
    #[error("Duplicate revenue event: {reference} already recorded for {creator_id}")]
    DuplicateEvent { creator_id: String, reference: String },

    /// Currency differs from the creator's settlement currency
    #[error("Currency mismatch: ledger is {expected}, got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    #[error("Payout of {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Too many pending payouts (limit {limit})")]
    TooManyPending { limit: usize },

    /// Creator is not verified (or has no payout account)
    #[error("Verification required: {0}")]
    VerificationRequired(String),

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    /// Processor unreachable after bounded retries
    #[error("Payout processor unavailable: {0}")]
    ProcessorUnavailable(String),

    /// Processor refused the submission outright
    #[error("Payout processor rejected submission: {0}")]
    ProcessorRejected(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Payout not found: {0}")]
    PayoutNotFound(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// Release of a finalized reservation or vice versa
    #[error("Reservation {0} already settled the other way")]
    ReservationConflict(String),

    #[error("Invalid verification transition: {from:?} on {event}")]
    InvalidVerificationTransition { from: VerificationState, event: String },

    #[error("Invalid payout transition: {from:?} -> {to:?}")]
    InvalidPayoutTransition { from: PayoutStatus, to: PayoutStatus },

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Category of this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount(_)
            | Self::InvalidCurrency(_)
            | Self::DuplicateEvent { .. }
            | Self::CurrencyMismatch { .. }
            | Self::BelowMinimum { .. }
            | Self::TooManyPending { .. }
            | Self::WebhookSignature(_)
            | Self::WebhookParse(_) => ErrorKind::Validation,
            Self::VerificationRequired(_)
            | Self::InsufficientBalance { .. }
            | Self::AccountNotFound(_)
            | Self::PayoutNotFound(_) => ErrorKind::Eligibility,
            Self::ProcessorUnavailable(_) | Self::ProcessorRejected(_) => ErrorKind::Processor,
            Self::ReservationConflict(_)
            | Self::InvalidPayoutTransition { .. }
            | Self::InvalidVerificationTransition { .. } => ErrorKind::Reconciliation,
            Self::ReservationNotFound(_) | Self::Config(_) | Self::Storage(_) => ErrorKind::System,
        }
    }

    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ProcessorUnavailable(_) | Self::Storage(_))
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidAmount(_) => "Amount must be greater than zero.".into(),
            Self::BelowMinimum { minimum, .. } => {
                format!("The minimum payout is {minimum}.")
            }
            Self::TooManyPending { .. } => {
                "You already have payouts in progress. Please wait for them to complete.".into()
            }
            Self::VerificationRequired(_) => {
                "Please finish verifying your payout account before requesting a payout.".into()
            }
            Self::InsufficientBalance { available, .. } => {
                format!("Insufficient funds. Your available balance is {available}.")
            }
            Self::CurrencyMismatch { expected, .. } => {
                format!("Payouts for this account must be in {expected}.")
            }
            Self::ProcessorUnavailable(_) => {
                "The payout service is temporarily unavailable. Your balance has not changed.".into()
            }
            Self::ProcessorRejected(_) => "The payout was declined by the payment processor.".into(),
            _ => "An error occurred processing your request.".into(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for LedgerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Storage(format!("lock poisoned: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_kinds() {
        assert_eq!(LedgerError::InvalidAmount(dec!(0)).kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::InsufficientBalance { needed: dec!(10), available: dec!(5) }.kind(),
            ErrorKind::Eligibility
        );
        assert_eq!(
            LedgerError::ProcessorUnavailable("timeout".into()).kind(),
            ErrorKind::Processor
        );
        assert_eq!(LedgerError::Storage("down".into()).kind(), ErrorKind::System);
    }

    #[test]
    fn test_retryable() {
        assert!(LedgerError::ProcessorUnavailable("x".into()).is_retryable());
        assert!(!LedgerError::ProcessorRejected("x".into()).is_retryable());
        assert!(!LedgerError::TooManyPending { limit: 3 }.is_retryable());
    }
}
