//! Domain Models
//!
//! Records owned by the ledger, verification tracker and payout pipeline.
//! Uses `rust_decimal` for all monetary values - never use f64 for money!

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

// ============================================================================
// Identifiers
// ============================================================================

/// Creator identifier, supplied by the surrounding platform
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreatorId(String);

impl CreatorId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CreatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Revenue event identifier
    EventId
);
uuid_id!(
    /// Payout request identifier; doubles as the processor idempotency key
    PayoutId
);
uuid_id!(
    /// Handle for a balance hold
    ReservationId
);

/// Currency code (e.g., "USD", "EUR"), always upper-case
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: &str) -> Result<Self, LedgerError> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(LedgerError::InvalidCurrency(code.to_string()))
        }
    }

    pub fn usd() -> Self {
        Self("USD".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Revenue
// ============================================================================

/// Where a revenue event came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevenueSource {
    Tip,
    TicketSale,
    Booking,
    Other,
}

/// Immutable, append-only revenue log entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueEvent {
    pub id: EventId,
    pub creator_id: CreatorId,
    pub source: RevenueSource,
    pub amount: Decimal,
    pub currency: Currency,
    pub occurred_at: DateTime<Utc>,

    /// Idempotency key supplied by the originating collaborator
    pub external_reference_id: String,
}

/// Input for accruing a revenue event
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewRevenueEvent {
    pub creator_id: CreatorId,
    pub amount: Decimal,
    pub currency: Currency,
    pub source: RevenueSource,
    pub external_reference_id: String,
}

impl NewRevenueEvent {
    /// Whether an already-recorded event carries the same content
    pub fn matches(&self, event: &RevenueEvent) -> bool {
        event.amount == self.amount && event.currency == self.currency && event.source == self.source
    }
}

/// Result of recording a revenue event
#[derive(Clone, Debug, Serialize)]
pub struct Recorded {
    pub event: RevenueEvent,

    /// True when the event had already been recorded and nothing changed
    pub replay: bool,
}

/// Point-in-time view of a creator's ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub creator_id: CreatorId,

    /// Settlement currency (None until the first event)
    pub currency: Option<Currency>,
    pub available: Decimal,
    pub reserved: Decimal,
    pub total_earned: Decimal,
    pub total_paid_out: Decimal,
}

/// A hold on part of a creator's available balance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub creator_id: CreatorId,
    pub amount: Decimal,
}

/// What happened when a reservation was settled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Balance moved
    Applied,
    /// Handle was already settled this way; nothing moved
    AlreadySettled,
}

// ============================================================================
// Verification
// ============================================================================

/// Processor-side onboarding state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    #[default]
    Unset,
    Pending,
    Verified,
    Failed,
}

/// Outcome reported by the verification collaborator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationResult {
    Verified,
    Failed,
    /// Processor revoked payout capability; creator must re-verify
    Revoked,
}

/// A creator's payout account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub creator_id: CreatorId,

    /// Processor-side payout account (None until setup links one)
    pub external_account_id: Option<String>,
    pub verification_state: VerificationState,

    /// Soft-disabled accounts are retained but never payout-eligible
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(creator_id: CreatorId) -> Self {
        let now = Utc::now();
        Self {
            creator_id,
            external_account_id: None,
            verification_state: VerificationState::Unset,
            disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_payout_eligible(&self) -> bool {
        !self.disabled && self.verification_state == VerificationState::Verified
    }
}

// ============================================================================
// Payouts
// ============================================================================

/// Payout lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Requested,
    Submitted,
    InTransit,
    Paid,
    Failed,
}

/// Every legal `from -> to` payout move. Anything else is rejected.
const PAYOUT_TRANSITIONS: &[(PayoutStatus, PayoutStatus)] = &[
    (PayoutStatus::Requested, PayoutStatus::Submitted),
    (PayoutStatus::Requested, PayoutStatus::Failed),
    (PayoutStatus::Submitted, PayoutStatus::InTransit),
    (PayoutStatus::Submitted, PayoutStatus::Paid),
    (PayoutStatus::Submitted, PayoutStatus::Failed),
    (PayoutStatus::InTransit, PayoutStatus::Paid),
    (PayoutStatus::InTransit, PayoutStatus::Failed),
];

impl PayoutStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }

    pub fn can_transition_to(self, to: Self) -> bool {
        PAYOUT_TRANSITIONS.contains(&(self, to))
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "requested" => Some(Self::Requested),
            "submitted" => Some(Self::Submitted),
            "in_transit" => Some(Self::InTransit),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One payout attempt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: PayoutId,
    pub creator_id: CreatorId,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: PayoutStatus,

    /// Set once the processor acknowledges the submission
    pub external_payout_id: Option<String>,

    /// Balance hold backing this payout
    pub reservation_id: ReservationId,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set on reaching a terminal status
    pub resolved_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl PayoutRequest {
    pub fn new(reservation: &Reservation, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: PayoutId::new(),
            creator_id: reservation.creator_id.clone(),
            amount: reservation.amount,
            currency,
            status: PayoutStatus::Requested,
            external_payout_id: None,
            reservation_id: reservation.id,
            requested_at: now,
            updated_at: now,
            resolved_at: None,
            failure_reason: None,
        }
    }

    /// Rebuild the reservation handle this payout holds
    pub fn reservation(&self) -> Reservation {
        Reservation {
            id: self.reservation_id,
            creator_id: self.creator_id.clone(),
            amount: self.amount,
        }
    }
}

/// Dedup record for an inbound processor notification
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub external_event_id: String,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}
