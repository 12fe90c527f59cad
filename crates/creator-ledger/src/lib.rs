//! # creator-ledger
//!
//! Revenue ledger and payout reconciliation for creators.
//!
//! ## Flow
//!
//! ```text
//! tips / tickets / bookings
//!          │ record_revenue_event
//!          ▼
//! ┌─────────────────┐   reserve    ┌──────────────────┐  submit   ┌───────────┐
//! │  Revenue Ledger │◀─────────────│  Payout Request  │──────────▶│ Processor │
//! │  (per creator)  │              │     Handler      │           └─────┬─────┘
//! └─────────────────┘              └──────────────────┘                 │ webhooks
//!          ▲  finalize / release            ▲ eligible?                 │
//!          │                      ┌──────────────────┐                 ▼
//!          └──────────────────────│  Reconciliation  │◀──── at-least-once,
//!                                 │    Processor     │      out of order
//!                                 └──────────────────┘
//! ```
//!
//! ## Balance invariants
//!
//! - `available = total_earned - total_paid_out - reserved` and is never negative
//! - `total_earned` equals the sum of the creator's revenue events
//! - `total_paid_out` never decreases
//!
//! ## Usage
//!
//! ```rust,ignore
//! use creator_ledger::{LedgerConfig, LedgerService, MockPayoutProcessor, CreatorId, Currency, RevenueSource};
//! use rust_decimal_macros::dec;
//!
//! let service = LedgerService::in_memory(Arc::new(MockPayoutProcessor::new()), LedgerConfig::default());
//! let creator = CreatorId::new("creator-42");
//!
//! service.record_revenue_event(&creator, dec!(50), Currency::usd(), RevenueSource::Tip, "tip-9f2c")?;
//! let payout = service.request_payout(&creator, dec!(25), Currency::usd()).await?;
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod payout;
pub mod processor;
pub mod query;
pub mod reconcile;
pub mod service;
pub mod verification;
pub mod webhook;

pub use config::{LedgerConfig, PayoutPolicy};
pub use error::{ErrorKind, LedgerError, Result};
pub use ledger::{LedgerStore, MemoryLedgerStore};
pub use model::{
    Account, Balance, CreatorId, Currency, PayoutId, PayoutRequest, PayoutStatus, Recorded,
    RevenueEvent, RevenueSource, VerificationResult, VerificationState,
};
pub use payout::{MemoryPayoutStore, PayoutRequestHandler, PayoutStore};
pub use processor::{
    HttpPayoutProcessor, HttpProcessorConfig, MockPayoutProcessor, PayoutProcessor,
};
pub use query::LedgerQuery;
pub use reconcile::{MemoryWebhookLog, PayoutNotice, ReconcileOutcome, Reconciler, WebhookLog};
pub use service::LedgerService;
pub use verification::{Eligibility, IneligibleReason, VerificationTracker};
pub use webhook::ProcessorNotification;
