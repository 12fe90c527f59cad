//! Ledger Service
//!
//! Wires the stores, tracker, payout handler and reconciler together.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::error::Result;
use crate::ledger::{LedgerStore, MemoryLedgerStore};
use crate::model::{CreatorId, Currency, NewRevenueEvent, PayoutRequest, Recorded, RevenueSource};
use crate::payout::{MemoryPayoutStore, PayoutRequestHandler, PayoutStore};
use crate::processor::PayoutProcessor;
use crate::query::LedgerQuery;
use crate::reconcile::{MemoryWebhookLog, Reconciler, WebhookLog};
use crate::verification::VerificationTracker;

/// All components sharing one set of stores
pub struct LedgerService {
    pub ledger: Arc<dyn LedgerStore>,
    pub verification: Arc<VerificationTracker>,
    pub payouts: PayoutRequestHandler,
    pub reconciler: Reconciler,
    pub query: LedgerQuery,
    pub config: LedgerConfig,
    processor_name: String,
}

impl LedgerService {
    /// Build over explicit stores
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payout_store: Arc<dyn PayoutStore>,
        webhook_log: Arc<dyn WebhookLog>,
        processor: Arc<dyn PayoutProcessor>,
        config: LedgerConfig,
    ) -> Self {
        let verification = Arc::new(VerificationTracker::new());
        let processor_name = processor.name().to_string();

        let payouts = PayoutRequestHandler::new(
            ledger.clone(),
            payout_store.clone(),
            verification.clone(),
            processor,
            config.policy.clone(),
        );
        let reconciler = Reconciler::new(ledger.clone(), payout_store.clone(), webhook_log);
        let query = LedgerQuery::new(ledger.clone(), payout_store, verification.clone());

        Self {
            ledger,
            verification,
            payouts,
            reconciler,
            query,
            config,
            processor_name,
        }
    }

    /// Build with in-memory stores
    pub fn in_memory(processor: Arc<dyn PayoutProcessor>, config: LedgerConfig) -> Self {
        Self::new(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryPayoutStore::new()),
            Arc::new(MemoryWebhookLog::new()),
            processor,
            config,
        )
    }

    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    /// Accrue revenue from a tipping, ticketing or booking collaborator
    pub fn record_revenue_event(
        &self,
        creator_id: &CreatorId,
        amount: Decimal,
        currency: Currency,
        source: RevenueSource,
        external_reference_id: impl Into<String>,
    ) -> Result<Recorded> {
        self.ledger.record_event(NewRevenueEvent {
            creator_id: creator_id.clone(),
            amount,
            currency,
            source,
            external_reference_id: external_reference_id.into(),
        })
    }

    pub async fn request_payout(
        &self,
        creator_id: &CreatorId,
        amount: Decimal,
        currency: Currency,
    ) -> Result<PayoutRequest> {
        self.payouts.request_payout(creator_id, amount, currency).await
    }
}
