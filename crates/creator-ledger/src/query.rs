//! Eligibility & Balance Query API
//!
//! Read-only facade for UI and support tooling. Nothing here mutates state.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::ledger::LedgerStore;
use crate::model::{Balance, CreatorId, PayoutRequest, PayoutStatus, RevenueEvent};
use crate::payout::PayoutStore;
use crate::verification::{Eligibility, VerificationTracker};

pub struct LedgerQuery {
    ledger: Arc<dyn LedgerStore>,
    payouts: Arc<dyn PayoutStore>,
    verification: Arc<VerificationTracker>,
}

impl LedgerQuery {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payouts: Arc<dyn PayoutStore>,
        verification: Arc<VerificationTracker>,
    ) -> Self {
        Self {
            ledger,
            payouts,
            verification,
        }
    }

    pub fn get_balance(&self, creator_id: &CreatorId) -> Result<Balance> {
        self.ledger.balance(creator_id)
    }

    /// Newest first, optionally filtered by status
    pub fn list_payouts(
        &self,
        creator_id: &CreatorId,
        status: Option<PayoutStatus>,
    ) -> Result<Vec<PayoutRequest>> {
        self.payouts.list_for_creator(creator_id, status)
    }

    pub fn get_eligibility(&self, creator_id: &CreatorId) -> Result<Eligibility> {
        self.verification.eligibility(creator_id)
    }

    pub fn list_events(&self, creator_id: &CreatorId) -> Result<Vec<RevenueEvent>> {
        self.ledger.events(creator_id)
    }

    /// Non-terminal payouts requested more than `older_than` ago, oldest first
    ///
    /// A payout only leaves `Submitted`/`InTransit` when the processor tells
    /// us so; if that notification is lost this is where it shows up.
    pub fn stale_payouts(&self, older_than: Duration) -> Result<Vec<PayoutRequest>> {
        // A threshold reaching before the representable range matches nothing
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        else {
            return Ok(Vec::new());
        };

        let mut stale: Vec<_> = self
            .payouts
            .list_open()?
            .into_iter()
            .filter(|p| p.requested_at < cutoff)
            .collect();
        stale.sort_by_key(|p| p.requested_at);

        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "Stale payouts awaiting processor status");
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedgerStore;
    use crate::model::{Currency, NewRevenueEvent, RevenueSource};
    use crate::payout::MemoryPayoutStore;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stale_payouts() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let payouts = Arc::new(MemoryPayoutStore::new());
        let query = LedgerQuery::new(ledger.clone(), payouts.clone(), Arc::new(VerificationTracker::new()));
        let creator = CreatorId::new("c1");

        ledger
            .record_event(NewRevenueEvent {
                creator_id: creator.clone(),
                amount: dec!(100),
                currency: Currency::usd(),
                source: RevenueSource::TicketSale,
                external_reference_id: "t-1".into(),
            })
            .unwrap();

        let old = {
            let mut p = PayoutRequest::new(&ledger.reserve(&creator, dec!(30)).unwrap(), Currency::usd());
            p.requested_at = Utc::now() - chrono::Duration::days(10);
            p
        };
        let fresh = PayoutRequest::new(&ledger.reserve(&creator, dec!(30)).unwrap(), Currency::usd());
        payouts.insert(&old).unwrap();
        payouts.insert(&fresh).unwrap();

        let stale = query.stale_payouts(Duration::from_secs(7 * 24 * 3600)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);

        assert_eq!(query.list_payouts(&creator, None).unwrap().len(), 2);
        assert_eq!(query.list_payouts(&creator, Some(PayoutStatus::Paid)).unwrap().len(), 0);
        assert_eq!(query.get_balance(&creator).unwrap().reserved, dec!(60));
        assert_eq!(query.list_events(&creator).unwrap().len(), 1);
    }

    #[test]
    fn test_stale_threshold_beyond_time_range() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let payouts = Arc::new(MemoryPayoutStore::new());
        let query = LedgerQuery::new(ledger.clone(), payouts.clone(), Arc::new(VerificationTracker::new()));
        let creator = CreatorId::new("c1");
        ledger
            .record_event(NewRevenueEvent {
                creator_id: creator.clone(),
                amount: dec!(50),
                currency: Currency::usd(),
                source: RevenueSource::Tip,
                external_reference_id: "tip-1".into(),
            })
            .unwrap();
        let mut open = PayoutRequest::new(&ledger.reserve(&creator, dec!(30)).unwrap(), Currency::usd());
        open.requested_at = Utc::now() - chrono::Duration::days(10);
        payouts.insert(&open).unwrap();

        assert!(query.stale_payouts(Duration::from_secs(9_000_000_000_000)).unwrap().is_empty());
        assert!(query.stale_payouts(Duration::MAX).unwrap().is_empty());
        assert_eq!(query.stale_payouts(Duration::from_secs(24 * 3600)).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_creator_reads_empty() {
        let query = LedgerQuery::new(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(MemoryPayoutStore::new()),
            Arc::new(VerificationTracker::new()),
        );
        let creator = CreatorId::new("nobody");
        let balance = query.get_balance(&creator).unwrap();
        assert_eq!(balance.available, dec!(0));
        assert!(balance.currency.is_none());
        assert!(!query.get_eligibility(&creator).unwrap().eligible);
    }
}
