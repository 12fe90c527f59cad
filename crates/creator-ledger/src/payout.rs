//! Payout Request Handler
//!
//! Validates a payout request, reserves the balance, and hands the payout to
//! the external processor. The reservation is taken before the external call
//! and released if the call fails, so a crash in between leaves a
//! "reserved but unresolved" payout instead of a lost balance change.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::PayoutPolicy;
use crate::error::{LedgerError, Result};
use crate::ledger::LedgerStore;
use crate::model::{CreatorId, Currency, PayoutId, PayoutRequest, PayoutStatus};
use crate::processor::{PayoutProcessor, PayoutSubmission, ProcessorReceipt, SubmissionError};
use crate::verification::VerificationTracker;

// ============================================================================
// Payout storage
// ============================================================================

/// Fields written alongside a status change
#[derive(Clone, Debug, Default)]
pub struct TransitionUpdate {
    pub external_payout_id: Option<String>,
    pub failure_reason: Option<String>,
}

/// Outcome of a guarded status change
#[derive(Clone, Debug)]
pub enum Transition {
    /// Status moved from `from` to the requested status
    Applied { from: PayoutStatus, payout: PayoutRequest },
    /// Move not in the transition table; nothing changed
    Rejected { current: PayoutRequest },
}

/// Payout storage trait
pub trait PayoutStore: Send + Sync {
    fn insert(&self, payout: &PayoutRequest) -> Result<()>;

    fn get(&self, id: &PayoutId) -> Result<Option<PayoutRequest>>;

    fn find_by_external_id(&self, external_payout_id: &str) -> Result<Option<PayoutRequest>>;

    /// Atomically move `id` to `to` if the transition table allows it
    fn transition(
        &self,
        id: &PayoutId,
        to: PayoutStatus,
        update: TransitionUpdate,
    ) -> Result<Transition>;

    /// A creator's payouts, newest first
    fn list_for_creator(
        &self,
        creator_id: &CreatorId,
        status: Option<PayoutStatus>,
    ) -> Result<Vec<PayoutRequest>>;

    /// Every non-terminal payout across creators
    fn list_open(&self) -> Result<Vec<PayoutRequest>>;
}

#[derive(Default)]
struct PayoutIndex {
    payouts: HashMap<PayoutId, PayoutRequest>,
    by_external: HashMap<String, PayoutId>,
}

/// In-memory payout store
#[derive(Default)]
pub struct MemoryPayoutStore {
    inner: RwLock<PayoutIndex>,
}

impl MemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayoutStore for MemoryPayoutStore {
    fn insert(&self, payout: &PayoutRequest) -> Result<()> {
        let mut inner = self.inner.write()?;
        if let Some(external) = &payout.external_payout_id {
            inner.by_external.insert(external.clone(), payout.id);
        }
        inner.payouts.insert(payout.id, payout.clone());
        Ok(())
    }

    fn get(&self, id: &PayoutId) -> Result<Option<PayoutRequest>> {
        Ok(self.inner.read()?.payouts.get(id).cloned())
    }

    fn find_by_external_id(&self, external_payout_id: &str) -> Result<Option<PayoutRequest>> {
        let inner = self.inner.read()?;
        Ok(inner
            .by_external
            .get(external_payout_id)
            .and_then(|id| inner.payouts.get(id))
            .cloned())
    }

    fn transition(
        &self,
        id: &PayoutId,
        to: PayoutStatus,
        update: TransitionUpdate,
    ) -> Result<Transition> {
        let mut guard = self.inner.write()?;
        let inner = &mut *guard;
        let payout = inner
            .payouts
            .get_mut(id)
            .ok_or_else(|| LedgerError::PayoutNotFound(id.to_string()))?;

        let from = payout.status;
        if !from.can_transition_to(to) {
            return Ok(Transition::Rejected { current: payout.clone() });
        }

        let now = Utc::now();
        payout.status = to;
        payout.updated_at = now;
        if to.is_terminal() {
            payout.resolved_at = Some(now);
        }
        if let Some(reason) = update.failure_reason {
            payout.failure_reason = Some(reason);
        }
        if let Some(external) = update.external_payout_id {
            if payout.external_payout_id.is_none() {
                inner.by_external.insert(external.clone(), payout.id);
                payout.external_payout_id = Some(external);
            }
        }

        Ok(Transition::Applied { from, payout: payout.clone() })
    }

    fn list_for_creator(
        &self,
        creator_id: &CreatorId,
        status: Option<PayoutStatus>,
    ) -> Result<Vec<PayoutRequest>> {
        let inner = self.inner.read()?;
        let mut payouts: Vec<_> = inner
            .payouts
            .values()
            .filter(|p| &p.creator_id == creator_id)
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        payouts.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(payouts)
    }

    fn list_open(&self) -> Result<Vec<PayoutRequest>> {
        let inner = self.inner.read()?;
        Ok(inner
            .payouts
            .values()
            .filter(|p| !p.status.is_terminal())
            .cloned()
            .collect())
    }
}

// ============================================================================
// Handler
// ============================================================================

/// How the submission loop ended
enum SubmitOutcome {
    Accepted(ProcessorReceipt),
    Failed(SubmissionError),
    /// Eligibility lapsed between attempts; nothing was sent since
    Revoked,
}

/// Creates payout requests and submits them to the processor
pub struct PayoutRequestHandler {
    ledger: Arc<dyn LedgerStore>,
    payouts: Arc<dyn PayoutStore>,
    verification: Arc<VerificationTracker>,
    processor: Arc<dyn PayoutProcessor>,
    policy: PayoutPolicy,
}

impl PayoutRequestHandler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payouts: Arc<dyn PayoutStore>,
        verification: Arc<VerificationTracker>,
        processor: Arc<dyn PayoutProcessor>,
        policy: PayoutPolicy,
    ) -> Self {
        Self {
            ledger,
            payouts,
            verification,
            processor,
            policy,
        }
    }

    pub const fn policy(&self) -> &PayoutPolicy {
        &self.policy
    }

    /// Validate, reserve, and submit a payout
    ///
    /// Returns the payout in `Submitted` on success. Every failure after the
    /// reservation releases it before returning.
    pub async fn request_payout(
        &self,
        creator_id: &CreatorId,
        amount: Decimal,
        currency: Currency,
    ) -> Result<PayoutRequest> {
        if amount < self.policy.minimum_payout_amount {
            return Err(LedgerError::BelowMinimum {
                amount,
                minimum: self.policy.minimum_payout_amount,
            });
        }

        if !self.verification.is_payout_eligible(creator_id)? {
            return Err(LedgerError::VerificationRequired(
                "payout account is not verified".into(),
            ));
        }
        let external_account_id = self
            .verification
            .account(creator_id)?
            .and_then(|a| a.external_account_id)
            .ok_or_else(|| {
                LedgerError::VerificationRequired("no payout account linked".into())
            })?;

        if let Some(expected) = self.ledger.balance(creator_id)?.currency {
            if expected != currency {
                return Err(LedgerError::CurrencyMismatch { expected, actual: currency });
            }
        }

        let reservation = self.ledger.reserve_bounded(
            creator_id,
            amount,
            self.policy.max_concurrent_pending_payouts,
        )?;

        let payout = PayoutRequest::new(&reservation, currency);
        if let Err(e) = self.payouts.insert(&payout) {
            self.ledger.release(&reservation)?;
            return Err(e);
        }

        tracing::info!(
            creator_id = %creator_id,
            payout_id = %payout.id,
            amount = %amount,
            "Payout requested"
        );

        let submission = PayoutSubmission {
            external_account_id,
            amount,
            currency: payout.currency.clone(),
            idempotency_key: payout.id.to_string(),
        };

        let outcome = match self.submit_with_retry(creator_id, &submission).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.abandon(&payout, &e.to_string())?;
                return Err(e);
            }
        };

        match outcome {
            SubmitOutcome::Accepted(receipt) => self.mark_submitted(&payout, receipt),
            SubmitOutcome::Revoked => {
                self.abandon(&payout, "verification revoked before submission")?;
                Err(LedgerError::VerificationRequired(
                    "payout account is no longer verified".into(),
                ))
            }
            SubmitOutcome::Failed(e) => {
                self.abandon(&payout, &e.to_string())?;
                Err(match e {
                    SubmissionError::Rejected(reason) => LedgerError::ProcessorRejected(reason),
                    SubmissionError::Unavailable(reason) => LedgerError::ProcessorUnavailable(
                        format!("{reason} (after {} attempts)", self.policy.submit_max_attempts),
                    ),
                })
            }
        }
    }

    /// Submit with bounded backoff, re-checking eligibility before every attempt
    async fn submit_with_retry(
        &self,
        creator_id: &CreatorId,
        submission: &PayoutSubmission,
    ) -> Result<SubmitOutcome> {
        let mut attempt = 1;
        loop {
            if !self.verification.is_payout_eligible(creator_id)? {
                tracing::warn!(
                    creator_id = %creator_id,
                    idempotency_key = %submission.idempotency_key,
                    attempt,
                    "Verification lapsed before submission"
                );
                return Ok(SubmitOutcome::Revoked);
            }

            match self.processor.submit_payout(submission).await {
                Ok(receipt) => return Ok(SubmitOutcome::Accepted(receipt)),
                Err(e) if e.is_retryable() && attempt < self.policy.submit_max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        idempotency_key = %submission.idempotency_key,
                        processor = self.processor.name(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Payout submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Ok(SubmitOutcome::Failed(e)),
            }
        }
    }

    fn mark_submitted(
        &self,
        payout: &PayoutRequest,
        receipt: ProcessorReceipt,
    ) -> Result<PayoutRequest> {
        let update = TransitionUpdate {
            external_payout_id: Some(receipt.external_payout_id),
            failure_reason: None,
        };

        match self.payouts.transition(&payout.id, PayoutStatus::Submitted, update)? {
            Transition::Applied { payout, .. } => {
                tracing::info!(
                    payout_id = %payout.id,
                    external_payout_id = ?payout.external_payout_id,
                    "Payout submitted"
                );
                Ok(payout)
            }
            Transition::Rejected { current } => Err(LedgerError::InvalidPayoutTransition {
                from: current.status,
                to: PayoutStatus::Submitted,
            }),
        }
    }

    /// Release the hold and mark the payout failed
    fn abandon(&self, payout: &PayoutRequest, reason: &str) -> Result<()> {
        self.ledger.release(&payout.reservation())?;

        let update = TransitionUpdate {
            external_payout_id: None,
            failure_reason: Some(reason.to_string()),
        };
        if let Transition::Rejected { current } =
            self.payouts.transition(&payout.id, PayoutStatus::Failed, update)?
        {
            tracing::error!(
                payout_id = %payout.id,
                status = ?current.status,
                "Could not mark abandoned payout failed"
            );
        }

        tracing::warn!(
            creator_id = %payout.creator_id,
            payout_id = %payout.id,
            reason,
            "Payout abandoned, reservation released"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedgerStore;
    use crate::model::{NewRevenueEvent, RevenueSource, VerificationResult};
    use crate::processor::MockPayoutProcessor;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        ledger: Arc<MemoryLedgerStore>,
        payouts: Arc<MemoryPayoutStore>,
        verification: Arc<VerificationTracker>,
        processor: Arc<MockPayoutProcessor>,
        handler: PayoutRequestHandler,
    }

    fn fixture(processor: MockPayoutProcessor) -> Fixture {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let payouts = Arc::new(MemoryPayoutStore::new());
        let verification = Arc::new(VerificationTracker::new());
        let processor = Arc::new(processor);
        let policy = PayoutPolicy {
            submit_initial_backoff: Duration::from_millis(1),
            ..PayoutPolicy::default()
        };
        let handler = PayoutRequestHandler::new(
            ledger.clone(),
            payouts.clone(),
            verification.clone(),
            processor.clone(),
            policy,
        );
        Fixture { ledger, payouts, verification, processor, handler }
    }

    fn creator() -> CreatorId {
        CreatorId::new("creator-1")
    }

    fn fund(f: &Fixture, amount: Decimal) {
        f.ledger
            .record_event(NewRevenueEvent {
                creator_id: creator(),
                amount,
                currency: Currency::usd(),
                source: RevenueSource::Booking,
                external_reference_id: format!("booking-{amount}"),
            })
            .unwrap();
    }

    fn verify(f: &Fixture) {
        f.verification.begin_verification(&creator()).unwrap();
        f.verification.link_external_account(&creator(), "acct_1").unwrap();
        f.verification
            .apply_verification_result(&creator(), VerificationResult::Verified)
            .unwrap();
    }

    #[tokio::test]
    async fn test_below_minimum() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(100));
        verify(&f);
        let err = f.handler.request_payout(&creator(), dec!(24.99), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::BelowMinimum { .. })));
    }

    #[tokio::test]
    async fn test_unverified_rejected_without_reserving() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(50));
        let err = f.handler.request_payout(&creator(), dec!(25), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::VerificationRequired(_))));
        assert_eq!(f.ledger.balance(&creator()).unwrap().available, dec!(50));
    }

    #[tokio::test]
    async fn test_successful_payout_is_submitted() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(50));
        verify(&f);

        let payout = f
            .handler
            .request_payout(&creator(), dec!(25), Currency::usd())
            .await
            .unwrap();
        assert_eq!(payout.status, PayoutStatus::Submitted);
        assert!(payout.external_payout_id.is_some());

        let balance = f.ledger.balance(&creator()).unwrap();
        assert_eq!(balance.available, dec!(25));
        assert_eq!(balance.reserved, dec!(25));

        let found = f
            .payouts
            .find_by_external_id(payout.external_payout_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(found.id, payout.id);

        let sent = f.processor.submissions().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].idempotency_key, payout.id.to_string());
        assert_eq!(sent[0].external_account_id, "acct_1");
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(30));
        verify(&f);
        let err = f.handler.request_payout(&creator(), dec!(40), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::InsufficientBalance { .. })));
        assert!(f.payouts.list_for_creator(&creator(), None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_too_many_pending() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(500));
        verify(&f);

        for _ in 0..3 {
            f.handler
                .request_payout(&creator(), dec!(25), Currency::usd())
                .await
                .unwrap();
        }
        let err = f.handler.request_payout(&creator(), dec!(25), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::TooManyPending { limit: 3 })));
        assert_eq!(f.ledger.balance(&creator()).unwrap().reserved, dec!(75));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let f = fixture(MockPayoutProcessor::with_transient_failures(2));
        fund(&f, dec!(50));
        verify(&f);

        let payout = f
            .handler
            .request_payout(&creator(), dec!(25), Currency::usd())
            .await
            .unwrap();
        assert_eq!(payout.status, PayoutStatus::Submitted);

        let sent = f.processor.submissions().await;
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|s| s.idempotency_key == payout.id.to_string()));
    }

    #[tokio::test]
    async fn test_processor_unavailable_releases_balance() {
        let f = fixture(MockPayoutProcessor::with_transient_failures(10));
        fund(&f, dec!(50));
        verify(&f);

        let err = f.handler.request_payout(&creator(), dec!(25), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::ProcessorUnavailable(_))));
        assert_eq!(f.processor.submissions().await.len(), 3);

        let balance = f.ledger.balance(&creator()).unwrap();
        assert_eq!(balance.available, dec!(50));
        assert_eq!(balance.reserved, dec!(0));

        let failed = f
            .payouts
            .list_for_creator(&creator(), Some(PayoutStatus::Failed))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let f = fixture(MockPayoutProcessor::rejecting("destination closed"));
        fund(&f, dec!(50));
        verify(&f);

        let err = f.handler.request_payout(&creator(), dec!(25), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::ProcessorRejected(_))));
        assert_eq!(f.processor.submissions().await.len(), 1);
        assert_eq!(f.ledger.balance(&creator()).unwrap().available, dec!(50));
    }

    #[tokio::test]
    async fn test_currency_must_match_ledger() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(50));
        verify(&f);
        let eur = Currency::parse("EUR").unwrap();
        let err = f.handler.request_payout(&creator(), dec!(25), eur).await;
        assert!(matches!(err, Err(LedgerError::CurrencyMismatch { .. })));
    }

    /// Revokes the creator during the first call, then accepts
    struct RevokingProcessor {
        verification: Arc<VerificationTracker>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PayoutProcessor for RevokingProcessor {
        async fn submit_payout(
            &self,
            _submission: &PayoutSubmission,
        ) -> std::result::Result<ProcessorReceipt, SubmissionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.verification
                    .apply_verification_result(&creator(), VerificationResult::Revoked)
                    .unwrap();
                return Err(SubmissionError::Unavailable("gateway timeout".into()));
            }
            Ok(ProcessorReceipt {
                external_payout_id: "po_after_revocation".into(),
            })
        }

        fn name(&self) -> &str {
            "RevokingProcessor"
        }
    }

    #[tokio::test]
    async fn test_revocation_during_backoff_stops_retries() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(50));
        verify(&f);

        let processor = Arc::new(RevokingProcessor {
            verification: f.verification.clone(),
            calls: AtomicUsize::new(0),
        });
        let handler = PayoutRequestHandler::new(
            f.ledger.clone(),
            f.payouts.clone(),
            f.verification.clone(),
            processor.clone(),
            f.handler.policy().clone(),
        );

        let err = handler.request_payout(&creator(), dec!(25), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::VerificationRequired(_))));
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);

        let balance = f.ledger.balance(&creator()).unwrap();
        assert_eq!(balance.available, dec!(50));
        assert_eq!(balance.reserved, dec!(0));

        let payouts = f.payouts.list_for_creator(&creator(), None).unwrap();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].status, PayoutStatus::Failed);
        assert!(payouts[0].external_payout_id.is_none());
    }

    #[tokio::test]
    async fn test_verified_without_linked_account_rejected() {
        let f = fixture(MockPayoutProcessor::new());
        fund(&f, dec!(50));
        f.verification.begin_verification(&creator()).unwrap();
        f.verification
            .apply_verification_result(&creator(), VerificationResult::Verified)
            .unwrap();

        let err = f.handler.request_payout(&creator(), dec!(25), Currency::usd()).await;
        assert!(matches!(err, Err(LedgerError::VerificationRequired(_))));
        assert_eq!(f.ledger.balance(&creator()).unwrap().available, dec!(50));
        assert!(f.payouts.list_for_creator(&creator(), None).unwrap().is_empty());
        assert!(f.processor.submissions().await.is_empty());
    }

    #[test]
    fn test_store_rejects_backward_transition() {
        let store = MemoryPayoutStore::new();
        let ledger = MemoryLedgerStore::new();
        fund_store(&ledger);
        let reservation = ledger.reserve(&creator(), dec!(10)).unwrap();
        let payout = PayoutRequest::new(&reservation, Currency::usd());
        store.insert(&payout).unwrap();

        let applied = store
            .transition(&payout.id, PayoutStatus::Submitted, TransitionUpdate {
                external_payout_id: Some("po_1".into()),
                failure_reason: None,
            })
            .unwrap();
        assert!(matches!(applied, Transition::Applied { from: PayoutStatus::Requested, .. }));

        store
            .transition(&payout.id, PayoutStatus::Paid, TransitionUpdate::default())
            .unwrap();
        let back = store
            .transition(&payout.id, PayoutStatus::InTransit, TransitionUpdate::default())
            .unwrap();
        assert!(matches!(back, Transition::Rejected { ref current } if current.status == PayoutStatus::Paid));
        assert!(store.list_open().unwrap().is_empty());
    }

    fn fund_store(ledger: &MemoryLedgerStore) {
        ledger
            .record_event(NewRevenueEvent {
                creator_id: creator(),
                amount: dec!(10),
                currency: Currency::usd(),
                source: RevenueSource::Tip,
                external_reference_id: "tip".into(),
            })
            .unwrap();
    }
}
