//! Reconciliation Processor
//!
//! Applies processor status notifications to payouts and the ledger.
//! Delivery is at-least-once and unordered, so every event is deduplicated
//! by its external id and every status change must be a forward move in the
//! payout transition table. Ledger settlement is idempotent per reservation,
//! which makes replaying a terminal event harmless.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::ledger::LedgerStore;
use crate::model::{
    CreatorId, Currency, PayoutId, PayoutRequest, PayoutStatus, Settlement, WebhookEventRecord,
};
use crate::payout::{PayoutStore, Transition, TransitionUpdate};
use crate::webhook::{ProcessorNotification, map_external_status};

// ============================================================================
// Dedup log
// ============================================================================

/// Inbound event dedup storage
pub trait WebhookLog: Send + Sync {
    /// Store the event id if unseen; returns the stored record either way
    fn record(&self, external_event_id: &str) -> Result<WebhookEventRecord>;

    fn mark_processed(&self, external_event_id: &str) -> Result<()>;

    fn get(&self, external_event_id: &str) -> Result<Option<WebhookEventRecord>>;
}

/// In-memory webhook dedup log
#[derive(Default)]
pub struct MemoryWebhookLog {
    records: RwLock<HashMap<String, WebhookEventRecord>>,
}

impl MemoryWebhookLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WebhookLog for MemoryWebhookLog {
    fn record(&self, external_event_id: &str) -> Result<WebhookEventRecord> {
        let mut records = self.records.write()?;
        Ok(records
            .entry(external_event_id.to_string())
            .or_insert_with(|| WebhookEventRecord {
                external_event_id: external_event_id.to_string(),
                received_at: Utc::now(),
                processed: false,
                processed_at: None,
            })
            .clone())
    }

    fn mark_processed(&self, external_event_id: &str) -> Result<()> {
        let mut records = self.records.write()?;
        if let Some(record) = records.get_mut(external_event_id) {
            if !record.processed {
                record.processed = true;
                record.processed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    fn get(&self, external_event_id: &str) -> Result<Option<WebhookEventRecord>> {
        Ok(self.records.read()?.get(external_event_id).cloned())
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Published whenever a payout changes status through reconciliation
#[derive(Clone, Debug, Serialize)]
pub struct PayoutNotice {
    pub payout_id: PayoutId,
    pub creator_id: CreatorId,
    pub from: PayoutStatus,
    pub to: PayoutStatus,
    pub amount: Decimal,
    pub currency: Currency,
    pub at: DateTime<Utc>,
}

/// What a notification did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Event id already processed
    Duplicate,
    /// No payout with that external id yet; left unprocessed for redelivery
    UnknownPayout,
    /// Status string not understood; acknowledged without change
    UnrecognizedStatus(String),
    /// Amount or currency disagrees with the local payout
    Conflict(String),
    /// Not a forward move from the current status
    Ignored { current: PayoutStatus },
    /// Status moved
    Applied { from: PayoutStatus, to: PayoutStatus },
    /// Status was already terminal but its ledger settlement was missing
    Recovered { status: PayoutStatus },
}

/// Processes inbound processor notifications
pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    payouts: Arc<dyn PayoutStore>,
    webhooks: Arc<dyn WebhookLog>,
    notices: broadcast::Sender<PayoutNotice>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        payouts: Arc<dyn PayoutStore>,
        webhooks: Arc<dyn WebhookLog>,
    ) -> Self {
        let (notices, _) = broadcast::channel(256);
        Self {
            ledger,
            payouts,
            webhooks,
            notices,
        }
    }

    /// Receive a notice for every applied status change
    pub fn subscribe(&self) -> broadcast::Receiver<PayoutNotice> {
        self.notices.subscribe()
    }

    /// Apply an authenticated notification, cross-checking amount and currency
    pub fn handle_notification(
        &self,
        notification: &ProcessorNotification,
    ) -> Result<ReconcileOutcome> {
        self.process(
            &notification.event_id,
            &notification.payout_id,
            &notification.status,
            Some((notification.amount, &notification.currency)),
        )
    }

    /// Apply a status change reported for `external_payout_id`
    pub fn handle_external_event(
        &self,
        external_event_id: &str,
        external_payout_id: &str,
        external_status: &str,
    ) -> Result<ReconcileOutcome> {
        self.process(external_event_id, external_payout_id, external_status, None)
    }

    fn process(
        &self,
        event_id: &str,
        external_payout_id: &str,
        external_status: &str,
        reported: Option<(Decimal, &Currency)>,
    ) -> Result<ReconcileOutcome> {
        // Recorded before any processing so a crash below is retried on redelivery
        let record = self.webhooks.record(event_id)?;
        if record.processed {
            tracing::debug!(event_id, "Duplicate webhook delivery ignored");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let Some(payout) = self.payouts.find_by_external_id(external_payout_id)? else {
            tracing::warn!(
                event_id,
                external_payout_id,
                "Webhook for unknown payout, awaiting redelivery"
            );
            return Ok(ReconcileOutcome::UnknownPayout);
        };

        let Some(target) = map_external_status(external_status) else {
            tracing::warn!(event_id, status = external_status, "Unrecognized payout status");
            self.webhooks.mark_processed(event_id)?;
            return Ok(ReconcileOutcome::UnrecognizedStatus(external_status.to_string()));
        };

        if let Some((amount, currency)) = reported {
            if amount != payout.amount || *currency != payout.currency {
                let detail = format!(
                    "reported {amount} {currency}, expected {} {}",
                    payout.amount, payout.currency
                );
                tracing::error!(
                    event_id,
                    payout_id = %payout.id,
                    detail = %detail,
                    "Webhook disagrees with local payout, not applied"
                );
                self.webhooks.mark_processed(event_id)?;
                return Ok(ReconcileOutcome::Conflict(detail));
            }
        }

        let update = TransitionUpdate {
            external_payout_id: None,
            failure_reason: (target == PayoutStatus::Failed)
                .then(|| format!("processor reported {external_status}")),
        };

        let outcome = match self.payouts.transition(&payout.id, target, update)? {
            Transition::Applied { from, payout } => {
                self.settle(&payout)?;
                tracing::info!(
                    event_id,
                    payout_id = %payout.id,
                    creator_id = %payout.creator_id,
                    from = ?from,
                    to = ?target,
                    "Payout status updated"
                );
                // No subscribers is fine
                let _ = self.notices.send(PayoutNotice {
                    payout_id: payout.id,
                    creator_id: payout.creator_id.clone(),
                    from,
                    to: target,
                    amount: payout.amount,
                    currency: payout.currency.clone(),
                    at: Utc::now(),
                });
                ReconcileOutcome::Applied { from, to: target }
            }
            Transition::Rejected { current } => {
                if current.status == target && target.is_terminal()
                    && self.settle(&current)? == Settlement::Applied
                {
                    tracing::warn!(
                        event_id,
                        payout_id = %current.id,
                        status = ?target,
                        "Recovered missing ledger settlement"
                    );
                    ReconcileOutcome::Recovered { status: target }
                } else {
                    tracing::debug!(
                        event_id,
                        payout_id = %current.id,
                        current = ?current.status,
                        reported = ?target,
                        "Out-of-order payout status ignored"
                    );
                    ReconcileOutcome::Ignored { current: current.status }
                }
            }
        };

        self.webhooks.mark_processed(event_id)?;
        Ok(outcome)
    }

    /// Settle the ledger for a payout in a terminal status
    fn settle(&self, payout: &PayoutRequest) -> Result<Settlement> {
        match payout.status {
            PayoutStatus::Paid => self.ledger.finalize(&payout.reservation()),
            PayoutStatus::Failed => self.ledger.release(&payout.reservation()),
            _ => Ok(Settlement::AlreadySettled),
        }
    }
}
