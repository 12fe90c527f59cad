//! Application State

use std::sync::Arc;

use creator_ledger::LedgerService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Ledger, payouts, reconciliation and queries
    pub service: Arc<LedgerService>,
}
