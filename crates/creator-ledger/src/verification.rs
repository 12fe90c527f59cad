//! Account Verification Tracker
//!
//! Mirrors the processor-side onboarding state of each creator and gates
//! payout eligibility on it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{LedgerError, Result};
use crate::model::{Account, CreatorId, VerificationResult, VerificationState};

/// Input to the verification state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VerificationEvent {
    Begin,
    Result(VerificationResult),
}

impl std::fmt::Display for VerificationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Result(r) => write!(f, "{r:?}"),
        }
    }
}

/// Every legal `(state, event) -> state` move. Anything else is rejected.
const VERIFICATION_TRANSITIONS: &[(VerificationState, VerificationEvent, VerificationState)] = {
    use VerificationEvent::{Begin, Result as R};
    use VerificationResult as Res;
    use VerificationState::{Failed, Pending, Unset, Verified};
    &[
        (Unset, Begin, Pending),
        (Pending, Begin, Pending),
        (Verified, Begin, Verified),
        (Failed, Begin, Pending),
        (Pending, R(Res::Verified), Verified),
        (Pending, R(Res::Failed), Failed),
        (Verified, R(Res::Verified), Verified),
        (Verified, R(Res::Revoked), Pending),
        (Verified, R(Res::Failed), Failed),
        (Failed, R(Res::Failed), Failed),
    ]
};

fn next_state(from: VerificationState, event: VerificationEvent) -> Result<VerificationState> {
    VERIFICATION_TRANSITIONS
        .iter()
        .find(|(s, e, _)| *s == from && *e == event)
        .map(|(_, _, to)| *to)
        .ok_or_else(|| LedgerError::InvalidVerificationTransition {
            from,
            event: event.to_string(),
        })
}

/// Why a creator cannot currently request a payout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    NoAccount,
    VerificationPending,
    VerificationFailed,
    NotStarted,
    Disabled,
    NoPayoutAccount,
}

/// Eligibility answer for the read side
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IneligibleReason>,
}

impl Eligibility {
    pub const fn eligible() -> Self {
        Self { eligible: true, reason: None }
    }

    pub const fn ineligible(reason: IneligibleReason) -> Self {
        Self { eligible: false, reason: Some(reason) }
    }
}

/// Tracks verification state per creator
pub struct VerificationTracker {
    accounts: RwLock<HashMap<CreatorId, Account>>,
}

impl Default for VerificationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationTracker {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// Start (or restart after failure) verification; creates the account on first use
    pub fn begin_verification(&self, creator_id: &CreatorId) -> Result<Account> {
        let mut accounts = self.accounts.write()?;
        let account = accounts
            .entry(creator_id.clone())
            .or_insert_with(|| Account::new(creator_id.clone()));

        let to = next_state(account.verification_state, VerificationEvent::Begin)?;
        if to != account.verification_state {
            tracing::info!(
                creator_id = %creator_id,
                from = ?account.verification_state,
                to = ?to,
                "Verification started"
            );
            account.verification_state = to;
            account.updated_at = Utc::now();
        }

        Ok(account.clone())
    }

    /// Apply an outcome from the verification collaborator
    pub fn apply_verification_result(
        &self,
        creator_id: &CreatorId,
        result: VerificationResult,
    ) -> Result<Account> {
        let mut accounts = self.accounts.write()?;
        let account = accounts
            .get_mut(creator_id)
            .ok_or_else(|| LedgerError::AccountNotFound(creator_id.to_string()))?;

        let from = account.verification_state;
        let to = next_state(from, VerificationEvent::Result(result))?;
        account.verification_state = to;
        account.updated_at = Utc::now();

        if from == VerificationState::Verified && to != VerificationState::Verified {
            tracing::warn!(creator_id = %creator_id, to = ?to, "Payout capability revoked");
        } else {
            tracing::info!(creator_id = %creator_id, from = ?from, to = ?to, "Verification updated");
        }

        Ok(account.clone())
    }

    /// Link the processor-side payout account
    pub fn link_external_account(
        &self,
        creator_id: &CreatorId,
        external_account_id: impl Into<String>,
    ) -> Result<Account> {
        let mut accounts = self.accounts.write()?;
        let account = accounts
            .entry(creator_id.clone())
            .or_insert_with(|| Account::new(creator_id.clone()));
        account.external_account_id = Some(external_account_id.into());
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    /// Soft-disable; the account is kept but never eligible
    pub fn disable(&self, creator_id: &CreatorId) -> Result<Account> {
        self.set_disabled(creator_id, true)
    }

    pub fn enable(&self, creator_id: &CreatorId) -> Result<Account> {
        self.set_disabled(creator_id, false)
    }

    fn set_disabled(&self, creator_id: &CreatorId, disabled: bool) -> Result<Account> {
        let mut accounts = self.accounts.write()?;
        let account = accounts
            .get_mut(creator_id)
            .ok_or_else(|| LedgerError::AccountNotFound(creator_id.to_string()))?;
        account.disabled = disabled;
        account.updated_at = Utc::now();
        tracing::info!(creator_id = %creator_id, disabled, "Account enablement changed");
        Ok(account.clone())
    }

    pub fn account(&self, creator_id: &CreatorId) -> Result<Option<Account>> {
        Ok(self.accounts.read()?.get(creator_id).cloned())
    }

    /// True only for an enabled, verified account
    pub fn is_payout_eligible(&self, creator_id: &CreatorId) -> Result<bool> {
        Ok(self
            .accounts
            .read()?
            .get(creator_id)
            .is_some_and(Account::is_payout_eligible))
    }

    /// Eligibility with a reason when not eligible
    pub fn eligibility(&self, creator_id: &CreatorId) -> Result<Eligibility> {
        let accounts = self.accounts.read()?;
        let Some(account) = accounts.get(creator_id) else {
            return Ok(Eligibility::ineligible(IneligibleReason::NoAccount));
        };

        if account.disabled {
            return Ok(Eligibility::ineligible(IneligibleReason::Disabled));
        }

        let eligibility = match account.verification_state {
            VerificationState::Unset => Eligibility::ineligible(IneligibleReason::NotStarted),
            VerificationState::Pending => {
                Eligibility::ineligible(IneligibleReason::VerificationPending)
            }
            VerificationState::Failed => {
                Eligibility::ineligible(IneligibleReason::VerificationFailed)
            }
            VerificationState::Verified if account.external_account_id.is_none() => {
                Eligibility::ineligible(IneligibleReason::NoPayoutAccount)
            }
            VerificationState::Verified => Eligibility::eligible(),
        };

        Ok(eligibility)
    }
}
