//! Revenue Ledger Store
//!
//! Per-creator running totals plus the append-only revenue log. Every
//! mutation runs inside the creator's own lock, so the check and the update
//! of `available` happen in one critical section and two concurrent
//! reservations can never both spend the same balance. Different creators
//! never contend.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{LedgerError, Result};
use crate::model::{
    Balance, CreatorId, Currency, EventId, NewRevenueEvent, Recorded, Reservation, ReservationId,
    RevenueEvent, Settlement,
};

/// Ledger storage trait
///
/// The four balance operations are the only way totals change.
pub trait LedgerStore: Send + Sync {
    /// Append a revenue event and add its amount to `total_earned`
    fn record_event(&self, event: NewRevenueEvent) -> Result<Recorded>;

    /// Hold `amount` if available, refusing when `max_open` holds already exist
    fn reserve_bounded(
        &self,
        creator_id: &CreatorId,
        amount: Decimal,
        max_open: usize,
    ) -> Result<Reservation>;

    /// Hold `amount` if available
    fn reserve(&self, creator_id: &CreatorId, amount: Decimal) -> Result<Reservation> {
        self.reserve_bounded(creator_id, amount, usize::MAX)
    }

    /// Return a hold to the available balance (idempotent per handle)
    fn release(&self, reservation: &Reservation) -> Result<Settlement>;

    /// Move a hold into `total_paid_out` (idempotent per handle)
    fn finalize(&self, reservation: &Reservation) -> Result<Settlement>;

    /// Current totals
    fn balance(&self, creator_id: &CreatorId) -> Result<Balance>;

    /// Revenue log in insertion order
    fn events(&self, creator_id: &CreatorId) -> Result<Vec<RevenueEvent>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HoldState {
    Held,
    Released,
    Finalized,
}

#[derive(Debug)]
struct Hold {
    amount: Decimal,
    state: HoldState,
}

/// One creator's aggregate. Fields are private; only the methods below move money.
#[derive(Debug)]
struct CreatorLedger {
    creator_id: CreatorId,
    currency: Option<Currency>,
    total_earned: Decimal,
    total_paid_out: Decimal,
    reserved: Decimal,
    open_holds: usize,
    events: Vec<RevenueEvent>,
    by_reference: HashMap<String, usize>,
    holds: HashMap<ReservationId, Hold>,
}

impl CreatorLedger {
    fn new(creator_id: CreatorId) -> Self {
        Self {
            creator_id,
            currency: None,
            total_earned: Decimal::ZERO,
            total_paid_out: Decimal::ZERO,
            reserved: Decimal::ZERO,
            open_holds: 0,
            events: Vec::new(),
            by_reference: HashMap::new(),
            holds: HashMap::new(),
        }
    }

    fn available(&self) -> Decimal {
        self.total_earned - self.total_paid_out - self.reserved
    }

    fn record(&mut self, new: NewRevenueEvent) -> Result<Recorded> {
        if let Some(&idx) = self.by_reference.get(&new.external_reference_id) {
            let existing = &self.events[idx];
            if new.matches(existing) {
                return Ok(Recorded { event: existing.clone(), replay: true });
            }
            return Err(LedgerError::DuplicateEvent {
                creator_id: self.creator_id.to_string(),
                reference: new.external_reference_id,
            });
        }

        if new.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(new.amount));
        }

        if let Some(expected) = &self.currency {
            if *expected != new.currency {
                return Err(LedgerError::CurrencyMismatch {
                    expected: expected.clone(),
                    actual: new.currency,
                });
            }
        } else {
            self.currency = Some(new.currency.clone());
        }

        let event = RevenueEvent {
            id: EventId::new(),
            creator_id: new.creator_id,
            source: new.source,
            amount: new.amount,
            currency: new.currency,
            occurred_at: Utc::now(),
            external_reference_id: new.external_reference_id,
        };

        self.total_earned += event.amount;
        self.by_reference
            .insert(event.external_reference_id.clone(), self.events.len());
        self.events.push(event.clone());

        Ok(Recorded { event, replay: false })
    }

    fn reserve(&mut self, amount: Decimal, max_open: usize) -> Result<Reservation> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.open_holds >= max_open {
            return Err(LedgerError::TooManyPending { limit: max_open });
        }

        let available = self.available();
        if available < amount {
            return Err(LedgerError::InsufficientBalance { needed: amount, available });
        }

        let id = ReservationId::new();
        self.reserved += amount;
        self.open_holds += 1;
        self.holds.insert(id, Hold { amount, state: HoldState::Held });
        debug_assert!(self.available() >= Decimal::ZERO);

        Ok(Reservation { id, creator_id: self.creator_id.clone(), amount })
    }

    fn settle(&mut self, id: ReservationId, target: HoldState) -> Result<Settlement> {
        let hold = self
            .holds
            .get_mut(&id)
            .ok_or_else(|| LedgerError::ReservationNotFound(id.to_string()))?;

        match hold.state {
            HoldState::Held => {}
            state if state == target => return Ok(Settlement::AlreadySettled),
            _ => return Err(LedgerError::ReservationConflict(id.to_string())),
        }

        hold.state = target;
        let amount = hold.amount;
        self.reserved -= amount;
        self.open_holds -= 1;
        if target == HoldState::Finalized {
            self.total_paid_out += amount;
        }
        debug_assert!(self.reserved >= Decimal::ZERO);
        debug_assert!(self.available() >= Decimal::ZERO);

        Ok(Settlement::Applied)
    }

    fn snapshot(&self) -> Balance {
        Balance {
            creator_id: self.creator_id.clone(),
            currency: self.currency.clone(),
            available: self.available(),
            reserved: self.reserved,
            total_earned: self.total_earned,
            total_paid_out: self.total_paid_out,
        }
    }
}

/// In-memory ledger store
pub struct MemoryLedgerStore {
    ledgers: RwLock<HashMap<CreatorId, Arc<Mutex<CreatorLedger>>>>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            ledgers: RwLock::new(HashMap::new()),
        }
    }

    fn existing(&self, creator_id: &CreatorId) -> Result<Option<Arc<Mutex<CreatorLedger>>>> {
        Ok(self.ledgers.read()?.get(creator_id).cloned())
    }

    fn get_or_create(&self, creator_id: &CreatorId) -> Result<Arc<Mutex<CreatorLedger>>> {
        if let Some(ledger) = self.existing(creator_id)? {
            return Ok(ledger);
        }
        let mut ledgers = self.ledgers.write()?;
        Ok(ledgers
            .entry(creator_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CreatorLedger::new(creator_id.clone()))))
            .clone())
    }

    fn settle(&self, reservation: &Reservation, target: HoldState) -> Result<Settlement> {
        let ledger = self
            .existing(&reservation.creator_id)?
            .ok_or_else(|| LedgerError::ReservationNotFound(reservation.id.to_string()))?;
        let mut ledger = ledger.lock()?;
        let settlement = ledger.settle(reservation.id, target)?;
        Ok(settlement)
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn record_event(&self, event: NewRevenueEvent) -> Result<Recorded> {
        let ledger = self.get_or_create(&event.creator_id)?;
        let mut ledger = ledger.lock()?;
        let recorded = ledger.record(event)?;

        if recorded.replay {
            tracing::debug!(
                creator_id = %recorded.event.creator_id,
                reference = %recorded.event.external_reference_id,
                "Revenue event replayed, no change"
            );
        } else {
            tracing::info!(
                creator_id = %recorded.event.creator_id,
                source = ?recorded.event.source,
                amount = %recorded.event.amount,
                total_earned = %ledger.total_earned,
                "Recorded revenue event"
            );
        }

        Ok(recorded)
    }

    fn reserve_bounded(
        &self,
        creator_id: &CreatorId,
        amount: Decimal,
        max_open: usize,
    ) -> Result<Reservation> {
        let ledger = self.get_or_create(creator_id)?;
        let mut ledger = ledger.lock()?;
        let reservation = ledger.reserve(amount, max_open)?;

        tracing::debug!(
            creator_id = %creator_id,
            reservation_id = %reservation.id,
            amount = %amount,
            available = %ledger.available(),
            "Reserved balance"
        );

        Ok(reservation)
    }

    fn release(&self, reservation: &Reservation) -> Result<Settlement> {
        self.settle(reservation, HoldState::Released)
    }

    fn finalize(&self, reservation: &Reservation) -> Result<Settlement> {
        self.settle(reservation, HoldState::Finalized)
    }

    fn balance(&self, creator_id: &CreatorId) -> Result<Balance> {
        match self.existing(creator_id)? {
            Some(ledger) => {
                let ledger = ledger.lock()?;
                Ok(ledger.snapshot())
            }
            None => Ok(CreatorLedger::new(creator_id.clone()).snapshot()),
        }
    }

    fn events(&self, creator_id: &CreatorId) -> Result<Vec<RevenueEvent>> {
        match self.existing(creator_id)? {
            Some(ledger) => {
                let ledger = ledger.lock()?;
                Ok(ledger.events.clone())
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RevenueSource;
    use rust_decimal_macros::dec;

    fn tip(creator: &str, amount: Decimal, reference: &str) -> NewRevenueEvent {
        NewRevenueEvent {
            creator_id: CreatorId::new(creator),
            amount,
            currency: Currency::usd(),
            source: RevenueSource::Tip,
            external_reference_id: reference.into(),
        }
    }

    #[test]
    fn test_record_event_accrues() {
        let store = MemoryLedgerStore::new();
        let creator = CreatorId::new("c1");

        store.record_event(tip("c1", dec!(50), "tip-1")).unwrap();
        store.record_event(tip("c1", dec!(12.50), "tip-2")).unwrap();

        let balance = store.balance(&creator).unwrap();
        assert_eq!(balance.total_earned, dec!(62.50));
        assert_eq!(balance.available, dec!(62.50));
        assert_eq!(balance.currency, Some(Currency::usd()));

        let sum: Decimal = store.events(&creator).unwrap().iter().map(|e| e.amount).sum();
        assert_eq!(sum, balance.total_earned);
    }

    #[test]
    fn test_replayed_event_is_idempotent() {
        let store = MemoryLedgerStore::new();
        let first = store.record_event(tip("c1", dec!(50), "tip-1")).unwrap();
        let second = store.record_event(tip("c1", dec!(50), "tip-1")).unwrap();

        assert!(!first.replay);
        assert!(second.replay);
        assert_eq!(first.event.id, second.event.id);
        assert_eq!(store.events(&CreatorId::new("c1")).unwrap().len(), 1);
        assert_eq!(store.balance(&CreatorId::new("c1")).unwrap().total_earned, dec!(50));
    }

    #[test]
    fn test_conflicting_reference_rejected() {
        let store = MemoryLedgerStore::new();
        store.record_event(tip("c1", dec!(50), "tip-1")).unwrap();
        let err = store.record_event(tip("c1", dec!(75), "tip-1")).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEvent { .. }));

        // Same reference under another creator is independent
        assert!(store.record_event(tip("c2", dec!(75), "tip-1")).is_ok());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let store = MemoryLedgerStore::new();
        assert!(matches!(
            store.record_event(tip("c1", dec!(0), "a")),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            store.record_event(tip("c1", dec!(-5), "b")),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(store.events(&CreatorId::new("c1")).unwrap().is_empty());
    }

    #[test]
    fn test_currency_fixed_by_first_event() {
        let store = MemoryLedgerStore::new();
        store.record_event(tip("c1", dec!(10), "a")).unwrap();

        let mut eur = tip("c1", dec!(10), "b");
        eur.currency = Currency::parse("EUR").unwrap();
        assert!(matches!(
            store.record_event(eur),
            Err(LedgerError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_reserve_release_round_trip() {
        let store = MemoryLedgerStore::new();
        let creator = CreatorId::new("c1");
        store.record_event(tip("c1", dec!(80), "a")).unwrap();
        let before = store.balance(&creator).unwrap();

        let hold = store.reserve(&creator, dec!(30)).unwrap();
        let held = store.balance(&creator).unwrap();
        assert_eq!(held.available, dec!(50));
        assert_eq!(held.reserved, dec!(30));

        assert_eq!(store.release(&hold).unwrap(), Settlement::Applied);
        assert_eq!(store.release(&hold).unwrap(), Settlement::AlreadySettled);
        assert_eq!(store.balance(&creator).unwrap(), before);
    }

    #[test]
    fn test_finalize_moves_to_paid_out() {
        let store = MemoryLedgerStore::new();
        let creator = CreatorId::new("c1");
        store.record_event(tip("c1", dec!(80), "a")).unwrap();

        let hold = store.reserve(&creator, dec!(30)).unwrap();
        assert_eq!(store.finalize(&hold).unwrap(), Settlement::Applied);
        assert_eq!(store.finalize(&hold).unwrap(), Settlement::AlreadySettled);

        let balance = store.balance(&creator).unwrap();
        assert_eq!(balance.available, dec!(50));
        assert_eq!(balance.reserved, dec!(0));
        assert_eq!(balance.total_paid_out, dec!(30));

        assert!(matches!(
            store.release(&hold),
            Err(LedgerError::ReservationConflict(_))
        ));
    }

    #[test]
    fn test_reserve_never_overdraws() {
        let store = MemoryLedgerStore::new();
        let creator = CreatorId::new("c1");
        store.record_event(tip("c1", dec!(20), "a")).unwrap();

        let err = store.reserve(&creator, dec!(20.01)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(store.balance(&creator).unwrap().available, dec!(20));
    }

    #[test]
    fn test_reserve_bounded_limits_open_holds() {
        let store = MemoryLedgerStore::new();
        let creator = CreatorId::new("c1");
        store.record_event(tip("c1", dec!(100), "a")).unwrap();

        let first = store.reserve_bounded(&creator, dec!(10), 2).unwrap();
        store.reserve_bounded(&creator, dec!(10), 2).unwrap();
        assert!(matches!(
            store.reserve_bounded(&creator, dec!(10), 2),
            Err(LedgerError::TooManyPending { limit: 2 })
        ));

        store.release(&first).unwrap();
        assert!(store.reserve_bounded(&creator, dec!(10), 2).is_ok());
    }

    #[test]
    fn test_concurrent_reservations_single_winner() {
        let store = Arc::new(MemoryLedgerStore::new());
        let creator = CreatorId::new("c1");
        store.record_event(tip("c1", dec!(25), "a")).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let creator = creator.clone();
                std::thread::spawn(move || store.reserve(&creator, dec!(25)).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);

        let balance = store.balance(&creator).unwrap();
        assert_eq!(balance.available, dec!(0));
        assert_eq!(balance.reserved, dec!(25));
    }
}
