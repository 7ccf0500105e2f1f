//! Availability projection: a per-key cache of physical, reserved and
//! available quantity plus stock value, derivable by replaying the ledger.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ArticleId, DepotId, DomainResult, StockKey, checked_sum, internal};
use stockledger_inventory::{Movement, Reservation};

use crate::locks::poisoned;

/// Drift tolerance for quantity and value reconciliation.
pub const RECONCILE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub key: StockKey,
    pub physical_qty: Decimal,
    pub reserved_qty: Decimal,
    pub available_qty: Decimal,
    pub stock_value: Decimal,
    pub last_update: DateTime<Utc>,
}

impl AvailabilityRecord {
    pub fn empty(key: StockKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            physical_qty: Decimal::ZERO,
            reserved_qty: Decimal::ZERO,
            available_qty: Decimal::ZERO,
            stock_value: Decimal::ZERO,
            last_update: now,
        }
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        self.available_qty = self.physical_qty - self.reserved_qty;
        self.last_update = now;
    }

    /// Fold one movement in. On overflow the record is left untouched.
    pub(crate) fn post(&mut self, movement: &Movement) -> DomainResult<()> {
        let physical = checked_sum(self.physical_qty, movement.signed_quantity(), "physical quantity")?;
        let value = checked_sum(self.stock_value, movement.signed_value(), "stock value")?;
        self.physical_qty = physical;
        self.stock_value = internal(value);
        self.refresh(movement.created_at);
        Ok(())
    }

    pub(crate) fn reserve(&mut self, delta: Decimal, now: DateTime<Utc>) {
        self.reserved_qty += delta;
        self.refresh(now);
    }
}

/// Totals over several keys (cross-lot / cross-location / cross-depot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StockLevel {
    pub physical_qty: Decimal,
    pub reserved_qty: Decimal,
    pub available_qty: Decimal,
    pub stock_value: Decimal,
}

impl StockLevel {
    fn add(mut self, r: &AvailabilityRecord) -> Self {
        self.physical_qty += r.physical_qty;
        self.reserved_qty += r.reserved_qty;
        self.available_qty += r.available_qty;
        self.stock_value += r.stock_value;
        self
    }
}

/// Disagreement between the cached projection and a ledger replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub key: StockKey,
    pub cached_qty: Decimal,
    pub replayed_qty: Decimal,
    pub cached_reserved: Decimal,
    pub replayed_reserved: Decimal,
    pub cached_value: Decimal,
    pub replayed_value: Decimal,
}

pub(crate) type Records = HashMap<StockKey, AvailabilityRecord>;

/// Writes happen only inside a key transaction (ledger append, reserve,
/// release); reads may happen from anywhere.
#[derive(Debug, Default)]
pub struct AvailabilityProjection {
    records: RwLock<Records>,
}

impl AvailabilityProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Records>> {
        self.records.write().map_err(|_| poisoned("projection"))
    }

    fn filtered<F>(&self, pred: F) -> DomainResult<Vec<AvailabilityRecord>>
    where
        F: Fn(&StockKey) -> bool,
    {
        let records = self.records.read().map_err(|_| poisoned("projection"))?;
        let mut out: Vec<_> = records.values().filter(|r| pred(&r.key)).cloned().collect();
        out.sort_by_key(|r| r.key);
        Ok(out)
    }

    /// Point query. Absent keys read as an empty record.
    pub fn get(&self, key: &StockKey) -> DomainResult<AvailabilityRecord> {
        let records = self.records.read().map_err(|_| poisoned("projection"))?;
        Ok(records
            .get(key)
            .cloned()
            .unwrap_or_else(|| AvailabilityRecord::empty(*key, Utc::now())))
    }

    pub fn available(&self, key: &StockKey) -> DomainResult<Decimal> {
        Ok(self.get(key)?.available_qty)
    }

    /// Every record of an article, optionally restricted to one depot.
    pub fn records_for(&self, article: ArticleId, depot: Option<DepotId>) -> DomainResult<Vec<AvailabilityRecord>> {
        self.filtered(|k| k.article == article && depot.is_none_or(|d| k.depot == d))
    }

    /// Article totals across lots and locations (and depots when `depot` is `None`).
    pub fn by_article(&self, article: ArticleId, depot: Option<DepotId>) -> DomainResult<StockLevel> {
        Ok(self
            .records_for(article, depot)?
            .iter()
            .fold(StockLevel::default(), StockLevel::add))
    }

    /// Per-depot totals of an article.
    pub fn by_depot(&self, article: ArticleId) -> DomainResult<BTreeMap<DepotId, StockLevel>> {
        let mut out: BTreeMap<DepotId, StockLevel> = BTreeMap::new();
        for r in self.records_for(article, None)? {
            let level = out.remove(&r.key.depot).unwrap_or_default().add(&r);
            out.insert(r.key.depot, level);
        }
        Ok(out)
    }

    pub fn list_depot(&self, depot: DepotId) -> DomainResult<Vec<AvailabilityRecord>> {
        self.filtered(|k| k.depot == depot)
    }

    pub fn all(&self) -> DomainResult<Vec<AvailabilityRecord>> {
        self.filtered(|_| true)
    }

    /// Replay movements and ACTIVE reservations into a fresh projection.
    pub fn rebuild<'a, M, R>(movements: M, reservations: R) -> DomainResult<Self>
    where
        M: IntoIterator<Item = &'a Movement>,
        R: IntoIterator<Item = &'a Reservation>,
    {
        let mut records = Records::new();
        for m in movements {
            records
                .entry(m.key)
                .or_insert_with(|| AvailabilityRecord::empty(m.key, m.created_at))
                .post(m)?;
        }
        for r in reservations.into_iter().filter(|r| r.is_active()) {
            records
                .entry(r.key)
                .or_insert_with(|| AvailabilityRecord::empty(r.key, r.reserved_at))
                .reserve(r.quantity, r.reserved_at);
        }
        Ok(Self {
            records: RwLock::new(records),
        })
    }

    /// Replace the cache with a replay of `movements` (no reservations).
    pub(crate) fn reset<'a, M>(&self, movements: M) -> DomainResult<()>
    where
        M: IntoIterator<Item = &'a Movement>,
    {
        let fresh = Self::rebuild(movements, std::iter::empty::<&Reservation>())?
            .records
            .into_inner()
            .map_err(|_| poisoned("projection"))?;
        *self.write()? = fresh;
        Ok(())
    }

    /// Compare the cache against a replay; returns keys that drifted beyond tolerance.
    pub fn reconcile<'a, M, R>(&self, movements: M, reservations: R) -> DomainResult<Vec<Drift>>
    where
        M: IntoIterator<Item = &'a Movement>,
        R: IntoIterator<Item = &'a Reservation>,
    {
        let replayed = Self::rebuild(movements, reservations)?;
        let cached = self.records.read().map_err(|_| poisoned("projection"))?;
        let fresh = replayed.records.read().map_err(|_| poisoned("projection"))?;

        let mut keys: Vec<StockKey> = cached.keys().chain(fresh.keys()).copied().collect();
        keys.sort();
        keys.dedup();

        let now = Utc::now();
        let mut drift = Vec::new();
        for key in keys {
            let c = cached.get(&key).cloned().unwrap_or_else(|| AvailabilityRecord::empty(key, now));
            let f = fresh.get(&key).cloned().unwrap_or_else(|| AvailabilityRecord::empty(key, now));
            let off = |a: Decimal, b: Decimal| (a - b).abs() > RECONCILE_TOLERANCE;
            if off(c.physical_qty, f.physical_qty)
                || off(c.reserved_qty, f.reserved_qty)
                || off(c.stock_value, f.stock_value)
            {
                drift.push(Drift {
                    key,
                    cached_qty: c.physical_qty,
                    replayed_qty: f.physical_qty,
                    cached_reserved: c.reserved_qty,
                    replayed_reserved: f.reserved_qty,
                    cached_value: c.stock_value,
                    replayed_value: f.stock_value,
                });
            }
        }
        Ok(drift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use stockledger_core::{LocationId, MovementId, ReservationId, UserId};
    use stockledger_inventory::{DocumentRef, MovementNumber, MovementType};

    fn key() -> StockKey {
        StockKey::new(ArticleId::new(), DepotId::new(), LocationId::new(), None)
    }

    fn movement(key: StockKey, seq: u64, ty: MovementType, qty: Decimal, cost: Decimal) -> Movement {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        Movement {
            id: MovementId::new(),
            seq,
            number: MovementNumber::format(ty.prefix(), date, seq as u32),
            key,
            movement_type: ty,
            quantity: qty,
            unit_cost: cost,
            total_value: internal(qty * cost),
            source: DocumentRef::new("test", "1"),
            movement_date: date,
            created_at: Utc::now(),
            actor: UserId::new(),
            reservation: None,
        }
    }

    #[test]
    fn rebuild_nets_entries_exits_and_active_reservations() {
        let k = key();
        let movements = vec![
            movement(k, 1, MovementType::EntryPurchase, dec!(100), dec!(10)),
            movement(k, 2, MovementType::ExitSale, dec!(40), dec!(10)),
        ];
        let mut cancelled = Reservation::new(ReservationId::new(), k, dec!(5), "SO-2", None, Utc::now()).unwrap();
        cancelled.release(Utc::now());
        let reservations = vec![
            Reservation::new(ReservationId::new(), k, dec!(10), "SO-1", None, Utc::now()).unwrap(),
            cancelled,
        ];

        let p = AvailabilityProjection::rebuild(&movements, &reservations).unwrap();
        let r = p.get(&k).unwrap();
        assert_eq!(r.physical_qty, dec!(60));
        assert_eq!(r.reserved_qty, dec!(10));
        assert_eq!(r.available_qty, dec!(50));
        assert_eq!(r.stock_value, dec!(600));
    }

    #[test]
    fn aggregates_across_depots() {
        let a = key();
        let b = StockKey::new(a.article, DepotId::new(), LocationId::new(), None);
        let movements = vec![
            movement(a, 1, MovementType::EntryPurchase, dec!(10), dec!(1)),
            movement(b, 2, MovementType::EntryPurchase, dec!(5), dec!(2)),
        ];
        let p = AvailabilityProjection::rebuild(&movements, &Vec::<Reservation>::new()).unwrap();

        let total = p.by_article(a.article, None).unwrap();
        assert_eq!(total.physical_qty, dec!(15));
        assert_eq!(total.stock_value, dec!(20));
        assert_eq!(p.by_article(a.article, Some(b.depot)).unwrap().physical_qty, dec!(5));
        assert_eq!(p.by_depot(a.article).unwrap().len(), 2);
        assert_eq!(p.list_depot(a.depot).unwrap().len(), 1);
    }

    #[test]
    fn overflowing_post_leaves_the_record_untouched() {
        let k = key();
        let mut record = AvailabilityRecord::empty(k, Utc::now());
        record
            .post(&movement(k, 1, MovementType::EntryPurchase, Decimal::MAX, Decimal::ZERO))
            .unwrap();
        let before = record.clone();

        let err = record
            .post(&movement(k, 2, MovementType::EntryPurchase, dec!(1), Decimal::ZERO))
            .unwrap_err();
        assert!(matches!(err, stockledger_core::DomainError::Validation(_)));
        assert_eq!(record, before);
    }

    #[test]
    fn reconcile_reports_drift_only_beyond_tolerance() {
        let k = key();
        let movements = vec![movement(k, 1, MovementType::EntryPurchase, dec!(10), dec!(3))];
        let p = AvailabilityProjection::rebuild(&movements, &Vec::<Reservation>::new()).unwrap();
        assert!(p.reconcile(&movements, &Vec::<Reservation>::new()).unwrap().is_empty());

        p.write().unwrap().get_mut(&k).unwrap().physical_qty += dec!(1);
        let drift = p.reconcile(&movements, &Vec::<Reservation>::new()).unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].cached_qty, dec!(11));
        assert_eq!(drift[0].replayed_qty, dec!(10));
    }
}
