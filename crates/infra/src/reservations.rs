//! Reservation manager: available-to-promise holds on a stock key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use stockledger_core::{
    ArticleId, DepotId, DomainError, DomainResult, Entity, LocationId, LotId, ReservationId,
    StockKey, UserId,
};
use stockledger_events::{AuditRecord, AuditSink};
use stockledger_inventory::Reservation;

use crate::catalog::Catalog;
use crate::locks::{LockTable, poisoned};
use crate::lots::LotRegistry;
use crate::projection::{AvailabilityProjection, AvailabilityRecord};
use crate::resolve;

pub(crate) type Book = HashMap<ReservationId, Reservation>;

/// Input to [`ReservationManager::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    /// Caller-chosen id; retrying with the same id is idempotent.
    pub id: Option<ReservationId>,
    pub article: ArticleId,
    pub depot: DepotId,
    /// Defaults to the depot's default location.
    pub location: Option<LocationId>,
    pub lot: Option<LotId>,
    pub quantity: Decimal,
    pub demand_ref: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ReserveRequest {
    pub fn new(article: ArticleId, depot: DepotId, quantity: Decimal, demand_ref: impl Into<String>) -> Self {
        Self {
            id: None,
            article,
            depot,
            location: None,
            lot: None,
            quantity,
            demand_ref: demand_ref.into(),
            expires_at: None,
        }
    }

    pub fn with_id(mut self, id: ReservationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn at_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_lot(mut self, lot: Option<LotId>) -> Self {
        self.lot = lot;
        self
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

pub struct ReservationManager {
    book: RwLock<Book>,
    catalog: Arc<dyn Catalog>,
    projection: Arc<AvailabilityProjection>,
    lots: Arc<LotRegistry>,
    keys: Arc<LockTable<StockKey>>,
    audit: Arc<dyn AuditSink>,
}

impl ReservationManager {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        projection: Arc<AvailabilityProjection>,
        lots: Arc<LotRegistry>,
        keys: Arc<LockTable<StockKey>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            book: RwLock::new(Book::new()),
            catalog,
            projection,
            lots,
            keys,
            audit,
        }
    }

    pub(crate) fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Book>> {
        self.book.write().map_err(|_| poisoned("reservation book"))
    }

    pub(crate) fn emit(&self, record: AuditRecord) {
        self.audit.emit(record);
    }

    pub fn get(&self, id: ReservationId) -> DomainResult<Option<Reservation>> {
        let book = self.book.read().map_err(|_| poisoned("reservation book"))?;
        Ok(book.get(&id).cloned())
    }

    fn select<F>(&self, pred: F) -> DomainResult<Vec<Reservation>>
    where
        F: Fn(&Reservation) -> bool,
    {
        let book = self.book.read().map_err(|_| poisoned("reservation book"))?;
        let mut out: Vec<Reservation> = book.values().filter(|r| pred(r)).cloned().collect();
        out.sort_by_key(|r| (r.reserved_at, r.id));
        Ok(out)
    }

    pub fn active_at(&self, key: &StockKey) -> DomainResult<Vec<Reservation>> {
        self.select(|r| r.is_active() && r.key == *key)
    }

    pub fn by_demand(&self, demand_ref: &str) -> DomainResult<Vec<Reservation>> {
        self.select(|r| r.demand_ref == demand_ref)
    }

    pub fn all(&self) -> DomainResult<Vec<Reservation>> {
        self.select(|_| true)
    }

    /// Hold `quantity` at a key. Fails with `InsufficientStock` and no state
    /// change when availability is short.
    #[instrument(skip(self, req), fields(article = %req.article, depot = %req.depot, qty = %req.quantity))]
    pub fn reserve(&self, req: ReserveRequest, actor: UserId) -> DomainResult<Reservation> {
        if let Some(existing) = req.id.map(|id| self.get(id)).transpose()?.flatten() {
            debug!(reservation = %existing.id, "reservation replayed");
            return Ok(existing);
        }

        let location = resolve::location(self.catalog.as_ref(), req.depot, req.location)?;
        let key = StockKey::new(req.article, req.depot, location, req.lot);
        let now = Utc::now();
        if let Some(lot) = req.lot {
            resolve::lot(&self.lots, lot, req.article, true, now.date_naive())?;
        }

        let handle = self.keys.handle(&key)?;
        let _key_guard = self.keys.acquire(&handle)?;

        let mut book = self.write()?;
        if let Some(existing) = req.id.and_then(|id| book.get(&id)) {
            return Ok(existing.clone());
        }

        let mut records = self.projection.write()?;
        let available = records.get(&key).map(|r| r.available_qty).unwrap_or(Decimal::ZERO);
        if available < req.quantity {
            return Err(DomainError::insufficient(key, available, req.quantity));
        }

        let reservation = Reservation::new(
            req.id.unwrap_or_default(),
            key,
            req.quantity,
            req.demand_ref,
            req.expires_at,
            now,
        )?;
        records
            .entry(key)
            .or_insert_with(|| AvailabilityRecord::empty(key, now))
            .reserve(reservation.quantity, now);
        book.insert(reservation.id, reservation.clone());
        drop(records);
        drop(book);

        info!(reservation = %reservation.id, key = %key, qty = %reservation.quantity, "stock reserved");
        self.emit(AuditRecord::created(
            Reservation::entity_name(),
            reservation.id,
            &reservation,
            Some(actor),
        ));
        Ok(reservation)
    }

    /// ACTIVE → CANCELLED, freeing the reserved quantity. A repeat call on a
    /// terminal reservation returns `false` and changes nothing.
    #[instrument(skip(self))]
    pub fn release(&self, id: ReservationId, actor: UserId) -> DomainResult<bool> {
        self.close(id, "release", Some(actor), |r, now| Ok(r.release(now)))
    }

    /// ACTIVE → CONSUMED, freeing the reserved quantity. Used when the paired
    /// exit was posted without naming the reservation.
    #[instrument(skip(self))]
    pub fn consume(&self, id: ReservationId, actor: UserId) -> DomainResult<bool> {
        self.close(id, "consume", Some(actor), |r, now| r.consume(now))
    }

    /// Sweep: expire every ACTIVE reservation past its expiration date.
    pub fn expire_due(&self, now: DateTime<Utc>) -> DomainResult<Vec<ReservationId>> {
        let due: Vec<ReservationId> = self.select(|r| r.is_due(now))?.into_iter().map(|r| r.id).collect();
        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if self.close(id, "expire", None, |r, _| Ok(r.expire(now)))? {
                expired.push(id);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "reservations expired");
        }
        Ok(expired)
    }

    fn close<F>(&self, id: ReservationId, action: &'static str, actor: Option<UserId>, f: F) -> DomainResult<bool>
    where
        F: FnOnce(&mut Reservation, DateTime<Utc>) -> DomainResult<bool>,
    {
        let key = self
            .get(id)?
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")))?
            .key;

        let handle = self.keys.handle(&key)?;
        let _key_guard = self.keys.acquire(&handle)?;

        let mut book = self.write()?;
        let mut records = self.projection.write()?;
        let reservation = book
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")))?;

        let now = Utc::now();
        let before = reservation.clone();
        let mut next = reservation.clone();
        if !f(&mut next, now)? {
            debug!(reservation = %id, action, status = ?before.status, "reservation already closed");
            return Ok(false);
        }
        *reservation = next.clone();
        records
            .entry(key)
            .or_insert_with(|| AvailabilityRecord::empty(key, now))
            .reserve(-next.quantity, now);
        drop(records);
        drop(book);

        info!(reservation = %id, action, qty = %next.quantity, "reservation closed");
        self.emit(AuditRecord::capture(
            Reservation::entity_name(),
            id,
            action,
            Some(&before),
            Some(&next),
            actor,
        ));
        Ok(true)
    }
}
