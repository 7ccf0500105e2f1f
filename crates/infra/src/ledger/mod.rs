//! Movement ledger: the append-only source of truth for stock quantities.
//!
//! `append` is the single write path for physical quantities. Under the depot
//! gate (read side), the stock-key lock and the article cost lock it:
//!
//! ```text
//! validate → check freeze → check availability (net of a consumed reservation)
//!   → price through the valuation state → allocate numbers → insert
//!   → update projection, reservation and cost state
//! ```
//!
//! Every fallible step runs before the first mutation, so a rejected or
//! failed append leaves no trace apart from burned movement numbers.

pub mod sequence;
pub mod store;

use std::sync::{Arc, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stockledger_core::{
    ArticleId, DepotId, DomainError, DomainResult, Entity, LocationId, LotId, MovementId, StockKey,
    UserId, checked_value, display,
};
use stockledger_events::{AuditRecord, AuditSink};
use stockledger_inventory::{
    DocumentRef, Movement, MovementNumber, MovementRequest, MovementType, Reservation, ValuedSlice,
};

use crate::catalog::Catalog;
use crate::locks::{DepotGates, LockTable, poisoned};
use crate::lots::LotRegistry;
use crate::projection::{AvailabilityProjection, AvailabilityRecord};
use crate::reservations::ReservationManager;
use crate::resolve;
use crate::valuation::ValuationEngine;

pub use sequence::NumberSequence;
pub use store::{InMemoryMovementStore, MovementFilter, MovementStore};

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendOutcome {
    /// One movement, or one per FIFO layer touched by an exit.
    pub movements: Vec<Movement>,
    /// Dated inside a closed period but created after the close.
    pub backdated: bool,
}

impl AppendOutcome {
    pub fn quantity(&self) -> Decimal {
        self.movements.iter().map(|m| m.quantity).sum()
    }

    pub fn total_value(&self) -> Decimal {
        self.movements.iter().map(|m| m.total_value).sum()
    }

    /// Realised unit cost across all slices.
    pub fn unit_cost(&self) -> Decimal {
        let qty = self.quantity();
        if qty.is_zero() {
            Decimal::ZERO
        } else {
            stockledger_core::internal(self.total_value() / qty)
        }
    }

    pub fn numbers(&self) -> Vec<MovementNumber> {
        self.movements.iter().map(|m| m.number.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodClose {
    pub through: NaiveDate,
    pub closed_at: DateTime<Utc>,
}

/// Movement request as sent by the purchasing/sales document flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMovement {
    pub article_id: ArticleId,
    pub depot_id: DepotId,
    pub location: Option<LocationId>,
    pub lot: Option<LotId>,
    pub quantity: Decimal,
    pub document_type: String,
    pub document_id: String,
    pub unit_cost: Option<Decimal>,
}

impl DocumentMovement {
    pub fn into_request(self, actor: UserId, movement_date: NaiveDate) -> DomainResult<MovementRequest> {
        let movement_type = MovementType::from_document_type(&self.document_type)?;
        let mut req = MovementRequest::new(
            movement_type,
            self.article_id,
            self.depot_id,
            self.quantity,
            DocumentRef::new(self.document_type, self.document_id),
            actor,
        )
        .with_lot(self.lot)
        .dated(movement_date);
        if let Some(location) = self.location {
            req = req.at_location(location);
        }
        if let Some(cost) = self.unit_cost {
            req = req.with_unit_cost(cost);
        }
        Ok(req)
    }
}

pub struct MovementLedger {
    store: Arc<dyn MovementStore>,
    numbers: NumberSequence,
    period_close: RwLock<Option<PeriodClose>>,
    backdated: RwLock<Vec<MovementNumber>>,
    catalog: Arc<dyn Catalog>,
    projection: Arc<AvailabilityProjection>,
    valuation: Arc<ValuationEngine>,
    reservations: Arc<ReservationManager>,
    lots: Arc<LotRegistry>,
    keys: Arc<LockTable<StockKey>>,
    gates: Arc<DepotGates>,
    audit: Arc<dyn AuditSink>,
}

/// Collaborators the ledger updates inside its transaction.
pub struct LedgerParts {
    pub store: Arc<dyn MovementStore>,
    pub catalog: Arc<dyn Catalog>,
    pub projection: Arc<AvailabilityProjection>,
    pub valuation: Arc<ValuationEngine>,
    pub reservations: Arc<ReservationManager>,
    pub lots: Arc<LotRegistry>,
    pub keys: Arc<LockTable<StockKey>>,
    pub gates: Arc<DepotGates>,
    pub audit: Arc<dyn AuditSink>,
}

impl MovementLedger {
    /// Build a ledger over `parts.store`, continuing its sequence and
    /// movement numbers.
    pub fn new(parts: LedgerParts) -> DomainResult<Self> {
        let numbers = NumberSequence::resume(&parts.store.all()?)?;
        Ok(Self {
            store: parts.store,
            numbers,
            period_close: RwLock::new(None),
            backdated: RwLock::new(Vec::new()),
            catalog: parts.catalog,
            projection: parts.projection,
            valuation: parts.valuation,
            reservations: parts.reservations,
            lots: parts.lots,
            keys: parts.keys,
            gates: parts.gates,
            audit: parts.audit,
        })
    }

    /// Post one movement request. See the module docs for the transaction shape.
    #[instrument(
        skip(self, req),
        fields(kind = ?req.movement_type, article = %req.article, depot = %req.depot, qty = %req.quantity)
    )]
    pub fn append(&self, req: MovementRequest) -> DomainResult<AppendOutcome> {
        if req.quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "movement quantity must be positive (got {})",
                req.quantity
            )));
        }
        if req.consumes.is_some() && req.movement_type.is_entry() {
            return Err(DomainError::validation("only exits can consume a reservation"));
        }

        let article = resolve::article(self.catalog.as_ref(), req.article)?;
        let depot = resolve::depot(self.catalog.as_ref(), req.depot)?;
        let location = resolve::location(self.catalog.as_ref(), depot.id, req.location)?;
        let key = StockKey::new(article.id, depot.id, location, req.lot);

        if let Some(cost) = req.unit_cost.filter(|_| req.movement_type.is_entry()) {
            checked_value(req.quantity, cost)?;
        }

        let now = Utc::now();
        let today = now.date_naive();
        if let Some(lot) = req.lot {
            resolve::lot(&self.lots, lot, article.id, req.movement_type.requires_available_lot(), today)?;
        }

        let gate = self.gates.gate(depot.id)?;
        let freeze = DepotGates::read(&gate)?;
        if !freeze.admits(req.inventory) {
            warn!(depot = %depot.code, "movement rejected: depot frozen by inventory");
            return Err(DomainError::MovementsFrozen { depot: depot.code });
        }

        let key_handle = self.keys.handle(&key)?;
        let _key_guard = self.keys.acquire(&key_handle)?;
        let cost_handle = self.valuation.handle(article.id, article.costing_method)?;
        let mut cost = ValuationEngine::lock(&cost_handle)?;
        let mut book = self.reservations.write()?;
        let mut records = self.projection.write()?;

        let mut record = records
            .get(&key)
            .cloned()
            .unwrap_or_else(|| AvailabilityRecord::empty(key, now));

        let consumed: Option<(Reservation, Reservation)> = match req.consumes {
            None => None,
            Some(id) => {
                let held = book
                    .get(&id)
                    .ok_or_else(|| DomainError::not_found(format!("reservation {id}")))?;
                if held.key != key {
                    return Err(DomainError::validation(format!(
                        "reservation {id} holds {}, not {key}",
                        held.key
                    )));
                }
                let mut next = held.clone();
                if next.consume(now)? { Some((held.clone(), next)) } else { None }
            }
        };
        let released = consumed.as_ref().map(|(r, _)| r.quantity).unwrap_or(Decimal::ZERO);

        if req.movement_type.is_exit() {
            let available = record.available_qty + released;
            if available < req.quantity {
                return Err(DomainError::insufficient(key, available, req.quantity));
            }
        }

        let prefix = req.movement_type.prefix();
        let mut next_cost = cost.clone();
        let numbered: Vec<(u64, MovementNumber, ValuedSlice)> = if req.movement_type.is_entry() {
            // The FIFO layer is tagged with the entry's seq.
            let (seq, number) = self.numbers.next_movement(prefix, today)?;
            let unit_cost = req.unit_cost.unwrap_or_else(|| next_cost.current_unit_cost());
            let slice = next_cost.on_entry(key, seq, req.movement_date, req.quantity, unit_cost)?;
            vec![(seq, number, slice)]
        } else {
            let slices = next_cost.on_exit(key, req.quantity)?;
            self.numbers
                .movements(prefix, today, slices.len())?
                .into_iter()
                .zip(slices)
                .map(|((seq, number), slice)| (seq, number, slice))
                .collect()
        };

        let mut movements = Vec::with_capacity(numbered.len());
        for (seq, number, slice) in numbered {
            movements.push(Movement {
                id: MovementId::new(),
                seq,
                number,
                key,
                movement_type: req.movement_type,
                quantity: slice.quantity,
                unit_cost: slice.unit_cost,
                total_value: slice.total_value,
                source: req.source.clone(),
                movement_date: req.movement_date,
                created_at: now,
                actor: req.actor,
                reservation: req.consumes,
            });
        }

        let backdated = self
            .period_close
            .read()
            .map_err(|_| poisoned("period close"))?
            .is_some_and(|c| req.movement_date <= c.through && now > c.closed_at);
        let mut flagged = if backdated {
            Some(self.backdated.write().map_err(|_| poisoned("backdated list"))?)
        } else {
            None
        };

        for m in &movements {
            record.post(m)?;
        }

        self.store.insert(&movements)?;

        // Commit: nothing below can fail.
        if !released.is_zero() {
            record.reserve(-released, now);
        }
        records.insert(key, record);
        if let Some((_, next)) = &consumed {
            book.insert(next.id, next.clone());
        }
        *cost = next_cost;
        if let Some(list) = flagged.as_mut() {
            list.extend(movements.iter().map(|m| m.number.clone()));
        }

        drop(flagged);
        drop(records);
        drop(book);
        drop(cost);
        drop(freeze);

        for m in &movements {
            info!(
                movement = %m.number,
                article = %m.key.article,
                depot = %m.key.depot,
                qty = %m.quantity,
                unit_cost = %m.unit_cost,
                value = %display(m.total_value),
                "movement posted"
            );
            self.audit
                .emit(AuditRecord::created("movement", &m.number, m, Some(m.actor)));
        }
        if backdated {
            warn!(date = %req.movement_date, "backdated movement into a closed period");
        }
        if let Some((before, after)) = &consumed {
            self.reservations.emit(AuditRecord::capture(
                Reservation::entity_name(),
                after.id,
                "consume",
                Some(before),
                Some(after),
                Some(req.actor),
            ));
        }

        Ok(AppendOutcome { movements, backdated })
    }

    /// Rebuild projection and cost state from the store. Call once, on a
    /// fresh engine, when the store already holds movements.
    pub fn replay(&self) -> DomainResult<usize> {
        let movements = self.store.all()?;
        if movements.is_empty() {
            return Ok(0);
        }
        for m in &movements {
            let article = self
                .catalog
                .article(m.key.article)?
                .ok_or_else(|| DomainError::not_found(format!("article {}", m.key.article)))?;
            let handle = self.valuation.handle(article.id, article.costing_method)?;
            let mut cost = ValuationEngine::lock(&handle)?;
            if m.is_entry() {
                cost.on_entry(m.key, m.seq, m.movement_date, m.quantity, m.unit_cost)?;
            } else {
                cost.on_exit(m.key, m.quantity)?;
            }
        }
        self.projection.reset(&movements)?;
        info!(movements = movements.len(), "ledger replayed");
        Ok(movements.len())
    }

    /// Post a movement coming from a purchasing/sales document.
    pub fn append_document(&self, doc: DocumentMovement, actor: UserId) -> DomainResult<AppendOutcome> {
        self.append(doc.into_request(actor, Utc::now().date_naive())?)
    }

    /// Close every period up to and including `through`. Movements dated on
    /// or before it and created afterwards are flagged, never corrected.
    pub fn close_period(&self, through: NaiveDate) -> DomainResult<PeriodClose> {
        let close = PeriodClose {
            through,
            closed_at: Utc::now(),
        };
        let mut current = self.period_close.write().map_err(|_| poisoned("period close"))?;
        if current.is_some_and(|c| c.through > through) {
            return Err(DomainError::validation(format!(
                "periods are already closed through {}",
                current.map(|c| c.through).unwrap_or(through)
            )));
        }
        *current = Some(close);
        info!(%through, "period closed");
        Ok(close)
    }

    pub fn period_close(&self) -> DomainResult<Option<PeriodClose>> {
        Ok(*self.period_close.read().map_err(|_| poisoned("period close"))?)
    }

    /// Movements flagged as backdated, in ledger order.
    pub fn backdated(&self) -> DomainResult<Vec<Movement>> {
        let numbers = self.backdated.read().map_err(|_| poisoned("backdated list"))?.clone();
        Ok(self
            .store
            .all()?
            .into_iter()
            .filter(|m| numbers.contains(&m.number))
            .collect())
    }

    pub fn query(&self, filter: &MovementFilter) -> DomainResult<Vec<Movement>> {
        self.store.query(filter)
    }

    pub fn all(&self) -> DomainResult<Vec<Movement>> {
        self.store.all()
    }

    pub fn by_article(&self, article: ArticleId) -> DomainResult<Vec<Movement>> {
        self.query(&MovementFilter::article(article))
    }

    pub fn by_depot(&self, depot: DepotId) -> DomainResult<Vec<Movement>> {
        self.query(&MovementFilter::depot(depot))
    }

    pub fn by_lot(&self, lot: LotId) -> DomainResult<Vec<Movement>> {
        self.query(&MovementFilter::lot(lot))
    }

    pub fn by_period(&self, from: NaiveDate, to: NaiveDate) -> DomainResult<Vec<Movement>> {
        self.query(&MovementFilter::default().between(from, to))
    }

    pub fn by_document(&self, source: &DocumentRef) -> DomainResult<Vec<Movement>> {
        self.query(&MovementFilter::source(source.clone()))
    }

    pub fn entries_at(&self, key: StockKey) -> DomainResult<Vec<Movement>> {
        self.query(&MovementFilter::key(key).entries())
    }

    /// Replay the ledger and reservations against the cached projection.
    pub fn reconcile(&self) -> DomainResult<Vec<crate::projection::Drift>> {
        let movements = self.store.all()?;
        let reservations = self.reservations.all()?;
        let drift = self.projection.reconcile(&movements, &reservations)?;
        if drift.is_empty() {
            debug!(movements = movements.len(), "projection reconciled");
        } else {
            warn!(keys = drift.len(), "projection drift detected");
        }
        Ok(drift)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use rust_decimal_macros::dec;
    use stockledger_core::InventoryId;
    use stockledger_inventory::{CostingMethod, NewLot};

    use super::*;
    use crate::reservations::ReserveRequest;
    use crate::testkit::Kit;

    /// Store whose inserts can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryMovementStore,
        failing: AtomicBool,
    }

    impl MovementStore for FlakyStore {
        fn insert(&self, batch: &[Movement]) -> DomainResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DomainError::persistence("disk full"));
            }
            self.inner.insert(batch)
        }

        fn query(&self, filter: &MovementFilter) -> DomainResult<Vec<Movement>> {
            self.inner.query(filter)
        }
    }

    #[test]
    fn entry_updates_projection_and_average_cost() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);

        let out = kit.receive(&x, dec!(100), dec!(10.00));
        assert_eq!(out.movements.len(), 1);
        assert!(out.movements[0].number.as_str().starts_with("REC-"));

        let rec = kit.engine.projection().get(&kit.key(&x)).unwrap();
        assert_eq!(rec.physical_qty, dec!(100));
        assert_eq!(rec.available_qty, dec!(100));
        assert_eq!(rec.stock_value, dec!(1000.00));
        assert_eq!(kit.engine.valuation().current_unit_cost(x.id).unwrap(), dec!(10.00));
    }

    #[test]
    fn fifo_exit_is_split_per_layer() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::Fifo);
        kit.receive(&x, dec!(10), dec!(5));
        kit.receive(&x, dec!(10), dec!(7));

        let out = kit
            .engine
            .ledger()
            .append(kit.request(MovementType::ExitSale, &x, dec!(15)))
            .unwrap();

        assert_eq!(out.movements.len(), 2);
        assert_eq!(out.movements[0].quantity, dec!(10));
        assert_eq!(out.movements[0].unit_cost, dec!(5));
        assert_eq!(out.movements[1].quantity, dec!(5));
        assert_eq!(out.movements[1].unit_cost, dec!(7));
        assert_eq!(out.quantity(), dec!(15));
        assert_eq!(out.total_value(), dec!(85));

        let rec = kit.engine.projection().get(&kit.key(&x)).unwrap();
        assert_eq!(rec.physical_qty, dec!(5));
        assert_eq!(rec.stock_value, dec!(35));
    }

    #[test]
    fn exit_beyond_available_is_rejected_without_side_effects() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);
        kit.receive(&x, dec!(10), dec!(2));
        kit.engine
            .reservations()
            .reserve(ReserveRequest::new(x.id, kit.depot.id, dec!(4), "SO-1"), kit.user)
            .unwrap();

        let err = kit
            .engine
            .ledger()
            .append(kit.request(MovementType::ExitSale, &x, dec!(7)))
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));

        let rec = kit.engine.projection().get(&kit.key(&x)).unwrap();
        assert_eq!(rec.physical_qty, dec!(10));
        assert_eq!(rec.available_qty, dec!(6));
        assert_eq!(kit.engine.ledger().all().unwrap().len(), 1);
    }

    #[test]
    fn exit_can_consume_its_reservation() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);
        kit.receive(&x, dec!(10), dec!(2));
        let r = kit
            .engine
            .reservations()
            .reserve(ReserveRequest::new(x.id, kit.depot.id, dec!(10), "SO-1"), kit.user)
            .unwrap();

        kit.engine
            .ledger()
            .append(kit.request(MovementType::ExitSale, &x, dec!(10)).consuming(r.id))
            .unwrap();

        let rec = kit.engine.projection().get(&kit.key(&x)).unwrap();
        assert_eq!(rec.physical_qty, dec!(0));
        assert_eq!(rec.reserved_qty, dec!(0));
        assert_eq!(rec.available_qty, dec!(0));
        let stored = kit.engine.reservations().get(r.id).unwrap().unwrap();
        assert!(!stored.is_active());
    }

    #[test]
    fn failed_insert_burns_numbers_and_changes_nothing() {
        let store = Arc::new(FlakyStore::default());
        let kit = Kit::with_store(store.clone());
        let x = kit.article("X", CostingMethod::WeightedAverage);
        let first = kit.receive(&x, dec!(5), dec!(1));

        store.failing.store(true, Ordering::SeqCst);
        let err = kit
            .engine
            .ledger()
            .append(kit.request(MovementType::EntryPurchase, &x, dec!(5)).with_unit_cost(dec!(3)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Persistence(_)));
        assert_eq!(kit.engine.projection().get(&kit.key(&x)).unwrap().physical_qty, dec!(5));
        assert_eq!(kit.engine.valuation().current_unit_cost(x.id).unwrap(), dec!(1));

        store.failing.store(false, Ordering::SeqCst);
        let third = kit.receive(&x, dec!(5), dec!(1));
        let n1 = first.movements[0].number.as_str().to_string();
        let n3 = third.movements[0].number.as_str().to_string();
        assert!(n1.ends_with("-00001"));
        assert!(n3.ends_with("-00003"));
        assert!(third.movements[0].seq > first.movements[0].seq + 1);
    }

    #[test]
    fn frozen_depot_only_admits_its_inventory() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);
        kit.receive(&x, dec!(5), dec!(1));

        let inv = InventoryId::new();
        {
            let gate = kit.engine.ledger().gates.gate(kit.depot.id).unwrap();
            DepotGates::write(&gate).unwrap().frozen_by = Some(inv);
        }

        let err = kit
            .engine
            .ledger()
            .append(kit.request(MovementType::EntryPurchase, &x, dec!(1)))
            .unwrap_err();
        assert!(matches!(err, DomainError::MovementsFrozen { .. }));

        kit.engine
            .ledger()
            .append(kit.request(MovementType::EntryAdjustment, &x, dec!(1)).for_inventory(inv))
            .unwrap();
        assert_eq!(kit.engine.projection().get(&kit.key(&x)).unwrap().physical_qty, dec!(6));
    }

    #[test]
    fn movements_into_a_closed_period_are_flagged() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);
        let today = Utc::now().date_naive();
        let yesterday = today.pred_opt().unwrap();
        kit.engine.ledger().close_period(yesterday).unwrap();

        let late = kit
            .engine
            .ledger()
            .append(
                kit.request(MovementType::EntryPurchase, &x, dec!(1))
                    .with_unit_cost(dec!(1))
                    .dated(yesterday),
            )
            .unwrap();
        assert!(late.backdated);
        let current = kit.receive(&x, dec!(1), dec!(1));
        assert!(!current.backdated);

        let flagged = kit.engine.ledger().backdated().unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].number, late.movements[0].number);

        assert!(kit.engine.ledger().close_period(yesterday.pred_opt().unwrap()).is_err());
    }

    #[test]
    fn blocked_lot_rejects_sales_but_admits_scrap() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);
        let lot = kit.engine.lots().register(NewLot::new("L-1", x.id), kit.user).unwrap();
        kit.engine
            .ledger()
            .append(
                kit.request(MovementType::EntryPurchase, &x, dec!(10))
                    .with_lot(Some(lot.id))
                    .with_unit_cost(dec!(1)),
            )
            .unwrap();
        kit.engine.lots().block(lot.id, "recall", kit.user).unwrap();

        let err = kit
            .engine
            .ledger()
            .append(kit.request(MovementType::ExitSale, &x, dec!(1)).with_lot(Some(lot.id)))
            .unwrap_err();
        assert!(matches!(err, DomainError::LotUnavailable { .. }));

        kit.engine
            .ledger()
            .append(kit.request(MovementType::ExitScrap, &x, dec!(10)).with_lot(Some(lot.id)))
            .unwrap();
    }

    #[test]
    fn replay_restores_projection_and_costs() {
        let store = Arc::new(InMemoryMovementStore::new());
        let kit = Kit::with_store(store.clone());
        let x = kit.article("X", CostingMethod::Fifo);
        kit.receive(&x, dec!(10), dec!(5));
        kit.receive(&x, dec!(10), dec!(7));
        kit.engine
            .ledger()
            .append(kit.request(MovementType::ExitSale, &x, dec!(12)))
            .unwrap();

        let reopened = reopen(&kit, store);
        let rec = reopened.projection().get(&kit.key(&x)).unwrap();
        assert_eq!(rec.physical_qty, dec!(8));
        assert_eq!(rec.stock_value, dec!(56));
        assert_eq!(reopened.valuation().current_unit_cost(x.id).unwrap(), dec!(7));
        assert!(reopened.ledger().reconcile().unwrap().is_empty());
    }

    #[test]
    fn reopened_ledger_continues_numbering() {
        let store = Arc::new(InMemoryMovementStore::new());
        let kit = Kit::with_store(store.clone());
        let x = kit.article("X", CostingMethod::WeightedAverage);
        let first = kit.receive(&x, dec!(5), dec!(1));

        let reopened = reopen(&kit, store.clone());
        let second = reopened
            .ledger()
            .append(kit.request(MovementType::EntryPurchase, &x, dec!(5)).with_unit_cost(dec!(1)))
            .unwrap();

        assert!(first.movements[0].number.as_str().ends_with("-00001"));
        assert!(second.movements[0].number.as_str().ends_with("-00002"));
        assert!(second.movements[0].seq > first.movements[0].seq);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn overflowing_entries_are_rejected_and_the_ledger_keeps_working() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);
        let y = kit.article("Y", CostingMethod::Fifo);

        let err = kit
            .engine
            .ledger()
            .append(kit.request(MovementType::EntryPurchase, &x, Decimal::MAX).with_unit_cost(dec!(2)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        kit.receive(&y, Decimal::MAX, Decimal::ZERO);
        let err = kit
            .engine
            .ledger()
            .append(kit.request(MovementType::EntryPurchase, &y, dec!(1)).with_unit_cost(Decimal::ZERO))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(kit.engine.projection().get(&kit.key(&y)).unwrap().physical_qty, Decimal::MAX);

        kit.receive(&x, dec!(10), dec!(2));
        let rec = kit.engine.projection().get(&kit.key(&x)).unwrap();
        assert_eq!(rec.physical_qty, dec!(10));
        assert_eq!(rec.stock_value, dec!(20));
        assert!(kit.engine.ledger().reconcile().unwrap().is_empty());
    }

    fn reopen(kit: &Kit, store: Arc<InMemoryMovementStore>) -> crate::engine::StockEngine {
        crate::engine::StockEngine::with_store(
            crate::config::StockConfig::default(),
            store,
            kit.catalog.clone(),
            kit.authz.clone(),
            kit.audit.clone(),
        )
        .unwrap()
    }

    #[test]
    fn document_types_map_to_movement_types() {
        let kit = Kit::new();
        let x = kit.article("X", CostingMethod::WeightedAverage);
        let doc = DocumentMovement {
            article_id: x.id,
            depot_id: kit.depot.id,
            location: None,
            lot: None,
            quantity: dec!(3),
            document_type: "purchase_receipt".to_string(),
            document_id: "PO-7".to_string(),
            unit_cost: Some(dec!(4)),
        };
        let out = kit.engine.ledger().append_document(doc, kit.user).unwrap();
        assert_eq!(out.movements[0].movement_type, MovementType::EntryPurchase);
        assert_eq!(
            kit.engine
                .ledger()
                .by_document(&DocumentRef::new("purchase_receipt", "PO-7"))
                .unwrap()
                .len(),
            1
        );
    }
}
