//! Transfer workflow service: drives the transfer aggregate and performs its
//! side effects (reservations at request, ledger postings at ship/receive).

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use stockledger_auth::{AuthContext, Authorizer, Permission, require};
use stockledger_core::{
    AggregateRoot, Aggregate, ArticleId, DepotId, DomainError, DomainResult, ExpectedVersion,
    LocationId, LotId, ReservationId, StockKey, TransferId, UserId,
};
use stockledger_events::{AuditRecord, AuditSink, Event};
use stockledger_inventory::transfer::{
    AddTransferLine, CancelTransfer, CreateTransfer, ReceiveLine, RequestTransfer, ShipLine,
    ValidateTransfer,
};
use stockledger_inventory::{
    DocumentRef, MovementRequest, MovementType, Transfer, TransferCommand, TransferEvent,
    TransferStatus,
};

use crate::catalog::Catalog;
use crate::ledger::{MovementLedger, NumberSequence};
use crate::reservations::{ReservationManager, ReserveRequest};
use crate::resolve;
use crate::valuation::ValuationEngine;
use crate::workflow_store::{AggregateStore, evolve};

/// One line to add to a draft transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLineInput {
    pub article: ArticleId,
    pub lot: Option<LotId>,
    pub quantity: Decimal,
    /// Defaults to the source depot's default location.
    pub source_location: Option<LocationId>,
    /// Defaults to the destination depot's default location.
    pub dest_location: Option<LocationId>,
}

impl TransferLineInput {
    pub fn new(article: ArticleId, quantity: Decimal) -> Self {
        Self {
            article,
            lot: None,
            quantity,
            source_location: None,
            dest_location: None,
        }
    }

    pub fn with_lot(mut self, lot: Option<LotId>) -> Self {
        self.lot = lot;
        self
    }
}

pub struct TransferService {
    store: AggregateStore<Transfer>,
    numbers: NumberSequence,
    catalog: Arc<dyn Catalog>,
    ledger: Arc<MovementLedger>,
    reservations: Arc<ReservationManager>,
    valuation: Arc<ValuationEngine>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditSink>,
}

impl TransferService {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        ledger: Arc<MovementLedger>,
        reservations: Arc<ReservationManager>,
        valuation: Arc<ValuationEngine>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store: AggregateStore::new("transfer"),
            numbers: NumberSequence::new(),
            catalog,
            ledger,
            reservations,
            valuation,
            authorizer,
            audit,
        }
    }

    pub fn get(&self, id: TransferId) -> DomainResult<Transfer> {
        self.store.load(&id)
    }

    pub fn list(&self) -> DomainResult<Vec<Transfer>> {
        self.store.all()
    }

    /// Run one workflow step under the transfer's operation lock.
    fn execute<F>(&self, id: TransferId, action: &'static str, actor: UserId, step: F) -> DomainResult<Transfer>
    where
        F: FnOnce(&Transfer) -> DomainResult<Vec<TransferEvent>>,
    {
        let handle = self.store.operation_lock(&id)?;
        let _op = self.store.lock(&handle)?;

        let current = self.store.load(&id)?;
        let events = step(&current)?;
        let next = evolve(&current, &events);
        self.store.save(next.clone(), ExpectedVersion::Exact(current.version()))?;

        for e in &events {
            info!(transfer = %next.number(), event = e.event_type(), status = ?next.status(), "transfer event");
        }
        self.audit.emit(AuditRecord::capture(
            "transfer",
            id,
            action,
            Some(&current),
            Some(&next),
            Some(actor),
        ));
        Ok(next)
    }

    #[instrument(skip(self))]
    pub fn create(&self, source: DepotId, destination: DepotId, requester: UserId) -> DomainResult<Transfer> {
        resolve::depot(self.catalog.as_ref(), source)?;
        resolve::depot(self.catalog.as_ref(), destination)?;

        let id = TransferId::new();
        let now = Utc::now();
        let draft = Transfer::empty(id);
        let events = draft.handle(&TransferCommand::Create(CreateTransfer {
            transfer_id: id,
            number: self.numbers.document_number("TRF", now.date_naive())?,
            source,
            destination,
            requester,
            occurred_at: now,
        }))?;
        let created = evolve(&draft, &events);
        self.store.save(created.clone(), ExpectedVersion::Exact(0))?;

        info!(transfer = %created.number(), %source, %destination, "transfer created");
        self.audit
            .emit(AuditRecord::created("transfer", id, &created, Some(requester)));
        Ok(created)
    }

    #[instrument(skip(self))]
    pub fn add_line(&self, id: TransferId, line: TransferLineInput, actor: UserId) -> DomainResult<Transfer> {
        self.execute(id, "add_line", actor, |t| {
            let (source, destination) = depots(t)?;
            resolve::article(self.catalog.as_ref(), line.article)?;
            let source_location = resolve::location(self.catalog.as_ref(), source, line.source_location)?;
            let dest_location = resolve::location(self.catalog.as_ref(), destination, line.dest_location)?;
            t.handle(&TransferCommand::AddLine(AddTransferLine {
                article: line.article,
                lot: line.lot,
                source_location,
                dest_location,
                quantity: line.quantity,
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Reserve source stock for every line; all lines or none.
    #[instrument(skip(self))]
    pub fn request(&self, id: TransferId, actor: UserId) -> DomainResult<Transfer> {
        self.execute(id, "request", actor, |t| {
            if !t.status().can_transition_to(TransferStatus::Requested) {
                return Err(DomainError::transition("transfer", t.status(), "request"));
            }
            let (source, _) = depots(t)?;

            let mut taken: Vec<(u32, ReservationId)> = Vec::with_capacity(t.lines().len());
            for line in t.lines() {
                let req = ReserveRequest::new(line.article, source, line.qty_requested, t.number())
                    .at_location(line.source_location)
                    .with_lot(line.lot);
                match self.reservations.reserve(req, actor) {
                    Ok(r) => taken.push((line.line_no, r.id)),
                    Err(err) => {
                        self.release_all(&taken, actor);
                        return Err(err);
                    }
                }
            }

            let decided = t.handle(&TransferCommand::Request(RequestTransfer {
                reservations: taken.clone(),
                occurred_at: Utc::now(),
            }));
            if decided.is_err() {
                self.release_all(&taken, actor);
            }
            decided
        })
    }

    fn release_all(&self, taken: &[(u32, ReservationId)], actor: UserId) {
        for (_, reservation) in taken {
            if let Err(err) = self.reservations.release(*reservation, actor) {
                warn!(%reservation, error = %err, "failed to release transfer reservation");
            }
        }
    }

    #[instrument(skip(self))]
    pub fn validate(&self, id: TransferId, approver: UserId) -> DomainResult<Transfer> {
        self.execute(id, "validate", approver, |t| {
            let (source, _) = depots(t)?;
            // Only compared against approval ceilings, so it saturates.
            let mut value = Decimal::ZERO;
            for line in t.lines() {
                let cost = self.valuation.current_unit_cost(line.article)?;
                value = value.saturating_add(line.qty_requested.saturating_mul(cost));
            }
            let site = self.catalog.depot(source)?.and_then(|d| d.site);
            require(
                self.authorizer.as_ref(),
                approver,
                &Permission::TRANSFER_VALIDATE,
                &AuthContext::depot(source).with_site(site).with_amount(value),
            )?;
            t.handle(&TransferCommand::Validate(ValidateTransfer {
                approver,
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Post the transfer exit at the source, consuming the line's reservation.
    /// A reservation that was released or expired in the meantime is skipped
    /// and the exit needs unreserved stock instead.
    #[instrument(skip(self))]
    pub fn ship(&self, id: TransferId, line_no: u32, quantity: Decimal, actor: UserId) -> DomainResult<Transfer> {
        self.execute(id, "ship", actor, |t| {
            let mut events = t.handle(&TransferCommand::Ship(ShipLine {
                line_no,
                quantity,
                occurred_at: Utc::now(),
            }))?;
            let (source, _) = depots(t)?;
            let line = t
                .line(line_no)
                .ok_or_else(|| DomainError::not_found(format!("transfer {} line {line_no}", t.number())))?;

            let req = MovementRequest::new(
                MovementType::ExitTransfer,
                line.article,
                source,
                quantity,
                DocumentRef::new("transfer", t.number()),
                actor,
            )
            .at_location(line.source_location)
            .with_lot(line.lot);
            let outcome = match line.reservation {
                Some(reservation) => match self.ledger.append(req.clone().consuming(reservation)) {
                    // Released or expired elsewhere: ship from available stock.
                    Err(DomainError::InvalidStateTransition { entity: "reservation", .. }) => {
                        warn!(transfer = %t.number(), %reservation, "line reservation no longer held");
                        self.ledger.append(req)?
                    }
                    other => other?,
                },
                None => self.ledger.append(req)?,
            };

            for e in events.iter_mut() {
                e.record_postings(outcome.unit_cost(), &outcome.numbers());
            }
            Ok(events)
        })
    }

    /// Post the transfer entry at the destination at the cost realised by the
    /// exit. A zero receipt posts nothing.
    #[instrument(skip(self))]
    pub fn receive(&self, id: TransferId, line_no: u32, quantity: Decimal, actor: UserId) -> DomainResult<Transfer> {
        self.execute(id, "receive", actor, |t| {
            let mut events = t.handle(&TransferCommand::Receive(ReceiveLine {
                line_no,
                quantity,
                occurred_at: Utc::now(),
            }))?;
            if quantity.is_zero() {
                return Ok(events);
            }

            let (_, destination) = depots(t)?;
            let line = t
                .line(line_no)
                .ok_or_else(|| DomainError::not_found(format!("transfer {} line {line_no}", t.number())))?;
            let req = MovementRequest::new(
                MovementType::EntryTransfer,
                line.article,
                destination,
                quantity,
                DocumentRef::new("transfer", t.number()),
                actor,
            )
            .at_location(line.dest_location)
            .with_lot(line.lot)
            .with_unit_cost(line.unit_cost.unwrap_or(Decimal::ZERO));
            let outcome = self.ledger.append(req)?;

            for e in events.iter_mut() {
                e.record_postings(outcome.unit_cost(), &outcome.numbers());
            }
            if let Some(TransferEvent::TransferCompleted(done)) = events.last() {
                if !done.flagged_lines.is_empty() {
                    warn!(transfer = %t.number(), lines = ?done.flagged_lines, "transfer received with variance");
                }
            }
            Ok(events)
        })
    }

    /// Cancel before shipping and release the held source reservations.
    #[instrument(skip(self, reason))]
    pub fn cancel(&self, id: TransferId, actor: UserId, reason: &str) -> DomainResult<Transfer> {
        self.execute(id, "cancel", actor, |t| {
            let events = t.handle(&TransferCommand::Cancel(CancelTransfer {
                actor,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }))?;
            for e in &events {
                if let TransferEvent::TransferCancelled(c) = e {
                    for reservation in &c.released {
                        self.reservations.release(*reservation, actor)?;
                    }
                }
            }
            Ok(events)
        })
    }

    /// Quantity shipped but not yet received, per line key at the source.
    pub fn in_transit(&self, id: TransferId) -> DomainResult<Vec<(StockKey, Decimal)>> {
        let t = self.get(id)?;
        let (source, _) = depots(&t)?;
        Ok(t.lines()
            .iter()
            .filter(|l| l.shipped && !l.received)
            .map(|l| (StockKey::new(l.article, source, l.source_location, l.lot), l.in_transit_qty()))
            .collect())
    }
}

fn depots(t: &Transfer) -> DomainResult<(DepotId, DepotId)> {
    match (t.source(), t.destination()) {
        (Some(s), Some(d)) => Ok((s, d)),
        _ => Err(DomainError::not_found(format!("transfer {}", t.id_typed()))),
    }
}
