//! Physical inventory service: snapshot and freeze at open, count capture,
//! segregation-of-duties checks at validation and adjustment postings
//! through the ledger.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use stockledger_auth::{AuthContext, Authorizer, Permission, require};
use stockledger_core::{
    AdjustmentId, Aggregate, AggregateRoot, ArticleId, DepotId, DomainError, DomainResult, Entity,
    ExpectedVersion, InventoryId, LocationId, LotId, UserId,
};
use stockledger_events::{AuditRecord, AuditSink, Event};
use stockledger_inventory::count::{
    AddCountLine, ApplyAdjustment, ApproveAdjustment, CancelInventory, CreateInventory,
    OpenInventory, RecordCount, ValidateInventory, WaiveAdjustment,
};
use stockledger_inventory::{
    Adjustment, CountPass, DocumentRef, InventoryCount, InventoryCountCommand, InventoryCountEvent,
    InventoryStatus, InventoryType, MovementRequest, MovementType, SnapshotLine,
};

use crate::catalog::Catalog;
use crate::config::StockConfig;
use crate::ledger::{MovementLedger, NumberSequence};
use crate::locks::DepotGates;
use crate::projection::AvailabilityProjection;
use crate::resolve;
use crate::valuation::ValuationEngine;
use crate::workflow_store::{AggregateStore, evolve};

pub struct InventoryService {
    store: AggregateStore<InventoryCount>,
    numbers: NumberSequence,
    config: StockConfig,
    catalog: Arc<dyn Catalog>,
    ledger: Arc<MovementLedger>,
    projection: Arc<AvailabilityProjection>,
    valuation: Arc<ValuationEngine>,
    gates: Arc<DepotGates>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditSink>,
}

/// Collaborators of the inventory service.
pub struct InventoryParts {
    pub catalog: Arc<dyn Catalog>,
    pub ledger: Arc<MovementLedger>,
    pub projection: Arc<AvailabilityProjection>,
    pub valuation: Arc<ValuationEngine>,
    pub gates: Arc<DepotGates>,
    pub authorizer: Arc<dyn Authorizer>,
    pub audit: Arc<dyn AuditSink>,
}

impl InventoryService {
    pub fn new(config: StockConfig, parts: InventoryParts) -> Self {
        Self {
            store: AggregateStore::new("inventory"),
            numbers: NumberSequence::new(),
            config,
            catalog: parts.catalog,
            ledger: parts.ledger,
            projection: parts.projection,
            valuation: parts.valuation,
            gates: parts.gates,
            authorizer: parts.authorizer,
            audit: parts.audit,
        }
    }

    pub fn get(&self, id: InventoryId) -> DomainResult<InventoryCount> {
        self.store.load(&id)
    }

    pub fn list(&self) -> DomainResult<Vec<InventoryCount>> {
        self.store.all()
    }

    fn execute<F>(&self, id: InventoryId, action: &'static str, actor: UserId, step: F) -> DomainResult<InventoryCount>
    where
        F: FnOnce(&InventoryCount) -> DomainResult<Vec<InventoryCountEvent>>,
    {
        let handle = self.store.operation_lock(&id)?;
        let _op = self.store.lock(&handle)?;

        let current = self.store.load(&id)?;
        let events = step(&current)?;
        let next = evolve(&current, &events);
        self.store.save(next.clone(), ExpectedVersion::Exact(current.version()))?;

        if events.iter().any(InventoryCountEvent::ends_freeze) {
            if let Some(depot) = next.depot() {
                if self.gates.unfreeze(depot, id)? {
                    info!(inventory = %next.number(), %depot, "depot movements unfrozen");
                }
            }
        }

        for e in &events {
            info!(inventory = %next.number(), event = e.event_type(), status = ?next.status(), "inventory event");
        }
        self.audit_adjustments(&current, &next, actor);
        self.audit.emit(AuditRecord::capture(
            "inventory",
            id,
            action,
            Some(&current),
            Some(&next),
            Some(actor),
        ));
        Ok(next)
    }

    fn audit_adjustments(&self, before: &InventoryCount, after: &InventoryCount, actor: UserId) {
        for adj in after.adjustments() {
            match before.adjustment(adj.id) {
                None => self.audit.emit(AuditRecord::created(
                    Adjustment::entity_name(),
                    adj.id,
                    adj,
                    Some(actor),
                )),
                Some(prev) if prev != adj => self.audit.emit(AuditRecord::capture(
                    Adjustment::entity_name(),
                    adj.id,
                    adjustment_action(prev, adj),
                    Some(prev),
                    Some(adj),
                    Some(actor),
                )),
                Some(_) => {}
            }
        }
    }

    #[instrument(skip(self))]
    pub fn create(
        &self,
        depot: DepotId,
        inventory_type: InventoryType,
        freeze_movements: bool,
        requester: UserId,
    ) -> DomainResult<InventoryCount> {
        resolve::depot(self.catalog.as_ref(), depot)?;

        let id = InventoryId::new();
        let now = Utc::now();
        let draft = InventoryCount::empty(id);
        let events = draft.handle(&InventoryCountCommand::Create(CreateInventory {
            inventory_id: id,
            number: self.numbers.document_number("INV", now.date_naive())?,
            depot,
            inventory_type,
            freeze_movements,
            requester,
            occurred_at: now,
        }))?;
        let created = evolve(&draft, &events);
        self.store.save(created.clone(), ExpectedVersion::Exact(0))?;

        info!(inventory = %created.number(), %depot, freeze_movements, "inventory created");
        self.audit
            .emit(AuditRecord::created("inventory", id, &created, Some(requester)));
        Ok(created)
    }

    /// Snapshot theoretical quantities and, if requested, freeze the depot.
    ///
    /// Both happen under the depot gate's write side, so no movement can
    /// land between the snapshot and the freeze.
    #[instrument(skip(self))]
    pub fn open(&self, id: InventoryId, actor: UserId) -> DomainResult<InventoryCount> {
        let result = self.execute(id, "open", actor, |inv| {
            if !inv.status().can_transition_to(InventoryStatus::Open) {
                return Err(DomainError::transition("inventory", inv.status(), "open"));
            }
            let depot = depot_of(inv)?;

            let gate = self.gates.gate(depot)?;
            let mut freeze = DepotGates::write(&gate)?;
            if inv.freeze_requested() && freeze.frozen_by.is_some_and(|other| other != id) {
                return Err(DomainError::validation(format!(
                    "depot {depot} is already frozen by another inventory"
                )));
            }

            let mut snapshot = Vec::new();
            for record in self.projection.list_depot(depot)? {
                if record.physical_qty.is_zero() || !inv.inventory_type().covers(record.key.article) {
                    continue;
                }
                snapshot.push(SnapshotLine {
                    article: record.key.article,
                    location: record.key.location,
                    lot: record.key.lot,
                    theoretical_qty: record.physical_qty,
                    unit_cost: self.valuation.current_unit_cost(record.key.article)?,
                });
            }

            let events = inv.handle(&InventoryCountCommand::Open(OpenInventory {
                snapshot,
                occurred_at: Utc::now(),
            }))?;
            if inv.freeze_requested() {
                freeze.frozen_by = Some(id);
                warn!(inventory = %inv.number(), %depot, "depot movements frozen");
            }
            Ok(events)
        });

        if result.is_err() {
            if let Some(depot) = self.store.find(&id)?.and_then(|inv| inv.depot()) {
                self.gates.unfreeze(depot, id)?;
            }
        }
        result
    }

    /// Add a line for stock found during counting that the snapshot missed.
    #[instrument(skip(self))]
    pub fn add_line(
        &self,
        id: InventoryId,
        article: ArticleId,
        location: Option<LocationId>,
        lot: Option<LotId>,
        actor: UserId,
    ) -> DomainResult<InventoryCount> {
        self.execute(id, "add_line", actor, |inv| {
            let depot = depot_of(inv)?;
            resolve::article(self.catalog.as_ref(), article)?;
            let location = resolve::location(self.catalog.as_ref(), depot, location)?;
            inv.handle(&InventoryCountCommand::AddLine(AddCountLine {
                article,
                location,
                lot,
                unit_cost: self.valuation.current_unit_cost(article)?,
                occurred_at: Utc::now(),
            }))
        })
    }

    #[instrument(skip(self))]
    pub fn record_count(
        &self,
        id: InventoryId,
        line_no: u32,
        counter: UserId,
        pass: CountPass,
        quantity: Decimal,
    ) -> DomainResult<InventoryCount> {
        self.execute(id, "record_count", counter, |inv| {
            let article = inv
                .line(line_no)
                .map(|l| l.article)
                .ok_or_else(|| DomainError::not_found(format!("inventory {} line {line_no}", inv.number())))?;
            inv.handle(&InventoryCountCommand::RecordCount(RecordCount {
                line_no,
                counter,
                pass,
                quantity,
                unit_cost: self.valuation.current_unit_cost(article)?,
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Raise one adjustment per non-zero variance. Closes the inventory at
    /// once when every line matched its snapshot.
    #[instrument(skip(self))]
    pub fn validate(&self, id: InventoryId, approver: UserId) -> DomainResult<InventoryCount> {
        self.execute(id, "validate", approver, |inv| {
            let depot = depot_of(inv)?;
            self.authorize(approver, &Permission::INVENTORY_VALIDATE, depot, inv.absolute_variance_value())?;
            inv.handle(&InventoryCountCommand::Validate(ValidateInventory {
                approver,
                approval_threshold: self.config.adjustment_approval_threshold,
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Senior approval of an adjustment above the threshold.
    #[instrument(skip(self))]
    pub fn approve_adjustment(
        &self,
        id: InventoryId,
        adjustment: AdjustmentId,
        approver: UserId,
    ) -> DomainResult<InventoryCount> {
        self.execute(id, "approve_adjustment", approver, |inv| {
            let adj = adjustment_of(inv, adjustment)?;
            self.authorize(approver, &Permission::ADJUSTMENT_APPROVE_SENIOR, adj.key.depot, adj.value.abs())?;
            inv.handle(&InventoryCountCommand::ApproveAdjustment(ApproveAdjustment {
                adjustment_id: adjustment,
                approver,
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Post the adjustment movement for `|variance|` through the ledger.
    #[instrument(skip(self))]
    pub fn apply_adjustment(
        &self,
        id: InventoryId,
        adjustment: AdjustmentId,
        actor: UserId,
    ) -> DomainResult<InventoryCount> {
        self.execute(id, "apply_adjustment", actor, |inv| {
            let mut events = inv.handle(&InventoryCountCommand::ApplyAdjustment(ApplyAdjustment {
                adjustment_id: adjustment,
                actor,
                occurred_at: Utc::now(),
            }))?;
            let adj = adjustment_of(inv, adjustment)?;

            let movement_type = if adj.variance > Decimal::ZERO {
                MovementType::EntryAdjustment
            } else {
                MovementType::ExitAdjustment
            };
            let mut req = MovementRequest::new(
                movement_type,
                adj.key.article,
                adj.key.depot,
                adj.variance.abs(),
                DocumentRef::new("inventory", inv.number()),
                actor,
            )
            .at_location(adj.key.location)
            .with_lot(adj.key.lot)
            .for_inventory(id);
            if movement_type.is_entry() {
                req = req.with_unit_cost(adj.unit_cost);
            }
            let outcome = self.ledger.append(req)?;

            let first = outcome.numbers().into_iter().next();
            for e in events.iter_mut() {
                e.record_posting(first.clone());
            }
            Ok(events)
        })
    }

    /// Apply every adjustment that is pending and already approved.
    pub fn apply_ready(&self, id: InventoryId, actor: UserId) -> DomainResult<InventoryCount> {
        let ready: Vec<AdjustmentId> = self
            .get(id)?
            .adjustments()
            .iter()
            .filter(|a| a.is_ready())
            .map(|a| a.id)
            .collect();
        let mut current = self.get(id)?;
        for adj in ready {
            current = self.apply_adjustment(id, adj, actor)?;
        }
        Ok(current)
    }

    /// Resolve an adjustment without posting a movement.
    #[instrument(skip(self, reason))]
    pub fn waive_adjustment(
        &self,
        id: InventoryId,
        adjustment: AdjustmentId,
        actor: UserId,
        reason: &str,
    ) -> DomainResult<InventoryCount> {
        self.execute(id, "waive_adjustment", actor, |inv| {
            let adj = adjustment_of(inv, adjustment)?;
            self.authorize(actor, &Permission::INVENTORY_VALIDATE, adj.key.depot, adj.value.abs())?;
            inv.handle(&InventoryCountCommand::WaiveAdjustment(WaiveAdjustment {
                adjustment_id: adjustment,
                actor,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }))
        })
    }

    /// Cancel before closing: pending adjustments are discarded and the depot unfrozen.
    #[instrument(skip(self, reason))]
    pub fn cancel(&self, id: InventoryId, actor: UserId, reason: &str) -> DomainResult<InventoryCount> {
        self.execute(id, "cancel", actor, |inv| {
            inv.handle(&InventoryCountCommand::Cancel(CancelInventory {
                actor,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }))
        })
    }

    fn authorize(&self, actor: UserId, permission: &Permission, depot: DepotId, amount: Decimal) -> DomainResult<()> {
        let site = self.catalog.depot(depot)?.and_then(|d| d.site);
        require(
            self.authorizer.as_ref(),
            actor,
            permission,
            &AuthContext::depot(depot).with_site(site).with_amount(amount),
        )?;
        Ok(())
    }
}

fn depot_of(inv: &InventoryCount) -> DomainResult<DepotId> {
    inv.depot()
        .ok_or_else(|| DomainError::not_found(format!("inventory {}", inv.id_typed())))
}

fn adjustment_of(inv: &InventoryCount, id: AdjustmentId) -> DomainResult<Adjustment> {
    inv.adjustment(id)
        .cloned()
        .ok_or_else(|| DomainError::not_found(format!("adjustment {id}")))
}

fn adjustment_action(before: &Adjustment, after: &Adjustment) -> &'static str {
    use stockledger_inventory::AdjustmentStatus::*;
    match (before.status, after.status) {
        (_, Applied) => "apply",
        (_, Waived) => "waive",
        (_, Discarded) => "discard",
        (Pending, Pending) if before.approver.is_none() && after.approver.is_some() => "approve",
        _ => "update",
    }
}
