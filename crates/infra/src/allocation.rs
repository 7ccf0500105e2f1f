//! Allocation service: gathers FIFO/FEFO candidates from the projection, the
//! lot registry and the ledger, then runs the pure allocation policy.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use stockledger_core::{ArticleId, DepotId, DomainResult, StockKey, UserId};
use stockledger_inventory::{AllocationPlan, AllocationPolicy, Candidate, Reservation, allocate};

use crate::ledger::MovementLedger;
use crate::lots::LotRegistry;
use crate::projection::AvailabilityProjection;
use crate::reservations::{ReservationManager, ReserveRequest};

pub struct AllocationService {
    projection: Arc<AvailabilityProjection>,
    lots: Arc<LotRegistry>,
    ledger: Arc<MovementLedger>,
    reservations: Arc<ReservationManager>,
}

impl AllocationService {
    pub fn new(
        projection: Arc<AvailabilityProjection>,
        lots: Arc<LotRegistry>,
        ledger: Arc<MovementLedger>,
        reservations: Arc<ReservationManager>,
    ) -> Self {
        Self {
            projection,
            lots,
            ledger,
            reservations,
        }
    }

    /// Consumable batches of `article` at `depot`, restricted to available lots.
    pub fn candidates(&self, article: ArticleId, depot: DepotId, today: NaiveDate) -> DomainResult<Vec<Candidate<StockKey>>> {
        let mut out = Vec::new();
        for record in self.projection.records_for(article, Some(depot))? {
            if record.available_qty <= Decimal::ZERO {
                continue;
            }
            let lot = match record.key.lot {
                Some(id) => match self.lots.get(id)? {
                    Some(lot) if lot.available(today) => Some(lot),
                    _ => continue,
                },
                None => None,
            };

            let first_entry = self.ledger.entries_at(record.key)?.into_iter().next();
            let received_on = lot
                .as_ref()
                .and_then(|l| l.manufacture_date)
                .or(first_entry.as_ref().map(|m| m.movement_date));

            out.push(Candidate {
                batch: record.key,
                received_on,
                expires_on: lot.as_ref().and_then(|l| l.expiry_date()),
                seq: first_entry.map(|m| m.seq).unwrap_or(u64::MAX),
                available: record.available_qty,
            });
        }
        Ok(out)
    }

    /// Compute a plan without committing anything.
    #[instrument(skip(self))]
    pub fn plan(
        &self,
        article: ArticleId,
        depot: DepotId,
        demand: Decimal,
        policy: AllocationPolicy,
        today: NaiveDate,
    ) -> DomainResult<AllocationPlan<StockKey>> {
        let candidates = self.candidates(article, depot, today)?;
        let plan = allocate(policy, candidates, demand, format!("article={article} depot={depot}"))?;
        debug!(slices = plan.slices.len(), "allocation planned");
        Ok(plan)
    }

    /// Plan and reserve every slice. If any reservation fails, the ones
    /// already taken are released and the error is returned.
    #[instrument(skip(self, demand_ref))]
    pub fn reserve_plan(
        &self,
        article: ArticleId,
        depot: DepotId,
        demand: Decimal,
        policy: AllocationPolicy,
        demand_ref: &str,
        actor: UserId,
        today: NaiveDate,
    ) -> DomainResult<Vec<Reservation>> {
        let plan = self.plan(article, depot, demand, policy, today)?;
        let mut taken: Vec<Reservation> = Vec::with_capacity(plan.slices.len());
        for slice in plan.slices {
            let req = ReserveRequest::new(article, depot, slice.quantity, demand_ref)
                .at_location(slice.batch.location)
                .with_lot(slice.batch.lot);
            match self.reservations.reserve(req, actor) {
                Ok(r) => taken.push(r),
                Err(err) => {
                    warn!(error = %err, "allocation lost a race; rolling back reservations");
                    for r in &taken {
                        self.reservations.release(r.id, actor)?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(taken)
    }
}
