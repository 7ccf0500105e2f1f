//! Wiring of the stock engine: one shared ledger, projection, cost engine,
//! lot registry and reservation book behind the workflow services.

use std::sync::Arc;

use tracing::info;

use stockledger_auth::Authorizer;
use stockledger_core::{DomainResult, StockKey};
use stockledger_events::AuditSink;

use crate::allocation::AllocationService;
use crate::catalog::Catalog;
use crate::config::StockConfig;
use crate::counts::{InventoryParts, InventoryService};
use crate::ledger::{InMemoryMovementStore, LedgerParts, MovementLedger, MovementStore};
use crate::locks::{DepotGates, LockTable};
use crate::lots::LotRegistry;
use crate::projection::AvailabilityProjection;
use crate::reservations::ReservationManager;
use crate::retry::retry_on_conflict;
use crate::sweeps::{LotExpirySweep, ReservationExpirySweep, SweepHandle, SweepRunner};
use crate::transfers::TransferService;
use crate::valuation::ValuationEngine;

pub struct StockEngine {
    config: StockConfig,
    catalog: Arc<dyn Catalog>,
    projection: Arc<AvailabilityProjection>,
    valuation: Arc<ValuationEngine>,
    lots: Arc<LotRegistry>,
    reservations: Arc<ReservationManager>,
    ledger: Arc<MovementLedger>,
    allocation: AllocationService,
    transfers: TransferService,
    inventories: InventoryService,
}

impl StockEngine {
    /// Engine over an empty in-memory movement store.
    pub fn new(
        config: StockConfig,
        catalog: Arc<dyn Catalog>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditSink>,
    ) -> DomainResult<Self> {
        Self::with_store(config, Arc::new(InMemoryMovementStore::new()), catalog, authorizer, audit)
    }

    /// Engine over an existing store. The projection and cost layers are
    /// rebuilt by replaying it.
    pub fn with_store(
        config: StockConfig,
        store: Arc<dyn MovementStore>,
        catalog: Arc<dyn Catalog>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditSink>,
    ) -> DomainResult<Self> {
        let projection = Arc::new(AvailabilityProjection::new());
        let valuation = Arc::new(ValuationEngine::new());
        let lots = Arc::new(LotRegistry::new(audit.clone()));
        let keys = Arc::new(LockTable::<StockKey>::new("stock key"));
        let gates = Arc::new(DepotGates::new());
        let reservations = Arc::new(ReservationManager::new(
            catalog.clone(),
            projection.clone(),
            lots.clone(),
            keys.clone(),
            audit.clone(),
        ));
        let ledger = Arc::new(MovementLedger::new(LedgerParts {
            store,
            catalog: catalog.clone(),
            projection: projection.clone(),
            valuation: valuation.clone(),
            reservations: reservations.clone(),
            lots: lots.clone(),
            keys,
            gates: gates.clone(),
            audit: audit.clone(),
        })?);
        ledger.replay()?;

        let allocation = AllocationService::new(
            projection.clone(),
            lots.clone(),
            ledger.clone(),
            reservations.clone(),
        );
        let transfers = TransferService::new(
            catalog.clone(),
            ledger.clone(),
            reservations.clone(),
            valuation.clone(),
            authorizer.clone(),
            audit.clone(),
        );
        let inventories = InventoryService::new(
            config.clone(),
            InventoryParts {
                catalog: catalog.clone(),
                ledger: ledger.clone(),
                projection: projection.clone(),
                valuation: valuation.clone(),
                gates,
                authorizer,
                audit,
            },
        );

        info!(
            approval_threshold = %config.adjustment_approval_threshold,
            max_conflict_retries = config.max_conflict_retries,
            "stock engine ready"
        );
        Ok(Self {
            config,
            catalog,
            projection,
            valuation,
            lots,
            reservations,
            ledger,
            allocation,
            transfers,
            inventories,
        })
    }

    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn ledger(&self) -> &MovementLedger {
        &self.ledger
    }

    pub fn projection(&self) -> &AvailabilityProjection {
        &self.projection
    }

    pub fn valuation(&self) -> &ValuationEngine {
        &self.valuation
    }

    pub fn lots(&self) -> &LotRegistry {
        &self.lots
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    pub fn allocation(&self) -> &AllocationService {
        &self.allocation
    }

    pub fn transfers(&self) -> &TransferService {
        &self.transfers
    }

    pub fn inventories(&self) -> &InventoryService {
        &self.inventories
    }

    /// Run a workflow step, retrying stale-version conflicts up to the
    /// configured bound.
    pub fn retrying<T, F>(&self, op: F) -> DomainResult<T>
    where
        F: FnMut(&Self) -> DomainResult<T>,
    {
        let mut op = op;
        retry_on_conflict(self.config.max_conflict_retries, || op(self))
    }

    /// Start the lot-expiry and reservation-expiry sweeps. Dropping the
    /// returned handles stops them.
    pub fn start_sweeps(&self) -> DomainResult<Vec<SweepHandle>> {
        let lots = SweepRunner::every(self.config.lot_sweep_interval)
            .spawn("lot-expiry", Arc::new(LotExpirySweep(self.lots.clone())))?;
        let reservations = SweepRunner::every(self.config.reservation_sweep_interval).spawn(
            "reservation-expiry",
            Arc::new(ReservationExpirySweep(self.reservations.clone())),
        )?;
        Ok(vec![lots, reservations])
    }
}
