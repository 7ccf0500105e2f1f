//! Stock engine runtime: the movement ledger, its derived projection and
//! cost state, reservations, lots and the two workflow services.
//!
//! Everything here is in-memory and synchronous. Consistency comes from a
//! fixed lock order, taken by every writer in the same sequence:
//!
//! ```text
//! depot gate → stock-key mutex → article cost mutex
//!   → reservation book → projection → movement store
//! ```

pub mod allocation;
pub mod catalog;
pub mod config;
pub mod counts;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod lots;
pub mod projection;
pub mod reservations;
pub mod retry;
pub mod sweeps;
pub mod transfers;
pub mod valuation;
pub mod workflow_store;

mod resolve;
#[cfg(test)]
mod testkit;

pub use allocation::AllocationService;
pub use catalog::{Catalog, InMemoryCatalog};
pub use config::{ConfigError, StockConfig};
pub use counts::InventoryService;
pub use engine::StockEngine;
pub use ledger::{
    AppendOutcome, DocumentMovement, InMemoryMovementStore, MovementFilter, MovementLedger,
    MovementStore, PeriodClose,
};
pub use lots::LotRegistry;
pub use projection::{AvailabilityProjection, AvailabilityRecord, Drift, StockLevel};
pub use reservations::{ReservationManager, ReserveRequest};
pub use sweeps::{SweepHandle, SweepJob, SweepRunner};
pub use transfers::{TransferLineInput, TransferService};
pub use valuation::ValuationEngine;
