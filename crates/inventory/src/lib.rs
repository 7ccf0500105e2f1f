//! Stock domain module.
//!
//! This crate contains the business rules of the stock consistency engine,
//! implemented purely as deterministic domain logic (no IO, no locking, no
//! storage): movement and lot records, the FIFO/FEFO allocation policy, the
//! costing rules, reservation status rules and the two workflow aggregates.

pub mod allocation;
pub mod catalog;
pub mod count;
pub mod lot;
pub mod movement;
pub mod reservation;
pub mod transfer;
pub mod valuation;

pub use allocation::{AllocationPlan, AllocationPolicy, AllocationSlice, Candidate, allocate};
pub use catalog::{Article, CostingMethod, Depot, Location};
pub use count::{
    Adjustment, AdjustmentStatus, ApprovalLevel, CountPass, InventoryCount, InventoryCountCommand,
    InventoryCountEvent, InventoryLine, InventoryStatus, InventoryType, SnapshotLine,
};
pub use lot::{Lot, LotStatus, NewLot};
pub use movement::{DocumentRef, Movement, MovementNumber, MovementRequest, MovementType};
pub use reservation::{Reservation, ReservationStatus};
pub use transfer::{Transfer, TransferCommand, TransferEvent, TransferLine, TransferStatus};
pub use valuation::{ArticleCost, CostLayer, ValuedSlice};
