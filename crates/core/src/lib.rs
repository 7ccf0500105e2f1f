//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the stock key, decimal precision rules and the error taxonomy
//! shared by every stock component.

pub mod aggregate;
pub mod amount;
pub mod entity;
pub mod error;
pub mod id;
pub mod key;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use amount::{checked_sum, checked_value, display, internal};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AdjustmentId, ArticleId, DepotId, InventoryId, LocationId, LotId, MovementId, ReservationId,
    SiteId, TransferId, UserId,
};
pub use key::StockKey;
pub use value_object::ValueObject;
