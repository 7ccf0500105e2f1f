//! Movement records: the immutable facts of the stock ledger.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ArticleId, DepotId, DomainError, DomainResult, InventoryId, LocationId, LotId, MovementId,
    ReservationId, StockKey, UserId,
};

/// Kind of stock movement. The prefix of the movement number derives from it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    EntryPurchase,
    EntryCustomerReturn,
    EntryTransfer,
    EntryAdjustment,
    EntryOpening,
    ExitSale,
    ExitSupplierReturn,
    ExitTransfer,
    ExitAdjustment,
    ExitScrap,
}

impl MovementType {
    pub fn prefix(self) -> &'static str {
        match self {
            MovementType::EntryPurchase => "REC",
            MovementType::EntryCustomerReturn => "RCR",
            MovementType::EntryTransfer => "TRI",
            MovementType::EntryAdjustment => "ADI",
            MovementType::EntryOpening => "OPN",
            MovementType::ExitSale => "SHP",
            MovementType::ExitSupplierReturn => "RSR",
            MovementType::ExitTransfer => "TRO",
            MovementType::ExitAdjustment => "ADO",
            MovementType::ExitScrap => "SCR",
        }
    }

    pub fn is_entry(self) -> bool {
        matches!(
            self,
            MovementType::EntryPurchase
                | MovementType::EntryCustomerReturn
                | MovementType::EntryTransfer
                | MovementType::EntryAdjustment
                | MovementType::EntryOpening
        )
    }

    pub fn is_exit(self) -> bool {
        !self.is_entry()
    }

    /// Whether the movement may only touch lots that are currently available.
    ///
    /// Adjustments, scrapping and opening balances are allowed on blocked or
    /// expired lots (they are how such stock gets written off or recorded).
    /// So is the receipt of a transfer: its stock already left the source
    /// and has nowhere else to land.
    pub fn requires_available_lot(self) -> bool {
        !matches!(
            self,
            MovementType::EntryAdjustment
                | MovementType::EntryOpening
                | MovementType::EntryTransfer
                | MovementType::ExitAdjustment
                | MovementType::ExitScrap
        )
    }

    /// `+quantity` for entries, `-quantity` for exits.
    pub fn signed(self, quantity: Decimal) -> Decimal {
        if self.is_entry() { quantity } else { -quantity }
    }

    /// Map an inbound document type from the purchasing/sales flows.
    pub fn from_document_type(document_type: &str) -> DomainResult<Self> {
        match document_type {
            "purchase_receipt" => Ok(MovementType::EntryPurchase),
            "customer_return" => Ok(MovementType::EntryCustomerReturn),
            "opening" => Ok(MovementType::EntryOpening),
            "delivery_note" => Ok(MovementType::ExitSale),
            "supplier_return" => Ok(MovementType::ExitSupplierReturn),
            "scrap" => Ok(MovementType::ExitScrap),
            other => Err(DomainError::validation(format!(
                "unsupported document type '{other}'"
            ))),
        }
    }
}

/// Persisted movement identifier: `PREFIX-YYYYMM-NNNNN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementNumber(String);

impl MovementNumber {
    pub fn format(prefix: &str, period: NaiveDate, counter: u32) -> Self {
        Self::from_parts(prefix, period.year(), period.month(), counter)
    }

    pub fn from_parts(prefix: &str, year: i32, month: u32, counter: u32) -> Self {
        Self(format!("{prefix}-{year:04}{month:02}-{counter:05}"))
    }

    /// `(prefix, year, month, counter)`, or `None` if the number is malformed.
    pub fn parts(&self) -> Option<(&str, i32, u32, u32)> {
        let mut it = self.0.rsplitn(3, '-');
        let counter = it.next()?.parse().ok()?;
        let period = it.next()?;
        let prefix = it.next()?;
        if period.len() != 6 || !period.is_ascii() {
            return None;
        }
        let year = period[..4].parse().ok()?;
        let month = period[4..].parse().ok()?;
        Some((prefix, year, month, counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or_default()
    }
}

impl core::fmt::Display for MovementNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the external document that caused a movement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_type: String,
    pub document_id: String,
}

impl DocumentRef {
    pub fn new(document_type: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            document_type: document_type.into(),
            document_id: document_id.into(),
        }
    }
}

impl core::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.document_type, self.document_id)
    }
}

/// Inbound movement request (input of `Ledger::append`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub movement_type: MovementType,
    pub article: ArticleId,
    pub depot: DepotId,
    /// Defaults to the depot's default location.
    pub location: Option<LocationId>,
    pub lot: Option<LotId>,
    pub quantity: Decimal,
    /// Entries only; exits are valued by the costing engine.
    pub unit_cost: Option<Decimal>,
    pub source: DocumentRef,
    pub movement_date: NaiveDate,
    pub actor: UserId,
    /// Reservation consumed by this exit, in the same key transaction.
    pub consumes: Option<ReservationId>,
    /// Physical inventory allowed to post through its own depot freeze.
    pub inventory: Option<InventoryId>,
}

impl MovementRequest {
    /// Request dated today with no location, lot, cost or reservation.
    pub fn new(
        movement_type: MovementType,
        article: ArticleId,
        depot: DepotId,
        quantity: Decimal,
        source: DocumentRef,
        actor: UserId,
    ) -> Self {
        Self {
            movement_type,
            article,
            depot,
            location: None,
            lot: None,
            quantity,
            unit_cost: None,
            source,
            movement_date: Utc::now().date_naive(),
            actor,
            consumes: None,
            inventory: None,
        }
    }

    pub fn at_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_lot(mut self, lot: Option<LotId>) -> Self {
        self.lot = lot;
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn dated(mut self, movement_date: NaiveDate) -> Self {
        self.movement_date = movement_date;
        self
    }

    pub fn consuming(mut self, reservation: ReservationId) -> Self {
        self.consumes = Some(reservation);
        self
    }

    pub fn for_inventory(mut self, inventory: InventoryId) -> Self {
        self.inventory = Some(inventory);
        self
    }
}

/// Immutable ledger record. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Ledger insertion order (global, ascending).
    pub seq: u64,
    pub number: MovementNumber,
    pub key: StockKey,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    pub source: DocumentRef,
    pub movement_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub actor: UserId,
    pub reservation: Option<ReservationId>,
}

impl Movement {
    pub fn signed_quantity(&self) -> Decimal {
        self.movement_type.signed(self.quantity)
    }

    pub fn signed_value(&self) -> Decimal {
        self.movement_type.signed(self.total_value)
    }

    pub fn is_entry(&self) -> bool {
        self.movement_type.is_entry()
    }
}
