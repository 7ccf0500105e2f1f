//! Reservation records and their status rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, ReservationId, StockKey};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Consumed,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        self != ReservationStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub key: StockKey,
    pub quantity: Decimal,
    /// Demand document (sales order line, transfer line...).
    pub demand_ref: String,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ReservationStatus,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &ReservationId {
        &self.id
    }

    fn entity_name() -> &'static str {
        "reservation"
    }
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        key: StockKey,
        quantity: Decimal,
        demand_ref: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "reservation quantity must be positive (got {quantity})"
            )));
        }
        if expires_at.is_some_and(|e| e <= now) {
            return Err(DomainError::validation("reservation expiration must be in the future"));
        }
        Ok(Self {
            id,
            key,
            quantity,
            demand_ref: demand_ref.into(),
            reserved_at: now,
            expires_at,
            status: ReservationStatus::Active,
            closed_at: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|e| e <= now)
    }

    /// ACTIVE → CANCELLED. Returns `false` (no-op) on an already-terminal reservation.
    pub fn release(&mut self, now: DateTime<Utc>) -> bool {
        self.close(ReservationStatus::Cancelled, now)
    }

    /// ACTIVE → EXPIRED when past its expiration date.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        self.is_due(now) && self.close(ReservationStatus::Expired, now)
    }

    /// ACTIVE → CONSUMED. Repeating on a consumed reservation is a no-op;
    /// consuming a cancelled or expired one is an error.
    pub fn consume(&mut self, now: DateTime<Utc>) -> DomainResult<bool> {
        match self.status {
            ReservationStatus::Active => Ok(self.close(ReservationStatus::Consumed, now)),
            ReservationStatus::Consumed => Ok(false),
            other => Err(DomainError::transition(Self::entity_name(), other, "consume")),
        }
    }

    fn close(&mut self, status: ReservationStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.closed_at = Some(now);
        true
    }
}
