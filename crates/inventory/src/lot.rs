//! Lot identity, expiry and blocking.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ArticleId, DomainError, DomainResult, Entity, LotId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    Active,
    Blocked,
    Expired,
    NonConforming,
}

/// Input of [`Lot::register`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLot {
    pub number: String,
    pub article: ArticleId,
    pub supplier: Option<String>,
    pub manufacture_date: Option<NaiveDate>,
    /// Optimal-use date (DLUO).
    pub best_before: Option<NaiveDate>,
    /// Consumption limit date (DLC).
    pub use_by: Option<NaiveDate>,
}

impl NewLot {
    pub fn new(number: impl Into<String>, article: ArticleId) -> Self {
        Self {
            number: number.into(),
            article,
            supplier: None,
            manufacture_date: None,
            best_before: None,
            use_by: None,
        }
    }

    pub fn manufactured(mut self, date: NaiveDate) -> Self {
        self.manufacture_date = Some(date);
        self
    }

    pub fn use_by(mut self, date: NaiveDate) -> Self {
        self.use_by = Some(date);
        self
    }

    pub fn best_before(mut self, date: NaiveDate) -> Self {
        self.best_before = Some(date);
        self
    }

    pub fn from_supplier(mut self, supplier: impl Into<String>) -> Self {
        self.supplier = Some(supplier.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub number: String,
    pub article: ArticleId,
    pub supplier: Option<String>,
    pub manufacture_date: Option<NaiveDate>,
    pub best_before: Option<NaiveDate>,
    pub use_by: Option<NaiveDate>,
    pub status: LotStatus,
    pub block_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Lot {
    type Id = LotId;

    fn id(&self) -> &LotId {
        &self.id
    }

    fn entity_name() -> &'static str {
        "lot"
    }
}

impl Lot {
    /// Factory: validates the input and applies defaults (ACTIVE, no reason).
    pub fn register(input: NewLot, now: DateTime<Utc>) -> DomainResult<Self> {
        if input.number.trim().is_empty() {
            return Err(DomainError::validation("lot number cannot be empty"));
        }
        if let Some(made) = input.manufacture_date {
            for (label, date) in [("use-by", input.use_by), ("best-before", input.best_before)] {
                if let Some(d) = date {
                    if d < made {
                        return Err(DomainError::validation(format!(
                            "lot {}: {label} date {d} precedes manufacture date {made}",
                            input.number
                        )));
                    }
                }
            }
        }

        Ok(Self {
            id: LotId::new(),
            number: input.number.trim().to_string(),
            article: input.article,
            supplier: input.supplier,
            manufacture_date: input.manufacture_date,
            best_before: input.best_before,
            use_by: input.use_by,
            status: LotStatus::Active,
            block_reason: None,
            created_at: now,
        })
    }

    /// `today > DLC or today > DLUO`.
    pub fn expired(&self, today: NaiveDate) -> bool {
        self.use_by.is_some_and(|d| today > d) || self.best_before.is_some_and(|d| today > d)
    }

    /// `ACTIVE ∧ ¬expired()`; gates lot eligibility everywhere.
    pub fn available(&self, today: NaiveDate) -> bool {
        self.status == LotStatus::Active && !self.expired(today)
    }

    /// Earliest of the two expiry dates, used for FEFO ordering.
    pub fn expiry_date(&self) -> Option<NaiveDate> {
        match (self.use_by, self.best_before) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn block(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("block reason is required"));
        }
        if self.status != LotStatus::Active {
            return Err(DomainError::transition(Self::entity_name(), self.status, "block"));
        }
        self.status = LotStatus::Blocked;
        self.block_reason = Some(reason);
        Ok(())
    }

    pub fn unblock(&mut self) -> DomainResult<()> {
        if self.status != LotStatus::Blocked {
            return Err(DomainError::transition(Self::entity_name(), self.status, "unblock"));
        }
        self.status = LotStatus::Active;
        self.block_reason = None;
        Ok(())
    }

    pub fn mark_non_conforming(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("non-conformity reason is required"));
        }
        match self.status {
            LotStatus::Active | LotStatus::Blocked => {
                self.status = LotStatus::NonConforming;
                self.block_reason = Some(reason);
                Ok(())
            }
            other => Err(DomainError::transition(Self::entity_name(), other, "mark non-conforming")),
        }
    }

    /// Sweep transition: ACTIVE lots past an expiry date become EXPIRED.
    ///
    /// Returns `false` (no-op) for lots that are not active or not expired.
    pub fn expire(&mut self, today: NaiveDate, now: DateTime<Utc>) -> bool {
        if self.status != LotStatus::Active || !self.expired(today) {
            return false;
        }
        let date = self.expiry_date().map(|d| d.to_string()).unwrap_or_default();
        self.status = LotStatus::Expired;
        self.block_reason = Some(format!("expired {date}, swept at {}", now.to_rfc3339()));
        true
    }
}
