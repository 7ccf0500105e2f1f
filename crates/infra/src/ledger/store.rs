//! Movement persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::NaiveDate;

use stockledger_core::{ArticleId, DepotId, DomainError, DomainResult, LotId, StockKey};
use stockledger_inventory::{DocumentRef, Movement};

use crate::locks::poisoned;

/// Query filter over the ledger. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub article: Option<ArticleId>,
    pub depot: Option<DepotId>,
    pub lot: Option<LotId>,
    pub key: Option<StockKey>,
    /// Inclusive movement-date range.
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub source: Option<DocumentRef>,
    pub entries_only: bool,
}

impl MovementFilter {
    pub fn article(article: ArticleId) -> Self {
        Self {
            article: Some(article),
            ..Self::default()
        }
    }

    pub fn depot(depot: DepotId) -> Self {
        Self {
            depot: Some(depot),
            ..Self::default()
        }
    }

    pub fn lot(lot: LotId) -> Self {
        Self {
            lot: Some(lot),
            ..Self::default()
        }
    }

    pub fn key(key: StockKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    pub fn source(source: DocumentRef) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn entries(mut self) -> Self {
        self.entries_only = true;
        self
    }

    pub fn matches(&self, m: &Movement) -> bool {
        self.article.is_none_or(|a| m.key.article == a)
            && self.depot.is_none_or(|d| m.key.depot == d)
            && self.lot.is_none_or(|l| m.key.lot == Some(l))
            && self.key.is_none_or(|k| m.key == k)
            && self.from.is_none_or(|f| m.movement_date >= f)
            && self.to.is_none_or(|t| m.movement_date <= t)
            && self.source.as_ref().is_none_or(|s| &m.source == s)
            && (!self.entries_only || m.is_entry())
    }
}

/// Append-only movement storage.
///
/// `insert` is all-or-nothing: either every movement of the batch is stored
/// or none is.
pub trait MovementStore: Send + Sync + 'static {
    fn insert(&self, batch: &[Movement]) -> DomainResult<()>;

    /// Matching movements in ledger order (ascending `seq`).
    fn query(&self, filter: &MovementFilter) -> DomainResult<Vec<Movement>>;

    fn all(&self) -> DomainResult<Vec<Movement>> {
        self.query(&MovementFilter::default())
    }
}

/// In-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMovementStore {
    movements: RwLock<BTreeMap<u64, Movement>>,
}

impl InMemoryMovementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.movements.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MovementStore for InMemoryMovementStore {
    fn insert(&self, batch: &[Movement]) -> DomainResult<()> {
        let mut movements = self.movements.write().map_err(|_| poisoned("movement store"))?;
        if let Some(dup) = batch.iter().find(|m| movements.contains_key(&m.seq)) {
            return Err(DomainError::persistence(format!(
                "movement seq {} already stored",
                dup.seq
            )));
        }
        for m in batch {
            movements.insert(m.seq, m.clone());
        }
        Ok(())
    }

    fn query(&self, filter: &MovementFilter) -> DomainResult<Vec<Movement>> {
        let movements = self.movements.read().map_err(|_| poisoned("movement store"))?;
        Ok(movements.values().filter(|m| filter.matches(m)).cloned().collect())
    }
}
