//! The stock key: the unit of locking, projection and reservation.

use serde::{Deserialize, Serialize};

use crate::id::{ArticleId, DepotId, LocationId, LotId};
use crate::value_object::ValueObject;

/// `(article, depot, location, lot?)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub article: ArticleId,
    pub depot: DepotId,
    pub location: LocationId,
    pub lot: Option<LotId>,
}

impl StockKey {
    pub fn new(article: ArticleId, depot: DepotId, location: LocationId, lot: Option<LotId>) -> Self {
        Self {
            article,
            depot,
            location,
            lot,
        }
    }
}

impl ValueObject for StockKey {}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "article={} depot={} location={}", self.article, self.depot, self.location)?;
        if let Some(lot) = self.lot {
            write!(f, " lot={lot}")?;
        }
        Ok(())
    }
}
