//! Valuation engine: per-article cost state behind its own lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use rust_decimal::Decimal;

use stockledger_core::{ArticleId, DomainResult, StockKey};
use stockledger_inventory::{ArticleCost, CostLayer, CostingMethod};

use crate::locks::poisoned;

#[derive(Debug, Default)]
pub struct ValuationEngine {
    costs: RwLock<HashMap<ArticleId, Arc<Mutex<ArticleCost>>>>,
}

impl ValuationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cost state of `article`, created with `method` on first use.
    pub(crate) fn handle(&self, article: ArticleId, method: CostingMethod) -> DomainResult<Arc<Mutex<ArticleCost>>> {
        if let Some(h) = self
            .costs
            .read()
            .map_err(|_| poisoned("valuation"))?
            .get(&article)
        {
            return Ok(h.clone());
        }
        let mut costs = self.costs.write().map_err(|_| poisoned("valuation"))?;
        Ok(costs
            .entry(article)
            .or_insert_with(|| Arc::new(Mutex::new(ArticleCost::new(method))))
            .clone())
    }

    pub(crate) fn lock(handle: &Arc<Mutex<ArticleCost>>) -> DomainResult<MutexGuard<'_, ArticleCost>> {
        handle.lock().map_err(|_| poisoned("article cost"))
    }

    fn snapshot(&self, article: ArticleId) -> DomainResult<Option<ArticleCost>> {
        let handle = match self.costs.read().map_err(|_| poisoned("valuation"))?.get(&article) {
            Some(h) => h.clone(),
            None => return Ok(None),
        };
        let cost = Self::lock(&handle)?;
        Ok(Some(cost.clone()))
    }

    /// Running average (WAC) or remaining-layer cost (FIFO); zero before any entry.
    pub fn current_unit_cost(&self, article: ArticleId) -> DomainResult<Decimal> {
        Ok(self
            .snapshot(article)?
            .map(|c| c.current_unit_cost())
            .unwrap_or(Decimal::ZERO))
    }

    pub fn costing_method(&self, article: ArticleId) -> DomainResult<Option<CostingMethod>> {
        Ok(self.snapshot(article)?.map(|c| c.method()))
    }

    /// Unconsumed FIFO layers at one key, oldest first.
    pub fn layers(&self, key: &StockKey) -> DomainResult<Vec<CostLayer>> {
        Ok(self
            .snapshot(key.article)?
            .map(|c| c.layers_at(key))
            .unwrap_or_default())
    }
}
