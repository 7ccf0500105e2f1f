//! Shared fixtures for the unit tests of this crate.

use std::sync::Arc;

use rust_decimal::Decimal;

use stockledger_auth::GrantAuthorizer;
use stockledger_core::{StockKey, UserId};
use stockledger_events::InMemoryAuditSink;
use stockledger_inventory::{
    Article, CostingMethod, Depot, DocumentRef, MovementRequest,
    MovementType,
};

use crate::catalog::InMemoryCatalog;
use crate::config::StockConfig;
use crate::engine::StockEngine;
use crate::ledger::{AppendOutcome, InMemoryMovementStore, MovementStore};

pub(crate) struct Kit {
    pub engine: StockEngine,
    pub catalog: Arc<InMemoryCatalog>,
    pub audit: Arc<InMemoryAuditSink>,
    pub authz: Arc<GrantAuthorizer>,
    pub depot: Depot,
    pub other: Depot,
    pub user: UserId,
}

impl Kit {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryMovementStore::new()))
    }

    pub fn with_store(store: Arc<dyn MovementStore>) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let (depot, loc) = Depot::new("MAIN");
        let (other, other_loc) = Depot::new("SHOP");
        catalog.put_depot(depot.clone(), loc).unwrap();
        catalog.put_depot(other.clone(), other_loc).unwrap();

        let audit = Arc::new(InMemoryAuditSink::new());
        let authz = Arc::new(GrantAuthorizer::new());
        let engine = StockEngine::with_store(
            StockConfig::default(),
            store,
            catalog.clone(),
            authz.clone(),
            audit.clone(),
        )
        .unwrap();

        Self {
            engine,
            catalog,
            audit,
            authz,
            depot,
            other,
            user: UserId::new(),
        }
    }

    pub fn article(&self, code: &str, method: CostingMethod) -> Article {
        let article = Article::new(code, method);
        self.catalog.put_article(article.clone()).unwrap();
        article
    }

    pub fn key(&self, article: &Article) -> StockKey {
        StockKey::new(article.id, self.depot.id, self.depot.default_location, None)
    }

    pub fn request(&self, kind: MovementType, article: &Article, qty: Decimal) -> MovementRequest {
        MovementRequest::new(kind, article.id, self.depot.id, qty, DocumentRef::new("test", "T-1"), self.user)
    }

    pub fn receive(&self, article: &Article, qty: Decimal, cost: Decimal) -> AppendOutcome {
        self.engine
            .ledger()
            .append(self.request(MovementType::EntryPurchase, article, qty).with_unit_cost(cost))
            .unwrap()
    }
}
