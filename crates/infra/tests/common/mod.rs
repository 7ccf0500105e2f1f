#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;

use stockledger_auth::{Grant, GrantAuthorizer, Permission};
use stockledger_core::{StockKey, UserId};
use stockledger_events::InMemoryAuditSink;
use stockledger_infra::{AppendOutcome, InMemoryCatalog, StockConfig, StockEngine};
use stockledger_inventory::{Article, CostingMethod, Depot, DocumentRef, MovementRequest, MovementType};

pub struct Harness {
    pub engine: StockEngine,
    pub catalog: Arc<InMemoryCatalog>,
    pub audit: Arc<InMemoryAuditSink>,
    pub authz: Arc<GrantAuthorizer>,
    /// Depot A.
    pub a: Depot,
    /// Depot B.
    pub b: Depot,
    pub clerk: UserId,
}

impl Harness {
    pub fn new() -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let (a, a_loc) = Depot::new("A");
        let (b, b_loc) = Depot::new("B");
        catalog.put_depot(a.clone(), a_loc).unwrap();
        catalog.put_depot(b.clone(), b_loc).unwrap();

        let audit = Arc::new(InMemoryAuditSink::new());
        let authz = Arc::new(GrantAuthorizer::new());
        let engine = StockEngine::new(StockConfig::default(), catalog.clone(), authz.clone(), audit.clone()).unwrap();

        Self {
            engine,
            catalog,
            audit,
            authz,
            a,
            b,
            clerk: UserId::new(),
        }
    }

    pub fn article(&self, code: &str, method: CostingMethod) -> Article {
        let article = Article::new(code, method);
        self.catalog.put_article(article.clone()).unwrap();
        article
    }

    /// A user holding `permission` on every depot, without amount ceiling.
    pub fn user_with(&self, permission: Permission) -> UserId {
        let user = UserId::new();
        self.authz.grant(user, Grant::new(permission));
        user
    }

    pub fn key(&self, article: &Article, depot: &Depot) -> StockKey {
        StockKey::new(article.id, depot.id, depot.default_location, None)
    }

    pub fn post(&self, kind: MovementType, article: &Article, depot: &Depot, qty: Decimal) -> AppendOutcome {
        self.engine.ledger().append(self.request(kind, article, depot, qty)).unwrap()
    }

    pub fn request(&self, kind: MovementType, article: &Article, depot: &Depot, qty: Decimal) -> MovementRequest {
        MovementRequest::new(kind, article.id, depot.id, qty, DocumentRef::new("test", "T-1"), self.clerk)
    }

    pub fn receive(&self, article: &Article, depot: &Depot, qty: Decimal, cost: Decimal) -> AppendOutcome {
        self.engine
            .ledger()
            .append(self.request(MovementType::EntryPurchase, article, depot, qty).with_unit_cost(cost))
            .unwrap()
    }
}
