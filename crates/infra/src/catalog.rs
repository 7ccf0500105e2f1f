//! Reference-data collaborator: articles, depots and locations.

use std::collections::HashMap;
use std::sync::RwLock;

use stockledger_core::{ArticleId, DepotId, DomainResult, LocationId};
use stockledger_inventory::{Article, Depot, Location};

use crate::locks::poisoned;

/// Read access to the master data the ledger validates against.
pub trait Catalog: Send + Sync + 'static {
    fn article(&self, id: ArticleId) -> DomainResult<Option<Article>>;
    fn depot(&self, id: DepotId) -> DomainResult<Option<Depot>>;
    fn location(&self, id: LocationId) -> DomainResult<Option<Location>>;
}

/// In-memory catalog for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    articles: RwLock<HashMap<ArticleId, Article>>,
    depots: RwLock<HashMap<DepotId, Depot>>,
    locations: RwLock<HashMap<LocationId, Location>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_article(&self, article: Article) -> DomainResult<()> {
        let mut articles = self.articles.write().map_err(|_| poisoned("catalog"))?;
        articles.insert(article.id, article);
        Ok(())
    }

    /// Register a depot together with its default location.
    pub fn put_depot(&self, depot: Depot, default_location: Location) -> DomainResult<()> {
        self.put_location(default_location)?;
        let mut depots = self.depots.write().map_err(|_| poisoned("catalog"))?;
        depots.insert(depot.id, depot);
        Ok(())
    }

    pub fn put_location(&self, location: Location) -> DomainResult<()> {
        let mut locations = self.locations.write().map_err(|_| poisoned("catalog"))?;
        locations.insert(location.id, location);
        Ok(())
    }
}

impl Catalog for InMemoryCatalog {
    fn article(&self, id: ArticleId) -> DomainResult<Option<Article>> {
        let articles = self.articles.read().map_err(|_| poisoned("catalog"))?;
        Ok(articles.get(&id).cloned())
    }

    fn depot(&self, id: DepotId) -> DomainResult<Option<Depot>> {
        let depots = self.depots.read().map_err(|_| poisoned("catalog"))?;
        Ok(depots.get(&id).cloned())
    }

    fn location(&self, id: LocationId) -> DomainResult<Option<Location>> {
        let locations = self.locations.read().map_err(|_| poisoned("catalog"))?;
        Ok(locations.get(&id).cloned())
    }
}
