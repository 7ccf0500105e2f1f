//! Reference data owned by the surrounding application (articles, depots,
//! locations). The stock core only reads it.

use serde::{Deserialize, Serialize};

use stockledger_core::{ArticleId, DepotId, LocationId, SiteId};

/// Costing method fixed per article.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostingMethod {
    Fifo,
    WeightedAverage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub code: String,
    pub stockable: bool,
    pub costing_method: CostingMethod,
}

impl Article {
    pub fn new(code: impl Into<String>, costing_method: CostingMethod) -> Self {
        Self {
            id: ArticleId::new(),
            code: code.into(),
            stockable: true,
            costing_method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depot {
    pub id: DepotId,
    pub code: String,
    pub site: Option<SiteId>,
    pub active: bool,
    pub default_location: LocationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub depot: DepotId,
    pub code: String,
    pub active: bool,
}

impl Depot {
    /// New active depot together with its default location.
    pub fn new(code: impl Into<String>) -> (Self, Location) {
        let id = DepotId::new();
        let location = Location {
            id: LocationId::new(),
            depot: id,
            code: "DEFAULT".to_string(),
            active: true,
        };
        let depot = Self {
            id,
            code: code.into(),
            site: None,
            active: true,
            default_location: location.id,
        };
        (depot, location)
    }
}
