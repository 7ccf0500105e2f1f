//! Reference-data checks shared by the ledger, reservations and workflows.

use chrono::NaiveDate;

use stockledger_core::{ArticleId, DepotId, DomainError, DomainResult, LocationId, LotId};
use stockledger_inventory::{Article, Depot, Lot};

use crate::catalog::Catalog;
use crate::lots::LotRegistry;

/// The article must exist and be stockable.
pub(crate) fn article(catalog: &dyn Catalog, id: ArticleId) -> DomainResult<Article> {
    let article = catalog
        .article(id)?
        .ok_or_else(|| DomainError::not_found(format!("article {id}")))?;
    if !article.stockable {
        return Err(DomainError::validation(format!("article {} is not stockable", article.code)));
    }
    Ok(article)
}

/// The depot must exist and be active.
pub(crate) fn depot(catalog: &dyn Catalog, id: DepotId) -> DomainResult<Depot> {
    let depot = catalog
        .depot(id)?
        .ok_or_else(|| DomainError::not_found(format!("depot {id}")))?;
    if !depot.active {
        return Err(DomainError::validation(format!("depot {} is inactive", depot.code)));
    }
    Ok(depot)
}

/// Resolve an optional location to an active location of an active depot.
pub(crate) fn location(catalog: &dyn Catalog, depot_id: DepotId, location: Option<LocationId>) -> DomainResult<LocationId> {
    let depot = depot(catalog, depot_id)?;
    let id = location.unwrap_or(depot.default_location);
    let location = catalog
        .location(id)?
        .ok_or_else(|| DomainError::not_found(format!("location {id}")))?;
    if location.depot != depot.id {
        return Err(DomainError::validation(format!(
            "location {} does not belong to depot {}",
            location.code, depot.code
        )));
    }
    if !location.active {
        return Err(DomainError::validation(format!("location {} is inactive", location.code)));
    }
    Ok(location.id)
}

/// The lot must exist, belong to `article` and (when required) be available.
pub(crate) fn lot(
    lots: &LotRegistry,
    id: LotId,
    article: ArticleId,
    require_available: bool,
    today: NaiveDate,
) -> DomainResult<Lot> {
    let lot = lots
        .get(id)?
        .ok_or_else(|| DomainError::not_found(format!("lot {id}")))?;
    if lot.article != article {
        return Err(DomainError::validation(format!(
            "lot {} does not belong to article {article}",
            lot.number
        )));
    }
    if require_available && !lot.available(today) {
        let status = if lot.expired(today) {
            "expired".to_string()
        } else {
            format!("{:?}", lot.status).to_lowercase()
        };
        return Err(DomainError::LotUnavailable {
            lot: lot.number.clone(),
            status,
        });
    }
    Ok(lot)
}
