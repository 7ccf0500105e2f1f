//! Lot registry: identity, expiry and blocking of perishable batches.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use stockledger_core::{ArticleId, DomainError, DomainResult, Entity, LotId, UserId};
use stockledger_events::{AuditRecord, AuditSink};
use stockledger_inventory::{Lot, NewLot};

use crate::locks::poisoned;

pub struct LotRegistry {
    lots: RwLock<HashMap<LotId, Lot>>,
    audit: Arc<dyn AuditSink>,
}

impl LotRegistry {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            lots: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Register a lot. Lot numbers are unique across the registry.
    pub fn register(&self, input: NewLot, actor: UserId) -> DomainResult<Lot> {
        let lot = Lot::register(input, Utc::now())?;
        {
            let mut lots = self.lots.write().map_err(|_| poisoned("lot registry"))?;
            if lots.values().any(|l| l.number == lot.number) {
                return Err(DomainError::validation(format!("lot number {} already exists", lot.number)));
            }
            lots.insert(lot.id, lot.clone());
        }

        info!(lot = %lot.id, number = %lot.number, article = %lot.article, "lot registered");
        self.audit
            .emit(AuditRecord::created(Lot::entity_name(), lot.id, &lot, Some(actor)));
        Ok(lot)
    }

    pub fn get(&self, id: LotId) -> DomainResult<Option<Lot>> {
        let lots = self.lots.read().map_err(|_| poisoned("lot registry"))?;
        Ok(lots.get(&id).cloned())
    }

    pub fn by_number(&self, number: &str) -> DomainResult<Option<Lot>> {
        let lots = self.lots.read().map_err(|_| poisoned("lot registry"))?;
        Ok(lots.values().find(|l| l.number == number).cloned())
    }

    pub fn for_article(&self, article: ArticleId) -> DomainResult<Vec<Lot>> {
        let lots = self.lots.read().map_err(|_| poisoned("lot registry"))?;
        let mut out: Vec<Lot> = lots.values().filter(|l| l.article == article).cloned().collect();
        out.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(out)
    }

    pub fn block(&self, id: LotId, reason: &str, actor: UserId) -> DomainResult<Lot> {
        self.transition(id, "block", actor, |lot| lot.block(reason))
    }

    pub fn unblock(&self, id: LotId, actor: UserId) -> DomainResult<Lot> {
        self.transition(id, "unblock", actor, |lot| lot.unblock())
    }

    pub fn mark_non_conforming(&self, id: LotId, reason: &str, actor: UserId) -> DomainResult<Lot> {
        self.transition(id, "mark_non_conforming", actor, |lot| lot.mark_non_conforming(reason))
    }

    fn transition<F>(&self, id: LotId, action: &'static str, actor: UserId, f: F) -> DomainResult<Lot>
    where
        F: FnOnce(&mut Lot) -> DomainResult<()>,
    {
        let (before, after) = {
            let mut lots = self.lots.write().map_err(|_| poisoned("lot registry"))?;
            let lot = lots
                .get_mut(&id)
                .ok_or_else(|| DomainError::not_found(format!("lot {id}")))?;
            let before = lot.clone();
            let mut next = lot.clone();
            f(&mut next)?;
            *lot = next.clone();
            (before, next)
        };

        info!(lot = %id, action, status = ?after.status, "lot status changed");
        self.audit.emit(AuditRecord::capture(
            Lot::entity_name(),
            id,
            action,
            Some(&before),
            Some(&after),
            Some(actor),
        ));
        Ok(after)
    }

    /// Mark every ACTIVE lot past its expiry date as EXPIRED. Returns the swept lots.
    pub fn sweep_expired(&self, today: NaiveDate) -> DomainResult<Vec<Lot>> {
        let now = Utc::now();
        let mut swept = Vec::new();
        {
            let mut lots = self.lots.write().map_err(|_| poisoned("lot registry"))?;
            for lot in lots.values_mut() {
                let before = lot.clone();
                if lot.expire(today, now) {
                    swept.push((before, lot.clone()));
                }
            }
        }

        if !swept.is_empty() {
            warn!(count = swept.len(), %today, "expired lots swept");
        }
        Ok(swept
            .into_iter()
            .map(|(before, after)| {
                self.audit.emit(AuditRecord::capture(
                    Lot::entity_name(),
                    after.id,
                    "expire",
                    Some(&before),
                    Some(&after),
                    None,
                ));
                after
            })
            .collect())
    }
}
