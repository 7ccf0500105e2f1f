//! Versioned store for the workflow aggregates (transfers, inventories).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, DomainResult, ExpectedVersion};

use crate::locks::{LockTable, poisoned};

/// Current state of each aggregate plus a per-aggregate operation lock.
///
/// A workflow operation holds the operation lock while it loads, decides,
/// performs side effects and saves; `save` still checks the expected
/// version so a writer bypassing the lock cannot overwrite newer state.
#[derive(Debug)]
pub struct AggregateStore<A>
where
    A: Aggregate,
{
    name: &'static str,
    states: RwLock<HashMap<A::Id, A>>,
    ops: LockTable<A::Id>,
}

impl<A> AggregateStore<A>
where
    A: Aggregate + Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            states: RwLock::new(HashMap::new()),
            ops: LockTable::new(name),
        }
    }

    pub fn operation_lock(&self, id: &A::Id) -> DomainResult<Arc<Mutex<()>>> {
        self.ops.handle(id)
    }

    pub fn lock<'a>(&self, handle: &'a Arc<Mutex<()>>) -> DomainResult<std::sync::MutexGuard<'a, ()>> {
        self.ops.acquire(handle)
    }

    pub fn load(&self, id: &A::Id) -> DomainResult<A> {
        let states = self.states.read().map_err(|_| poisoned(self.name))?;
        states
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("{} {id:?}", self.name)))
    }

    pub fn find(&self, id: &A::Id) -> DomainResult<Option<A>> {
        let states = self.states.read().map_err(|_| poisoned(self.name))?;
        Ok(states.get(id).cloned())
    }

    /// Persist `aggregate` if the stored version still equals `expected`
    /// (a missing aggregate counts as version 0).
    pub fn save(&self, aggregate: A, expected: ExpectedVersion) -> DomainResult<()> {
        let mut states = self.states.write().map_err(|_| poisoned(self.name))?;
        let current = states.get(aggregate.id()).map(|a| a.version()).unwrap_or(0);
        expected.check(current)?;
        states.insert(aggregate.id().clone(), aggregate);
        Ok(())
    }

    pub fn all(&self) -> DomainResult<Vec<A>> {
        let states = self.states.read().map_err(|_| poisoned(self.name))?;
        Ok(states.values().cloned().collect())
    }
}

/// Apply `events` to a copy of `aggregate`.
pub fn evolve<A>(aggregate: &A, events: &[A::Event]) -> A
where
    A: Aggregate + Clone,
{
    let mut next = aggregate.clone();
    for e in events {
        next.apply(e);
    }
    next
}
