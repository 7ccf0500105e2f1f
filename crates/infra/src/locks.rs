//! Lock tables for key-scoped transactions and the depot freeze gate.
//!
//! Global lock order: depot gate → stock key → article cost → the shared
//! maps (reservations, projection, movement store).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stockledger_core::{DepotId, DomainError, DomainResult, InventoryId};

pub(crate) fn poisoned(what: &str) -> DomainError {
    DomainError::persistence(format!("{what} lock poisoned"))
}

/// One mutex per key, created on demand.
///
/// Operations on the same key serialize; disjoint keys proceed in parallel.
#[derive(Debug)]
pub struct LockTable<K> {
    name: &'static str,
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> LockTable<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The mutex for `key`. Hold its guard for the duration of the transaction.
    pub fn handle(&self, key: &K) -> DomainResult<Arc<Mutex<()>>> {
        let mut locks = self.locks.lock().map_err(|_| poisoned(self.name))?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    /// Lock `handle`, mapping poisoning to a persistence failure.
    pub fn acquire<'a>(&self, handle: &'a Arc<Mutex<()>>) -> DomainResult<MutexGuard<'a, ()>> {
        handle.lock().map_err(|_| poisoned(self.name))
    }
}

/// Which inventory (if any) froze a depot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FreezeState {
    pub frozen_by: Option<InventoryId>,
}

impl FreezeState {
    /// Whether a movement attributed to `inventory` may post while this state holds.
    pub fn admits(&self, inventory: Option<InventoryId>) -> bool {
        match self.frozen_by {
            None => true,
            Some(owner) => inventory == Some(owner),
        }
    }
}

/// Per-depot gate. Appends hold the read side across check-and-insert;
/// freezing takes the write side, so no append can straddle a freeze.
#[derive(Debug, Default)]
pub struct DepotGates {
    gates: Mutex<HashMap<DepotId, Arc<RwLock<FreezeState>>>>,
}

impl DepotGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, depot: DepotId) -> DomainResult<Arc<RwLock<FreezeState>>> {
        let mut gates = self.gates.lock().map_err(|_| poisoned("depot gate table"))?;
        Ok(gates.entry(depot).or_default().clone())
    }

    pub fn read<'a>(gate: &'a Arc<RwLock<FreezeState>>) -> DomainResult<RwLockReadGuard<'a, FreezeState>> {
        gate.read().map_err(|_| poisoned("depot gate"))
    }

    pub fn write<'a>(gate: &'a Arc<RwLock<FreezeState>>) -> DomainResult<RwLockWriteGuard<'a, FreezeState>> {
        gate.write().map_err(|_| poisoned("depot gate"))
    }

    pub fn is_frozen(&self, depot: DepotId) -> DomainResult<bool> {
        let gate = self.gate(depot)?;
        let state = Self::read(&gate)?;
        Ok(state.frozen_by.is_some())
    }

    /// Release a freeze held by `inventory`. No-op if someone else (or nobody) holds it.
    pub fn unfreeze(&self, depot: DepotId, inventory: InventoryId) -> DomainResult<bool> {
        let gate = self.gate(depot)?;
        let mut state = Self::write(&gate)?;
        if state.frozen_by == Some(inventory) {
            state.frozen_by = None;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_shares_one_mutex() {
        let table: LockTable<u32> = LockTable::new("test");
        let a = table.handle(&1).unwrap();
        let b = table.handle(&1).unwrap();
        let c = table.handle(&2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn frozen_depot_admits_only_its_inventory() {
        let inv = InventoryId::new();
        let state = FreezeState { frozen_by: Some(inv) };
        assert!(state.admits(Some(inv)));
        assert!(!state.admits(None));
        assert!(!state.admits(Some(InventoryId::new())));
        assert!(FreezeState::default().admits(None));
    }

    #[test]
    fn unfreeze_requires_the_owner() {
        let gates = DepotGates::new();
        let depot = DepotId::new();
        let inv = InventoryId::new();
        {
            let gate = gates.gate(depot).unwrap();
            DepotGates::write(&gate).unwrap().frozen_by = Some(inv);
        }
        assert!(!gates.unfreeze(depot, InventoryId::new()).unwrap());
        assert!(gates.is_frozen(depot).unwrap());
        assert!(gates.unfreeze(depot, inv).unwrap());
        assert!(!gates.is_frozen(depot).unwrap());
    }
}
