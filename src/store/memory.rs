//! In-memory [`Store`] implementation with optimistic concurrency.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::store::{DynamicPrefix, LbService, PoolResource, Store};

#[derive(Default)]
struct Tables {
    prefixes: HashMap<String, DynamicPrefix>,
    pools: HashMap<String, PoolResource>,
    services: HashMap<String, LbService>,
}

/// A `Store` backed by process-local maps. Every write checks the
/// incoming `resource_version` against what's stored and bumps it by one
/// on success, so concurrent writers racing on the same name get a
/// [`StoreError::Conflict`] rather than silently clobbering each other.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_and_bump_version(stored: Option<u64>, incoming: u64, name: &str) -> Result<u64, StoreError> {
    match stored {
        Some(current) if current != incoming => Err(StoreError::Conflict(name.to_string())),
        _ => Ok(incoming + 1),
    }
}

impl Store for InMemoryStore {
    fn get_prefix(&self, name: &str) -> Option<DynamicPrefix> {
        self.tables.lock().expect("store mutex poisoned").prefixes.get(name).cloned()
    }

    fn list_prefixes(&self) -> Vec<DynamicPrefix> {
        self.tables.lock().expect("store mutex poisoned").prefixes.values().cloned().collect()
    }

    fn put_prefix(&self, mut prefix: DynamicPrefix) -> Result<DynamicPrefix, StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        let stored_version = tables.prefixes.get(&prefix.name).map(|p| p.resource_version);
        prefix.resource_version = check_and_bump_version(stored_version, prefix.resource_version, &prefix.name)?;
        tables.prefixes.insert(prefix.name.clone(), prefix.clone());
        Ok(prefix)
    }

    fn request_prefix_deletion(&self, name: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        let entry = tables
            .prefixes
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        entry.deletion_requested = true;
        Ok(())
    }

    fn remove_prefix(&self, name: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        tables
            .prefixes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn get_pool(&self, name: &str) -> Option<PoolResource> {
        self.tables.lock().expect("store mutex poisoned").pools.get(name).cloned()
    }

    fn list_pools(&self) -> Vec<PoolResource> {
        self.tables.lock().expect("store mutex poisoned").pools.values().cloned().collect()
    }

    fn put_pool(&self, mut pool: PoolResource) -> Result<PoolResource, StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        let stored_version = tables.pools.get(&pool.name).map(|p| p.resource_version);
        pool.resource_version = check_and_bump_version(stored_version, pool.resource_version, &pool.name)?;
        tables.pools.insert(pool.name.clone(), pool.clone());
        Ok(pool)
    }

    fn get_service(&self, name: &str) -> Option<LbService> {
        self.tables.lock().expect("store mutex poisoned").services.get(name).cloned()
    }

    fn list_services(&self) -> Vec<LbService> {
        self.tables.lock().expect("store mutex poisoned").services.values().cloned().collect()
    }

    fn put_service(&self, mut service: LbService) -> Result<LbService, StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        let stored_version = tables.services.get(&service.name).map(|s| s.resource_version);
        service.resource_version = check_and_bump_version(stored_version, service.resource_version, &service.name)?;
        tables.services.insert(service.name.clone(), service.clone());
        Ok(service)
    }
}
