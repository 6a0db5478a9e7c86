//! In-process lock store.
//!
//! Backs elections that never leave the process (local runs, functional
//! tests). Versions increase monotonically across all objects in the store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::store::{LockObject, LockStore, StoreError};

#[derive(Default)]
struct Inner {
    objects: HashMap<(String, String), LockObject>,
    next_version: u64,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Lock store keeping resources in memory.
#[derive(Default)]
pub struct MemoryLockStore {
    inner: Mutex<Inner>,
}

impl MemoryLockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a raw record unconditionally, bypassing version checks.
    ///
    /// Creates the resource when missing. Used to seed state, including
    /// malformed payloads a real cluster could contain.
    pub fn put_raw(&self, name: &str, namespace: &str, record: Option<String>) -> LockObject {
        let mut inner = self.lock();
        let resource_version = inner.bump();
        let object = LockObject {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resource_version,
            record,
        };
        inner
            .objects
            .insert(key(name, namespace), object.clone());
        object
    }

    /// Current object, without the suspension point of [`LockStore::get`].
    pub fn snapshot(&self, name: &str, namespace: &str) -> Option<LockObject> {
        self.lock().objects.get(&key(name, namespace)).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned map is still consistent: every mutation is a single insert.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn key(name: &str, namespace: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<LockObject>, StoreError> {
        // Every call suspends once, like a network round trip, so concurrent
        // electors interleave their reads and writes.
        tokio::task::yield_now().await;
        Ok(self.snapshot(name, namespace))
    }

    async fn create(
        &self,
        name: &str,
        namespace: &str,
        record: Option<String>,
    ) -> Result<LockObject, StoreError> {
        tokio::task::yield_now().await;
        let mut inner = self.lock();
        if inner.objects.contains_key(&key(name, namespace)) {
            return Err(StoreError::Conflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        let resource_version = inner.bump();
        let object = LockObject {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resource_version,
            record,
        };
        inner
            .objects
            .insert(key(name, namespace), object.clone());
        Ok(object)
    }

    async fn update(
        &self,
        name: &str,
        namespace: &str,
        record: String,
        expected_version: &str,
    ) -> Result<LockObject, StoreError> {
        tokio::task::yield_now().await;
        let mut inner = self.lock();
        let current_version = match inner.objects.get(&key(name, namespace)) {
            Some(existing) => existing.resource_version.clone(),
            None => {
                return Err(StoreError::NotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                });
            }
        };
        if current_version != expected_version {
            return Err(StoreError::Conflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        let resource_version = inner.bump();
        let object = LockObject {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resource_version,
            record: Some(record),
        };
        inner
            .objects
            .insert(key(name, namespace), object.clone());
        Ok(object)
    }
}
