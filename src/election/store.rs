//! Storage boundary for the lock record.
//!
//! A `LockStore` reads and conditionally writes one named, namespaced,
//! versioned resource. The lock payload is an opaque string to the store;
//! the resource version is the only concurrency control.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors surfaced by a lock store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The expected resource version was stale, or the resource already existed on create.
    #[error("conflict writing {namespace}/{name}: resource changed since it was read")]
    Conflict { namespace: String, name: String },

    /// The resource to update does not exist.
    #[error("lock resource {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Any other backend failure.
    #[error("lock store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this is an optimistic-concurrency loss.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Snapshot of the lock resource as last read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockObject {
    /// Resource name.
    pub name: String,
    /// Resource namespace.
    pub namespace: String,
    /// Optimistic-concurrency token for the next update.
    pub resource_version: String,
    /// Serialized lock record, if any replica has written one.
    pub record: Option<String>,
}

/// Read/update primitive over the shared lock resource.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Read the lock resource. `None` means the resource does not exist.
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<LockObject>, StoreError>;

    /// Create the lock resource, optionally with an initial record.
    ///
    /// Fails with [`StoreError::Conflict`] when the resource already exists.
    async fn create(
        &self,
        name: &str,
        namespace: &str,
        record: Option<String>,
    ) -> Result<LockObject, StoreError>;

    /// Replace the lock record if the resource is still at `expected_version`.
    ///
    /// Fails with [`StoreError::Conflict`] when the version is stale.
    async fn update(
        &self,
        name: &str,
        namespace: &str,
        record: String,
        expected_version: &str,
    ) -> Result<LockObject, StoreError>;
}
