//! Lease-based leader election over a single shared lock record.
//!
//! Replicas race to write a [`LockRecord`] into one annotation of a shared
//! resource. The store's resource version is the only mutual exclusion: of
//! any set of concurrent writes based on the same read, exactly one lands.
//! The winner renews the lease every tick; followers take over once the
//! lease has expired by their own clock (plus a configured skew allowance).
//!
//! - [`record`]: the serialized claim
//! - [`store`]: storage boundary ([`LockStore`])
//! - [`state_machine`]: transition table for one replica's view
//! - [`elector`]: the tick loop, notifications and the public handle

pub mod elector;
pub mod endpoints_store;
pub mod memory_store;
pub mod record;
pub mod state_machine;
pub mod store;

use thiserror::Error;

pub use elector::{
    ElectionConfig, ElectionHandle, ElectionStatus, Elector, get_current_leader, new_election,
};
pub use endpoints_store::EndpointsLockStore;
pub use memory_store::MemoryLockStore;
pub use record::{LEADER_ANNOTATION_KEY, LockRecord};
pub use state_machine::{ElectionEvent, ElectionState, ElectionStateMachine};
pub use store::{LockObject, LockStore, StoreError};

/// Errors from the coordination core.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// Timing or identity settings are unusable.
    #[error("invalid election config: {0}")]
    Config(String),

    /// The lock annotation exists but is not a valid lock record.
    #[error("malformed lock record: {0}")]
    LockRecord(#[from] serde_json::Error),

    /// The resource holding the lock does not exist.
    #[error("lock resource {namespace}/{name} not found")]
    ResourceNotFound { namespace: String, name: String },

    /// Lock store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ElectionError {
    /// Whether the lock payload itself is corrupt, as opposed to unreachable.
    pub fn is_malformed_record(&self) -> bool {
        matches!(self, ElectionError::LockRecord(_))
    }
}
