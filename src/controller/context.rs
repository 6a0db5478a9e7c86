//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler:
//! the Kubernetes client, the annotation extractor, this replica's view of
//! the election and the event recorder.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tokio::sync::watch;

use crate::annotations::AnnotationExtractor;
use crate::election::{ElectionState, ElectionStatus};
use crate::health::HealthState;

/// Controller name reported on events
pub const FIELD_MANAGER: &str = "ingress-core";

/// Last reported generation per Ingress key.
///
/// Entries carry the object's UID, so an Ingress recreated under the same
/// name starts over even though its generation restarts at 1.
#[derive(Debug, Default)]
pub struct ReportLedger {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl ReportLedger {
    /// Record `generation` of object `uid` under `key`.
    ///
    /// Returns `false` when exactly that object generation was already recorded.
    pub fn mark(&self, key: &str, uid: &str, generation: i64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = (uid.to_string(), generation);
        entries.insert(key.to_string(), entry.clone()) != Some(entry)
    }

    /// Drop the entry for `key`.
    pub fn forget(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Number of tracked Ingresses.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no Ingress is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Annotation extractor shared by all reconciliations
    pub extractor: Arc<AnnotationExtractor>,
    /// Latest election status
    election: watch::Receiver<ElectionStatus>,
    /// Event reporter identity
    reporter: Reporter,
    /// Generation last reported per Ingress key
    reported: Arc<ReportLedger>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        extractor: Arc<AnnotationExtractor>,
        election: watch::Receiver<ElectionStatus>,
        identity: &str,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            extractor,
            election,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: Some(identity.to_string()),
            },
            reported: Arc::new(ReportLedger::default()),
            health_state,
        }
    }

    /// Whether this replica may write to the cluster
    pub fn is_leader(&self) -> bool {
        self.election.borrow().state == ElectionState::Leading
    }

    /// Record `generation` of the Ingress `uid` as reported for `key`.
    ///
    /// Returns `false` when that generation was already reported.
    pub fn mark_reported(&self, key: &str, uid: &str, generation: i64) -> bool {
        self.reported.mark(key, uid, generation)
    }

    /// Forget an Ingress, so its next reconcile reports again
    pub fn forget(&self, key: &str) {
        self.reported.forget(key);
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish an event on an Ingress
    pub async fn publish_event(
        &self,
        ingress: &Ingress,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = ingress.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
