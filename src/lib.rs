//! ingress-core library crate
//!
//! Coordination and configuration-resolution core of an ingress controller:
//! lease-based leader election over a shared lock record, and a registry of
//! annotation parsers turning Ingress annotations into typed directives.

pub mod annotations;
pub mod config;
pub mod controller;
pub mod election;
pub mod health;
pub mod resolver;

pub use annotations::{AnnotationExtractor, AnnotationSnapshot, AnnotationValue, ParseError};
pub use config::ControllerConfig;
pub use election::{ElectionConfig, ElectionHandle, get_current_leader, new_election};
pub use health::HealthState;

use std::future::Future;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler::reconcile};
use election::{ElectionState, ElectionStatus};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all watches.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Cache of Secrets for annotation resolvers.
///
/// Returns the store and the future that keeps it filled; the store stays
/// empty until that future is polled.
pub fn watch_secrets(
    client: Client,
    namespace: Option<&str>,
) -> (
    reflector::Store<Secret>,
    impl Future<Output = ()> + Send + 'static,
) {
    let api: Api<Secret> = scoped_api(client, namespace);
    let (reader, writer) = reflector::store();
    let driver = reflector(writer, watcher(api, default_watcher_config()))
        .default_backoff()
        .touched_objects()
        .for_each(|result| async move {
            if let Err(e) = result {
                debug!(error = %e, "Secret watch error");
            }
        });
    (reader, driver)
}

/// Mirror election state into readiness-independent leader metrics.
///
/// Runs until the election stops.
pub async fn track_leadership(
    mut status: watch::Receiver<ElectionStatus>,
    health_state: Arc<HealthState>,
) {
    loop {
        let leading = status.borrow_and_update().state == ElectionState::Leading;
        health_state.metrics.set_leader(leading);
        if status.changed().await.is_err() {
            return;
        }
    }
}

/// Run the Ingress controller.
///
/// When `namespace` is `Some(ns)`, only watches Ingresses in that namespace.
/// When `namespace` is `None`, watches Ingresses cluster-wide.
pub async fn run_controller(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    info!("Starting controller for Ingress resources (scope: {})", scope_msg);

    if let Some(ref state) = ctx.health_state {
        state.set_ready(true).await;
    }

    let ingresses: Api<Ingress> = scoped_api(client, namespace);
    let (reader, ingress_stream) = create_filtered_stream(ingresses, default_watcher_config());

    let ledger_ctx = ctx.clone();
    Controller::for_stream(ingress_stream, reader)
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| {
            let ctx = ledger_ctx.clone();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!("Reconciled: {}", obj.name);
                    }
                    Err(e) => {
                        // Deleted objects can still be queued by earlier events
                        let is_not_found = match &e {
                            kube::runtime::controller::Error::ObjectNotFound(obj_ref) => {
                                let namespace = obj_ref.namespace.as_deref().unwrap_or_default();
                                ctx.forget(&format!("{namespace}/{}", obj_ref.name));
                                true
                            }
                            kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                                err.is_not_found()
                            }
                            _ => false,
                        };
                        if is_not_found {
                            debug!("Object no longer exists (likely deleted): {:?}", e);
                        } else {
                            error!("Reconciliation error: {:?}", e);
                        }
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
