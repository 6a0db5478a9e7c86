//! Reconciliation loop for Ingresses.
//!
//! Every replica extracts annotations for every Ingress so its view stays
//! warm for a takeover. Only the leader reports the outcome as an Event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tracing::{debug, error, info, warn};

use crate::annotations::AnnotationSnapshot;
use crate::controller::{context::Context, error::Error};

/// Periodic re-extraction interval
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);

/// Event reasons
pub const REASON_DENIED: &str = "AnnotationDenied";
pub const REASON_CONFIGURED: &str = "Configured";

/// What the leader reports for one Ingress generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressEvent {
    /// A parser rejected an annotation
    Denied { note: String },
    /// All annotations were accepted
    Configured { note: String },
}

impl IngressEvent {
    fn event_type(&self) -> EventType {
        match self {
            IngressEvent::Denied { .. } => EventType::Warning,
            IngressEvent::Configured { .. } => EventType::Normal,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            IngressEvent::Denied { .. } => REASON_DENIED,
            IngressEvent::Configured { .. } => REASON_CONFIGURED,
        }
    }

    fn note(&self) -> &str {
        match self {
            IngressEvent::Denied { note } | IngressEvent::Configured { note } => note,
        }
    }
}

/// Event to publish for a snapshot, if any.
pub fn plan_event(snapshot: &AnnotationSnapshot, new_generation: bool) -> Option<IngressEvent> {
    if !new_generation {
        return None;
    }
    match snapshot.denial() {
        Some(denial) => Some(IngressEvent::Denied {
            note: format!("{} rejected: {}", denial.annotation, denial.error),
        }),
        None => {
            let applied: Vec<&str> = snapshot.iter().map(|(name, _)| name).collect();
            Some(IngressEvent::Configured {
                note: if applied.is_empty() {
                    "No annotation directives".to_string()
                } else {
                    format!("Applied {}", applied.join(", "))
                },
            })
        }
    }
}

/// Seconds since the epoch, clamped at zero.
fn unix_seconds(ts: jiff::Timestamp) -> u64 {
    u64::try_from(ts.as_second()).unwrap_or_default()
}

/// Reconcile an Ingress
pub async fn reconcile(ingress: Arc<Ingress>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = ingress.name_any();
    let namespace = ingress
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;
    let key = format!("{namespace}/{name}");

    if ingress.metadata.deletion_timestamp.is_some() {
        debug!(ingress = %key, "Ingress is being deleted");
        ctx.forget(&key);
        return Ok(Action::await_change());
    }

    let start_time = Instant::now();
    let snapshot = ctx.extractor.extract(&ingress);
    let elapsed = start_time.elapsed().as_secs_f64();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_extraction(
            &namespace,
            &name,
            elapsed,
            snapshot.denial().map(|d| d.annotation.as_str()),
        );
    }
    debug!(
        ingress = %key,
        snapshot = %serde_json::to_string(&snapshot)?,
        "Extracted annotations"
    );

    if ctx.is_leader() {
        let generation = ingress.metadata.generation.unwrap_or_default();
        let uid = ingress.metadata.uid.as_deref().unwrap_or_default();
        if let Some(event) = plan_event(&snapshot, ctx.mark_reported(&key, uid, generation)) {
            info!(ingress = %key, reason = event.reason(), "Reporting annotation outcome");
            ctx.publish_event(
                &ingress,
                event.event_type(),
                event.reason(),
                "Extract",
                Some(event.note().to_string()),
            )
            .await;
        }
    }

    if ctx.extractor.contains_certificate_auth(&ingress) {
        ctx.extractor.certificate_auth_secret(&ingress)?;
    }

    if let Some(ref health_state) = ctx.health_state {
        let now = unix_seconds(jiff::Timestamp::now());
        health_state
            .last_reconcile
            .store(now, std::sync::atomic::Ordering::Relaxed);
    }

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

/// Error policy for the controller
pub fn error_policy(ingress: Arc<Ingress>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = ingress.name_any();
    let namespace = ingress.namespace().unwrap_or_default();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, namespace = %namespace, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(name = %name, namespace = %namespace, error = %error, "Non-retryable error");
        Action::requeue(REQUEUE_INTERVAL)
    }
}
