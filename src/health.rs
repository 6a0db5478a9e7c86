//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (200 once the election and controller started)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels identifying one Ingress
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct IngressLabels {
    pub namespace: String,
    pub name: String,
}

impl EncodeLabelSet for IngressLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-annotation metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AnnotationLabels {
    pub annotation: String,
}

impl EncodeLabelSet for AnnotationLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("annotation", self.annotation.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the controller
pub struct Metrics {
    /// 1 while this replica holds the lease
    pub is_leader: Gauge,
    /// Leader identity changes observed
    pub leader_changes: Counter,
    /// Annotation extractions per Ingress
    pub extractions: Family<IngressLabels, Counter>,
    /// Denied snapshots by failing parser
    pub annotation_denials: Family<AnnotationLabels, Counter>,
    /// Extraction duration
    pub extract_duration_seconds: Histogram,
    /// Failed reconciliations
    pub reconcile_errors: Family<IngressLabels, Counter>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let is_leader = Gauge::default();
        registry.register(
            "ingress_core_is_leader",
            "Whether this replica currently holds the leader lease",
            is_leader.clone(),
        );

        let leader_changes = Counter::default();
        registry.register(
            "ingress_core_leader_changes",
            "Number of leader changes observed by this replica",
            leader_changes.clone(),
        );

        let extractions = Family::<IngressLabels, Counter>::default();
        registry.register(
            "ingress_core_extractions",
            "Number of annotation extractions",
            extractions.clone(),
        );

        let annotation_denials = Family::<AnnotationLabels, Counter>::default();
        registry.register(
            "ingress_core_annotation_denials",
            "Number of Ingresses denied, by the annotation that failed",
            annotation_denials.clone(),
        );

        let extract_duration_seconds = Histogram::new(exponential_buckets(0.0001, 2.0, 15));
        registry.register(
            "ingress_core_extract_duration_seconds",
            "Duration of annotation extraction in seconds",
            extract_duration_seconds.clone(),
        );

        let reconcile_errors = Family::<IngressLabels, Counter>::default();
        registry.register(
            "ingress_core_reconcile_errors",
            "Number of failed reconciliations",
            reconcile_errors.clone(),
        );

        Self {
            is_leader,
            leader_changes,
            extractions,
            annotation_denials,
            extract_duration_seconds,
            reconcile_errors,
            registry,
        }
    }

    /// Record one extraction and, when denied, the failing annotation
    pub fn record_extraction(
        &self,
        namespace: &str,
        name: &str,
        duration_secs: f64,
        denied_by: Option<&str>,
    ) {
        let labels = IngressLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.extractions.get_or_create(&labels).inc();
        self.extract_duration_seconds.observe(duration_secs);
        if let Some(annotation) = denied_by {
            self.annotation_denials
                .get_or_create(&AnnotationLabels {
                    annotation: annotation.to_string(),
                })
                .inc();
        }
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        let labels = IngressLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.reconcile_errors.get_or_create(&labels).inc();
    }

    /// Record a new leader identity
    pub fn record_leader_change(&self) {
        self.leader_changes.inc();
    }

    /// Set whether this replica holds the lease
    pub fn set_leader(&self, leading: bool) {
        self.is_leader.set(i64::from(leading));
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the election and controller are running
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the controller as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the controller is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the controller has started.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
