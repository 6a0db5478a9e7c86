//! ingress-core - leader election and annotation resolution for an ingress controller.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Joins the leader election over the shared Endpoints lock
//! - Starts the Secret cache, the Ingress controller and the health server

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use ingress_core::annotations::AnnotationExtractor;
use ingress_core::controller::context::Context;
use ingress_core::election::EndpointsLockStore;
use ingress_core::health::{HealthState, run_health_server};
use ingress_core::resolver::{BackendDefaults, StoreResolver};
use ingress_core::{ControllerConfig, new_election, run_controller, track_leadership, watch_secrets};

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ingress_core=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting ingress-core");

    let config = ControllerConfig::from_env();
    let election_config = config.election();
    election_config.validate()?;

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());

    // Probes must answer while the election is still running
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let (secrets, secret_watch) = watch_secrets(client.clone(), config.watch_namespace.as_deref());
    let secret_handle = tokio::spawn(secret_watch);
    let resolver = Arc::new(StoreResolver::new(secrets, BackendDefaults::default()));
    let extractor = Arc::new(AnnotationExtractor::new(resolver, &config.auth_directory));

    info!(
        identity = %election_config.identity(),
        namespace = %election_config.namespace(),
        election_id = %election_config.election_id(),
        "Joining leader election"
    );
    let lock_store = Arc::new(EndpointsLockStore::new(client.clone()));
    let election = {
        let health_state = health_state.clone();
        let identity = election_config.identity().to_string();
        new_election(election_config, lock_store, move |leader| {
            health_state.metrics.record_leader_change();
            if leader == identity {
                info!(leader = %leader, "Acquired leadership");
            } else {
                info!(leader = %leader, "New leader elected");
            }
        })
        .await?
    };
    let leadership_handle = tokio::spawn(track_leadership(
        election.subscribe(),
        health_state.clone(),
    ));

    let ctx = Arc::new(Context::new(
        client.clone(),
        extractor,
        election.subscribe(),
        election.identity(),
        Some(health_state.clone()),
    ));
    let controller_handle = {
        let namespace = config.watch_namespace.clone();
        tokio::spawn(async move {
            run_controller(client, ctx, namespace.as_deref()).await;
        })
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = secret_handle => {
            if let Err(e) = result {
                error!("Secret watch task panicked: {}", e);
            }
        }
        Err(e) = leadership_handle => {
            error!("Leadership tracking task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            health_state.set_ready(false).await;
            info!("Marked controller as not ready");

            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    // Stops renewing; the lease lapses after its TTL
    drop(election);
    info!("ingress-core stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the controller cannot shut
/// down gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
