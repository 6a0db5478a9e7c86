//! Process configuration from environment variables.
//!
//! Every setting has a default. Values that fail to parse fall back to the
//! default with a warning rather than stopping the controller.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::election::ElectionConfig;
use crate::election::elector::DEFAULT_CLOCK_SKEW;

pub const DEFAULT_ELECTION_ID: &str = "ingress-controller-leader";
pub const DEFAULT_AUTH_DIRECTORY: &str = "/etc/ingress-controller/auth";
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// This replica's identity in the election.
    pub pod_name: String,
    /// Namespace of the election lock.
    pub pod_namespace: String,
    pub election_id: String,
    pub election_ttl: Duration,
    /// `None` means a quarter of the TTL.
    pub election_retry: Option<Duration>,
    pub election_clock_skew: Duration,
    /// Restrict the Ingress watch to one namespace. `None` watches all.
    pub watch_namespace: Option<String>,
    /// Where htpasswd files are written.
    pub auth_directory: PathBuf,
    pub health_port: u16,
}

impl ControllerConfig {
    /// Load configuration from the process environment.
    ///
    /// - `POD_NAME` (default: hostname)
    /// - `POD_NAMESPACE` (default: `default`)
    /// - `ELECTION_ID` (default: `ingress-controller-leader`)
    /// - `ELECTION_TTL_SECS` (default: 30)
    /// - `ELECTION_RETRY_SECS` (default: TTL / 4)
    /// - `ELECTION_CLOCK_SKEW_SECS` (default: 2)
    /// - `WATCH_NAMESPACE` (default: all namespaces)
    /// - `AUTH_DIRECTORY` (default: `/etc/ingress-controller/auth`)
    /// - `HEALTH_PORT` (default: 8080)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pod_name = non_empty("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });
        let pod_namespace = non_empty("POD_NAMESPACE").unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            "default".to_string()
        });

        Self {
            pod_name,
            pod_namespace,
            election_id: non_empty("ELECTION_ID")
                .unwrap_or_else(|| DEFAULT_ELECTION_ID.to_string()),
            election_ttl: parse_secs(&lookup, "ELECTION_TTL_SECS", DEFAULT_TTL),
            election_retry: non_empty("ELECTION_RETRY_SECS")
                .map(|_| parse_secs(&lookup, "ELECTION_RETRY_SECS", DEFAULT_TTL / 4)),
            election_clock_skew: parse_secs(
                &lookup,
                "ELECTION_CLOCK_SKEW_SECS",
                DEFAULT_CLOCK_SKEW,
            ),
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            auth_directory: non_empty("AUTH_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUTH_DIRECTORY)),
            health_port: parse_value(&lookup, "HEALTH_PORT", DEFAULT_HEALTH_PORT),
        }
    }

    /// Election settings for this replica.
    pub fn election(&self) -> ElectionConfig {
        let config = ElectionConfig::new(
            &self.election_id,
            &self.pod_name,
            &self.pod_namespace,
            self.election_ttl,
        )
        .with_clock_skew(self.election_clock_skew);
        match self.election_retry {
            Some(retry) => config.with_retry_period(retry),
            None => config,
        }
    }
}

fn parse_value<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(
                var = key,
                value = %raw,
                default = %default,
                "Invalid value, using default"
            );
            default
        }),
        None => default,
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_secs(parse_value(lookup, key, default.as_secs()))
}
