//! Cluster configuration lookups used by annotation parsers.
//!
//! Parsers never talk to the API server directly. They ask a
//! [`ConfigResolver`] for controller-wide defaults and for secrets, which the
//! running controller serves from its informer cache.

use std::collections::HashMap;

use ipnet::IpNet;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::{ObjectRef, Store};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Secret key holding the CA bundle for client certificate auth.
pub const CA_CERT_KEY: &str = "ca.crt";

/// Errors from configuration lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    /// Secret name was not of the form `<namespace>/<name>`.
    #[error("invalid secret name {0:?}, expected <namespace>/<name>")]
    InvalidName(String),

    /// No secret with that name is known.
    #[error("secret {0} not found")]
    SecretNotFound(String),

    /// The secret exists but lacks a required key.
    #[error("secret {name} has no {key:?} key")]
    MissingKey { name: String, key: String },
}

/// Controller-wide defaults applied when an Ingress does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendDefaults {
    /// Seconds to wait for an upstream connection.
    pub proxy_connect_timeout: u32,
    /// Seconds between two successive writes to an upstream.
    pub proxy_send_timeout: u32,
    /// Seconds between two successive reads from an upstream.
    pub proxy_read_timeout: u32,
    /// Size of the buffer for the first part of an upstream response.
    pub proxy_buffer_size: String,
    /// Maximum client request body size.
    pub proxy_body_size: String,
    /// Redirect plain HTTP to HTTPS when TLS is configured.
    pub ssl_redirect: bool,
    /// Keep the listening port in redirect locations.
    pub use_port_in_redirects: bool,
    /// Failed attempts before an upstream is marked unavailable.
    pub upstream_max_fails: u32,
    /// Seconds an upstream stays unavailable after `upstream_max_fails`.
    pub upstream_fail_timeout: u32,
    /// Source ranges allowed when an Ingress sets none.
    pub whitelist_source_range: Vec<IpNet>,
}

impl Default for BackendDefaults {
    fn default() -> Self {
        Self {
            proxy_connect_timeout: 5,
            proxy_send_timeout: 60,
            proxy_read_timeout: 60,
            proxy_buffer_size: "4k".to_string(),
            proxy_body_size: "1m".to_string(),
            ssl_redirect: true,
            use_port_in_redirects: false,
            upstream_max_fails: 0,
            upstream_fail_timeout: 0,
            whitelist_source_range: Vec::new(),
        }
    }
}

/// CA material for client certificate authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSslCert {
    /// Secret the CA came from, as `<namespace>/<name>`.
    pub secret: String,
    /// File name the proxy loads the CA bundle from.
    pub ca_file_name: String,
    /// Hex SHA-256 of the PEM bundle, used to detect changes.
    pub pem_sha: String,
}

/// Lookups available to annotation parsers.
pub trait ConfigResolver: Send + Sync {
    /// Defaults for settings an Ingress does not override.
    fn default_backend(&self) -> BackendDefaults;

    /// Secret by `<namespace>/<name>`.
    fn get_secret(&self, name: &str) -> Result<Secret, ResolverError>;

    /// CA bundle from the `ca.crt` key of the named secret.
    fn get_auth_certificate(&self, name: &str) -> Result<AuthSslCert, ResolverError> {
        let (namespace, secret_name) = split_secret_name(name)?;
        let secret = self.get_secret(name)?;
        let pem = secret_value(&secret, CA_CERT_KEY).ok_or_else(|| ResolverError::MissingKey {
            name: name.to_string(),
            key: CA_CERT_KEY.to_string(),
        })?;

        Ok(AuthSslCert {
            secret: name.to_string(),
            ca_file_name: format!("ca-{namespace}-{secret_name}.pem"),
            pem_sha: format!("{:x}", Sha256::digest(&pem)),
        })
    }
}

/// Split `<namespace>/<name>`.
pub fn split_secret_name(name: &str) -> Result<(&str, &str), ResolverError> {
    match name.split_once('/') {
        Some((ns, n)) if !ns.is_empty() && !n.is_empty() && !n.contains('/') => Ok((ns, n)),
        _ => Err(ResolverError::InvalidName(name.to_string())),
    }
}

/// Bytes stored under `key`, from either `data` or `stringData`.
pub fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    if let Some(value) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Some(value.0.clone());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.clone().into_bytes())
}

/// Resolver backed by the controller's secret informer cache.
#[derive(Clone)]
pub struct StoreResolver {
    secrets: Store<Secret>,
    defaults: BackendDefaults,
}

impl StoreResolver {
    /// Serve secrets from `secrets` and defaults from `defaults`.
    pub fn new(secrets: Store<Secret>, defaults: BackendDefaults) -> Self {
        Self { secrets, defaults }
    }
}

impl ConfigResolver for StoreResolver {
    fn default_backend(&self) -> BackendDefaults {
        self.defaults.clone()
    }

    fn get_secret(&self, name: &str) -> Result<Secret, ResolverError> {
        let (namespace, secret_name) = split_secret_name(name)?;
        self.secrets
            .get(&ObjectRef::new(secret_name).within(namespace))
            .map(|s| s.as_ref().clone())
            .ok_or_else(|| ResolverError::SecretNotFound(name.to_string()))
    }
}

/// Resolver over a fixed set of secrets.
///
/// For local runs without a cluster and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    secrets: HashMap<String, Secret>,
    defaults: BackendDefaults,
}

impl StaticResolver {
    /// Empty resolver with the given defaults.
    pub fn new(defaults: BackendDefaults) -> Self {
        Self {
            secrets: HashMap::new(),
            defaults,
        }
    }

    /// Add a secret under `<namespace>/<name>`.
    pub fn with_secret(mut self, name: impl Into<String>, secret: Secret) -> Self {
        self.secrets.insert(name.into(), secret);
        self
    }
}

impl ConfigResolver for StaticResolver {
    fn default_backend(&self) -> BackendDefaults {
        self.defaults.clone()
    }

    fn get_secret(&self, name: &str) -> Result<Secret, ResolverError> {
        split_secret_name(name)?;
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| ResolverError::SecretNotFound(name.to_string()))
    }
}
