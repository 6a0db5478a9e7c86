//! Run every registered parser over an Ingress and collect the results.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use super::parsers::{
    self, AUTH_TLS_SECRET, AffinityConfig, ParserRegistry, Upstream, default_registry,
};
use super::{AnnotationValue, ParseError, get_string, ingress_key, qualify_secret_name};
use crate::resolver::{ConfigResolver, ResolverError};

/// Snapshot key reserved for the denial reason.
pub const DENIED_KEY: &str = "Denied";

/// Errors from extractor lookups outside the parser registry.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to resolve client certificate secret for ingress {ingress}: {source}")]
    SecretResolution {
        ingress: String,
        #[source]
        source: ResolverError,
    },
}

/// First hard parser failure for an Ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Registry name of the parser that failed.
    pub annotation: String,
    pub error: ParseError,
}

/// Everything the registry produced for one Ingress.
///
/// An entry is present when its parser succeeded and absent when the
/// annotation was not set or the parser failed. The first failure is kept
/// as the [`Denial`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSnapshot {
    values: BTreeMap<String, AnnotationValue>,
    denial: Option<Denial>,
}

impl AnnotationSnapshot {
    pub fn get(&self, name: &str) -> Option<&AnnotationValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn denial(&self) -> Option<&Denial> {
        self.denial.as_ref()
    }

    pub fn is_denied(&self) -> bool {
        self.denial.is_some()
    }

    /// Values in registry-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AnnotationValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of values, not counting the denial.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.denial.is_none()
    }
}

impl Serialize for AnnotationSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = self.values.len() + usize::from(self.denial.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        if let Some(denial) = &self.denial {
            map.serialize_entry(DENIED_KEY, &denial.error.to_string())?;
        }
        map.end()
    }
}

/// Applies a parser registry to Ingresses.
///
/// Holds no per-Ingress state; share it behind an `Arc`.
pub struct AnnotationExtractor {
    resolver: Arc<dyn ConfigResolver>,
    parsers: ParserRegistry,
}

impl AnnotationExtractor {
    /// Extractor with all built-in parsers.
    ///
    /// htpasswd files for basic/digest auth are written under `auth_directory`.
    pub fn new(resolver: Arc<dyn ConfigResolver>, auth_directory: impl Into<PathBuf>) -> Self {
        let parsers = default_registry(resolver.clone(), auth_directory);
        Self::with_parsers(resolver, parsers)
    }

    /// Extractor with a caller-supplied registry.
    pub fn with_parsers(resolver: Arc<dyn ConfigResolver>, mut parsers: ParserRegistry) -> Self {
        if parsers.remove(DENIED_KEY).is_some() {
            warn!("Dropping parser registered under reserved name {DENIED_KEY:?}");
        }
        Self { resolver, parsers }
    }

    /// Registry names, in the order parsers run.
    pub fn parser_names(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }

    /// Run every parser against `ingress`.
    pub fn extract(&self, ingress: &Ingress) -> AnnotationSnapshot {
        let key = ingress_key(ingress);
        let mut snapshot = AnnotationSnapshot::default();

        for (name, parser) in &self.parsers {
            match parser.parse(ingress) {
                Ok(value) => {
                    snapshot.values.insert(name.clone(), value);
                }
                Err(e) if e.is_missing() => {
                    trace!(ingress = %key, parser = %name, "Annotation not set");
                }
                Err(e) if snapshot.denial.is_none() => {
                    error!(ingress = %key, parser = %name, error = %e, "Annotation denied");
                    snapshot.denial = Some(Denial {
                        annotation: name.clone(),
                        error: e,
                    });
                }
                Err(e) => {
                    debug!(
                        ingress = %key,
                        parser = %name,
                        error = %e,
                        "Additional annotation error"
                    );
                }
            }
        }

        snapshot
    }

    /// Run one parser, discarding any error.
    fn parse_one(&self, name: &str, ingress: &Ingress) -> Option<AnnotationValue> {
        let parser = self.parsers.get(name)?;
        match parser.parse(ingress) {
            Ok(value) => Some(value),
            Err(e) => {
                if !e.is_missing() {
                    debug!(
                        ingress = %ingress_key(ingress),
                        parser = %name,
                        error = %e,
                        "Using default after annotation error"
                    );
                }
                None
            }
        }
    }

    /// Whether upstreams are reached over TLS. `false` on any error.
    pub fn secure_upstream(&self, ingress: &Ingress) -> bool {
        self.parse_one(parsers::SECURE_UPSTREAM, ingress)
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }

    /// Passive health check settings. Zero values on any error.
    pub fn health_check(&self, ingress: &Ingress) -> Upstream {
        match self.parse_one(parsers::HEALTH_CHECK, ingress) {
            Some(AnnotationValue::Upstream(upstream)) => upstream,
            _ => Upstream::default(),
        }
    }

    /// Whether TLS is passed through to the backend. `false` on any error.
    pub fn ssl_passthrough(&self, ingress: &Ingress) -> bool {
        self.parse_one(parsers::SSL_PASSTHROUGH, ingress)
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }

    /// Session affinity. No affinity on any error.
    pub fn session_affinity(&self, ingress: &Ingress) -> AffinityConfig {
        match self.parse_one(parsers::SESSION_AFFINITY, ingress) {
            Some(AnnotationValue::Affinity(config)) => config,
            _ => AffinityConfig::default(),
        }
    }

    /// Whether the Ingress names a client certificate secret.
    pub fn contains_certificate_auth(&self, ingress: &Ingress) -> bool {
        get_string(ingress, AUTH_TLS_SECRET).is_ok()
    }

    /// The client certificate secret named by the Ingress, if any.
    pub fn certificate_auth_secret(
        &self,
        ingress: &Ingress,
    ) -> Result<Option<Secret>, ExtractError> {
        let Ok(secret) = get_string(ingress, AUTH_TLS_SECRET) else {
            return Ok(None);
        };
        if secret.trim().is_empty() {
            return Ok(None);
        }

        let name = qualify_secret_name(ingress, secret.trim());
        self.resolver
            .get_secret(&name)
            .map(Some)
            .map_err(|source| ExtractError::SecretResolution {
                ingress: ingress_key(ingress),
                source,
            })
    }
}
