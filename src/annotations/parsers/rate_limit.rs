//! Per-client connection and request rate limits.

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use serde::Serialize;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_int};

const LIMIT_CONNECTIONS: &str = "limit-connections";
const LIMIT_RPS: &str = "limit-rps";

/// Burst allowed on top of the limit, as a multiple of it.
const BURST_FACTOR: u32 = 5;

/// Size of each shared-memory zone, in megabytes.
const SHARED_SIZE_MB: u32 = 1;

/// A named limit zone. A zero limit disables the zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub name: String,
    pub limit: u32,
    pub burst: u32,
    pub shared_size_mb: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub connections: Zone,
    pub rps: Zone,
}

#[derive(Debug, Default)]
pub struct RateLimitParser;

fn limit(ingress: &Ingress, name: &str) -> Result<Option<u32>, ParseError> {
    match get_int(ingress, name) {
        Ok(v) if v < 0 => Err(ParseError::invalid(name, "must not be negative")),
        Ok(v) => u32::try_from(v)
            .map(Some)
            .map_err(|_| ParseError::invalid(name, format!("{v} is out of range"))),
        Err(e) if e.is_missing() => Ok(None),
        Err(e) => Err(e),
    }
}

fn zone(prefix: &str, suffix: &str, limit: u32) -> Zone {
    Zone {
        name: format!("{prefix}_{suffix}"),
        limit,
        burst: limit.saturating_mul(BURST_FACTOR),
        shared_size_mb: SHARED_SIZE_MB,
    }
}

impl AnnotationParser for RateLimitParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let connections = limit(ingress, LIMIT_CONNECTIONS)?;
        let rps = limit(ingress, LIMIT_RPS)?;
        if connections.is_none() && rps.is_none() {
            return Err(ParseError::missing(LIMIT_CONNECTIONS));
        }

        let prefix = format!(
            "{}_{}",
            ingress.namespace().unwrap_or_default(),
            ingress.name_any()
        );
        Ok(AnnotationValue::RateLimit(RateLimit {
            connections: zone(&prefix, "conn", connections.unwrap_or(0)),
            rps: zone(&prefix, "rps", rps.unwrap_or(0)),
        }))
    }
}
