//! Passive upstream health checking.

use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_u32};
use crate::resolver::ConfigResolver;

const UPSTREAM_MAX_FAILS: &str = "upstream-max-fails";
const UPSTREAM_FAIL_TIMEOUT: &str = "upstream-fail-timeout";

/// Failure threshold for marking an upstream unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Upstream {
    pub max_fails: u32,
    /// Seconds.
    pub fail_timeout: u32,
}

/// Always yields a value; unset or unusable annotations take the controller default.
pub struct HealthCheckParser {
    resolver: Arc<dyn ConfigResolver>,
}

impl HealthCheckParser {
    pub fn new(resolver: Arc<dyn ConfigResolver>) -> Self {
        Self { resolver }
    }
}

impl AnnotationParser for HealthCheckParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let defaults = self.resolver.default_backend();
        Ok(AnnotationValue::Upstream(Upstream {
            max_fails: get_u32(ingress, UPSTREAM_MAX_FAILS).unwrap_or(defaults.upstream_max_fails),
            fail_timeout: get_u32(ingress, UPSTREAM_FAIL_TIMEOUT)
                .unwrap_or(defaults.upstream_fail_timeout),
        }))
    }
}
