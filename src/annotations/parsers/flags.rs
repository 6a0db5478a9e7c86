//! Single-flag and raw-text annotations.

use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_bool, get_string};
use crate::resolver::ConfigResolver;

const ENABLE_CORS: &str = "enable-cors";
const SECURE_BACKENDS: &str = "secure-backends";
const SSL_PASSTHROUGH: &str = "ssl-passthrough";
const USE_PORT_IN_REDIRECTS: &str = "use-port-in-redirects";
const CONFIGURATION_SNIPPET: &str = "configuration-snippet";

/// A boolean annotation with no default: absent means "does not apply".
#[derive(Debug, Clone, Copy)]
pub struct FlagParser {
    annotation: &'static str,
}

impl FlagParser {
    pub const fn new(annotation: &'static str) -> Self {
        Self { annotation }
    }

    pub const fn cors() -> Self {
        Self::new(ENABLE_CORS)
    }

    pub const fn secure_upstream() -> Self {
        Self::new(SECURE_BACKENDS)
    }

    pub const fn ssl_passthrough() -> Self {
        Self::new(SSL_PASSTHROUGH)
    }
}

impl AnnotationParser for FlagParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        get_bool(ingress, self.annotation).map(AnnotationValue::Bool)
    }
}

/// `use-port-in-redirects`, falling back to the controller default.
pub struct PortInRedirectParser {
    resolver: Arc<dyn ConfigResolver>,
}

impl PortInRedirectParser {
    pub fn new(resolver: Arc<dyn ConfigResolver>) -> Self {
        Self { resolver }
    }
}

impl AnnotationParser for PortInRedirectParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        match get_bool(ingress, USE_PORT_IN_REDIRECTS) {
            Ok(b) => Ok(AnnotationValue::Bool(b)),
            Err(e) if e.is_missing() => Ok(AnnotationValue::Bool(
                self.resolver.default_backend().use_port_in_redirects,
            )),
            Err(e) => Err(e),
        }
    }
}

/// Raw proxy configuration appended to the location.
#[derive(Debug, Default)]
pub struct SnippetParser;

impl AnnotationParser for SnippetParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        get_string(ingress, CONFIGURATION_SNIPPET).map(AnnotationValue::Text)
    }
}
