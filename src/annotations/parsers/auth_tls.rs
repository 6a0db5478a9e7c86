//! Client certificate authentication against a CA from a secret.

use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;

use crate::annotations::{
    AnnotationParser, AnnotationValue, ParseError, get_int, get_string, qualify_secret_name,
};
use crate::resolver::{AuthSslCert, ConfigResolver};

pub(crate) const AUTH_TLS_SECRET: &str = "auth-tls-secret";
const AUTH_TLS_VERIFY_DEPTH: &str = "auth-tls-verify-depth";

const DEFAULT_VERIFY_DEPTH: u32 = 1;

/// CA used to verify client certificates, and how deep to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateAuth {
    pub auth_ssl_cert: AuthSslCert,
    pub verify_depth: u32,
}

pub struct CertificateAuthParser {
    resolver: Arc<dyn ConfigResolver>,
}

impl CertificateAuthParser {
    pub fn new(resolver: Arc<dyn ConfigResolver>) -> Self {
        Self { resolver }
    }
}

impl AnnotationParser for CertificateAuthParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let secret = get_string(ingress, AUTH_TLS_SECRET)?;
        if secret.trim().is_empty() {
            return Err(ParseError::invalid(AUTH_TLS_SECRET, "secret name is empty"));
        }
        let secret_name = qualify_secret_name(ingress, secret.trim());

        // Unusable depths fall back to the default rather than failing auth setup.
        let verify_depth = get_int(ingress, AUTH_TLS_VERIFY_DEPTH)
            .ok()
            .and_then(|d| u32::try_from(d).ok())
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_VERIFY_DEPTH);

        let auth_ssl_cert = self
            .resolver
            .get_auth_certificate(&secret_name)
            .map_err(|e| ParseError::Resolution {
                reason: e.to_string(),
            })?;

        Ok(AnnotationValue::CertificateAuth(CertificateAuth {
            auth_ssl_cert,
            verify_depth,
        }))
    }
}
