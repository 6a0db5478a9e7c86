//! Path rewriting and HTTPS redirects.

use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_bool, get_string};
use crate::resolver::ConfigResolver;

const REWRITE_TARGET: &str = "rewrite-target";
const ADD_BASE_URL: &str = "add-base-url";
const SSL_REDIRECT: &str = "ssl-redirect";
const FORCE_SSL_REDIRECT: &str = "force-ssl-redirect";
const APP_ROOT: &str = "app-root";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Redirect {
    /// Path the matched location is rewritten to.
    pub target: String,
    pub add_base_url: bool,
    pub ssl_redirect: bool,
    /// Redirect to HTTPS even without TLS configured on the Ingress.
    pub force_ssl_redirect: bool,
    /// Where `/` redirects to.
    pub app_root: String,
}

pub struct RedirectParser {
    resolver: Arc<dyn ConfigResolver>,
}

impl RedirectParser {
    pub fn new(resolver: Arc<dyn ConfigResolver>) -> Self {
        Self { resolver }
    }
}

fn bool_or(ingress: &Ingress, name: &str, default: bool) -> Result<bool, ParseError> {
    match get_bool(ingress, name) {
        Err(e) if e.is_missing() => Ok(default),
        other => other,
    }
}

fn string_or_empty(ingress: &Ingress, name: &str) -> Result<String, ParseError> {
    match get_string(ingress, name) {
        Err(e) if e.is_missing() => Ok(String::new()),
        other => other,
    }
}

impl AnnotationParser for RedirectParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let defaults = self.resolver.default_backend();

        let app_root = string_or_empty(ingress, APP_ROOT)?;
        if !app_root.is_empty() && !app_root.starts_with('/') {
            return Err(ParseError::invalid(APP_ROOT, "must be an absolute path"));
        }

        Ok(AnnotationValue::Redirect(Redirect {
            target: string_or_empty(ingress, REWRITE_TARGET)?,
            add_base_url: bool_or(ingress, ADD_BASE_URL, false)?,
            ssl_redirect: bool_or(ingress, SSL_REDIRECT, defaults.ssl_redirect)?,
            force_ssl_redirect: bool_or(ingress, FORCE_SSL_REDIRECT, false)?,
            app_root,
        }))
    }
}
