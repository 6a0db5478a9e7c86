//! External authentication through a subrequest to an auth service.

use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;
use url::Url;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_bool, get_string};

const AUTH_URL: &str = "auth-url";
const AUTH_METHOD: &str = "auth-method";
const AUTH_SEND_BODY: &str = "auth-send-body";

const METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS", "TRACE",
];

/// Where and how to ask for an authentication decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalAuth {
    pub url: String,
    pub host: String,
    /// Empty means the method of the original request.
    pub method: String,
    pub send_body: bool,
}

#[derive(Debug, Default)]
pub struct ExternalAuthParser;

impl AnnotationParser for ExternalAuthParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let raw = get_string(ingress, AUTH_URL)?;
        let url = Url::parse(raw.trim())
            .map_err(|e| ParseError::invalid(AUTH_URL, format!("{raw:?}: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ParseError::invalid(
                AUTH_URL,
                format!("unsupported scheme {:?}", url.scheme()),
            ));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ParseError::invalid(AUTH_URL, "url has no host"))?
            .to_string();

        let method = match get_string(ingress, AUTH_METHOD) {
            Ok(m) if METHODS.contains(&m.as_str()) => m,
            Ok(m) => {
                return Err(ParseError::invalid(
                    AUTH_METHOD,
                    format!("{m:?} is not an HTTP method"),
                ));
            }
            Err(e) if e.is_missing() => String::new(),
            Err(e) => return Err(e),
        };

        let send_body = match get_bool(ingress, AUTH_SEND_BODY) {
            Ok(b) => b,
            Err(e) if e.is_missing() => false,
            Err(e) => return Err(e),
        };

        Ok(AnnotationValue::ExternalAuth(ExternalAuth {
            url: url.to_string(),
            host,
            method,
            send_body,
        }))
    }
}
