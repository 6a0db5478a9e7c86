//! Upstream proxy timeouts and buffer sizes.

use std::sync::{Arc, LazyLock};

use k8s_openapi::api::networking::v1::Ingress;
use regex::Regex;
use serde::Serialize;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_string, get_u32};
use crate::resolver::ConfigResolver;

const CONNECT_TIMEOUT: &str = "proxy-connect-timeout";
const SEND_TIMEOUT: &str = "proxy-send-timeout";
const READ_TIMEOUT: &str = "proxy-read-timeout";
const BUFFER_SIZE: &str = "proxy-buffer-size";
const BODY_SIZE: &str = "proxy-body-size";

static SIZE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^\d+[kKmM]?$").ok());

/// Proxy settings for a location. Timeouts in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyConfig {
    pub connect_timeout: u32,
    pub send_timeout: u32,
    pub read_timeout: u32,
    pub buffer_size: String,
    pub body_size: String,
}

pub struct ProxyParser {
    resolver: Arc<dyn ConfigResolver>,
}

impl ProxyParser {
    pub fn new(resolver: Arc<dyn ConfigResolver>) -> Self {
        Self { resolver }
    }
}

fn timeout_or(ingress: &Ingress, name: &str, default: u32) -> Result<u32, ParseError> {
    match get_u32(ingress, name) {
        Err(e) if e.is_missing() => Ok(default),
        other => other,
    }
}

fn size_or(ingress: &Ingress, name: &str, default: &str) -> Result<String, ParseError> {
    match get_string(ingress, name) {
        Ok(raw) => {
            let size = raw.trim();
            if SIZE_RE.as_ref().is_some_and(|re| re.is_match(size)) {
                Ok(size.to_string())
            } else {
                Err(ParseError::invalid(name, format!("{raw:?} is not a size")))
            }
        }
        Err(e) if e.is_missing() => Ok(default.to_string()),
        Err(e) => Err(e),
    }
}

impl AnnotationParser for ProxyParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let defaults = self.resolver.default_backend();
        Ok(AnnotationValue::Proxy(ProxyConfig {
            connect_timeout: timeout_or(ingress, CONNECT_TIMEOUT, defaults.proxy_connect_timeout)?,
            send_timeout: timeout_or(ingress, SEND_TIMEOUT, defaults.proxy_send_timeout)?,
            read_timeout: timeout_or(ingress, READ_TIMEOUT, defaults.proxy_read_timeout)?,
            buffer_size: size_or(ingress, BUFFER_SIZE, &defaults.proxy_buffer_size)?,
            body_size: size_or(ingress, BODY_SIZE, &defaults.proxy_body_size)?,
        }))
    }
}
