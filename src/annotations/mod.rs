//! Typed routing directives from Ingress annotations.
//!
//! Each [`AnnotationParser`] turns the `ingress.kubernetes.io/*` annotations
//! it owns into one [`AnnotationValue`]. A parser reporting
//! [`ParseError::MissingAnnotation`] simply does not apply to the Ingress;
//! any other error is a hard failure the [`extractor`] records as a denial.

pub mod extractor;
pub mod parsers;

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use serde::Serialize;
use thiserror::Error;

pub use extractor::{AnnotationExtractor, AnnotationSnapshot, DENIED_KEY, Denial, ExtractError};
pub use parsers::{
    AffinityConfig, BasicDigestAuth, CertificateAuth, CookieConfig, ExternalAuth, ProxyConfig,
    RateLimit, Redirect, SourceRange, Upstream, Zone,
};

/// Prefix shared by every annotation the controller reads.
pub const ANNOTATION_PREFIX: &str = "ingress.kubernetes.io/";

/// Failure to produce a value from an Ingress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The annotation is not set. Not a failure: the parser does not apply.
    #[error("annotation {annotation} is not set")]
    MissingAnnotation { annotation: String },

    /// The annotation is set to something unusable.
    #[error("invalid value for annotation {annotation}: {reason}")]
    InvalidContent { annotation: String, reason: String },

    /// A referenced cluster object could not be resolved.
    #[error("resolution failed: {reason}")]
    Resolution { reason: String },

    /// Writing derived files failed.
    #[error("io error: {reason}")]
    Io { reason: String },
}

impl ParseError {
    /// Soft failure that extraction skips.
    pub fn is_missing(&self) -> bool {
        matches!(self, ParseError::MissingAnnotation { .. })
    }

    pub(crate) fn missing(name: &str) -> Self {
        ParseError::MissingAnnotation {
            annotation: annotation_key(name),
        }
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidContent {
            annotation: annotation_key(name),
            reason: reason.into(),
        }
    }
}

/// Output of one parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    Bool(bool),
    Text(String),
    BasicDigestAuth(BasicDigestAuth),
    ExternalAuth(ExternalAuth),
    CertificateAuth(CertificateAuth),
    Upstream(Upstream),
    SourceRange(SourceRange),
    Proxy(ProxyConfig),
    RateLimit(RateLimit),
    Redirect(Redirect),
    Affinity(AffinityConfig),
}

impl AnnotationValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AnnotationValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnnotationValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A named capability turning an Ingress into one typed value.
pub trait AnnotationParser: Send + Sync {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError>;
}

/// Full annotation key for `name`.
pub fn annotation_key(name: &str) -> String {
    format!("{ANNOTATION_PREFIX}{name}")
}

/// Raw value of `ingress.kubernetes.io/<name>`.
pub fn get_string(ingress: &Ingress, name: &str) -> Result<String, ParseError> {
    ingress
        .annotations()
        .get(&annotation_key(name))
        .cloned()
        .ok_or_else(|| ParseError::missing(name))
}

/// Boolean annotation, accepting the usual spellings of true and false.
pub fn get_bool(ingress: &Ingress, name: &str) -> Result<bool, ParseError> {
    let raw = get_string(ingress, name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "t" | "yes" => Ok(true),
        "false" | "0" | "f" | "no" => Ok(false),
        _ => Err(ParseError::invalid(name, format!("{raw:?} is not a boolean"))),
    }
}

/// Integer annotation.
pub fn get_int(ingress: &Ingress, name: &str) -> Result<i64, ParseError> {
    let raw = get_string(ingress, name)?;
    raw.trim()
        .parse()
        .map_err(|_| ParseError::invalid(name, format!("{raw:?} is not an integer")))
}

/// Non-negative integer annotation that must fit in `u32`.
pub fn get_u32(ingress: &Ingress, name: &str) -> Result<u32, ParseError> {
    let value = get_int(ingress, name)?;
    u32::try_from(value)
        .map_err(|_| ParseError::invalid(name, format!("{value} is out of range")))
}

/// `<namespace>/<name>` of the Ingress, for naming derived objects.
pub fn ingress_key(ingress: &Ingress) -> String {
    format!(
        "{}/{}",
        ingress.namespace().unwrap_or_default(),
        ingress.name_any()
    )
}

/// Qualify a secret reference with the Ingress namespace when it has none.
pub fn qualify_secret_name(ingress: &Ingress, secret: &str) -> String {
    if secret.contains('/') {
        secret.to_string()
    } else {
        format!("{}/{}", ingress.namespace().unwrap_or_default(), secret)
    }
}
