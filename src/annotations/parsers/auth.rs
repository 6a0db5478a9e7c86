//! Basic and digest authentication from an htpasswd secret.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use serde::Serialize;

use crate::annotations::{
    AnnotationParser, AnnotationValue, ParseError, get_string, qualify_secret_name,
};
use crate::resolver::{ConfigResolver, secret_value};

const AUTH_TYPE: &str = "auth-type";
const AUTH_SECRET: &str = "auth-secret";
const AUTH_REALM: &str = "auth-realm";

/// Key in the secret holding the htpasswd content.
const PASSWD_KEY: &str = "auth";

/// Basic or digest authentication for a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasicDigestAuth {
    /// `basic` or `digest`.
    pub auth_type: String,
    pub realm: String,
    /// htpasswd file written for the proxy.
    pub file: PathBuf,
    pub secured: bool,
}

pub struct BasicDigestAuthParser {
    resolver: Arc<dyn ConfigResolver>,
    auth_directory: PathBuf,
}

impl BasicDigestAuthParser {
    pub fn new(resolver: Arc<dyn ConfigResolver>, auth_directory: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            auth_directory: auth_directory.into(),
        }
    }
}

impl AnnotationParser for BasicDigestAuthParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let auth_type = get_string(ingress, AUTH_TYPE)?;
        if auth_type != "basic" && auth_type != "digest" {
            return Err(ParseError::invalid(
                AUTH_TYPE,
                format!("{auth_type:?} is not basic or digest"),
            ));
        }

        let secret_ref = get_string(ingress, AUTH_SECRET)
            .map_err(|_| ParseError::invalid(AUTH_SECRET, "required when auth-type is set"))?;
        let secret_name = qualify_secret_name(ingress, &secret_ref);
        let secret =
            self.resolver
                .get_secret(&secret_name)
                .map_err(|e| ParseError::Resolution {
                    reason: e.to_string(),
                })?;
        let passwd = secret_value(&secret, PASSWD_KEY).ok_or_else(|| {
            ParseError::invalid(
                AUTH_SECRET,
                format!("secret {secret_name} has no {PASSWD_KEY:?} key"),
            )
        })?;

        let file = self.auth_directory.join(format!(
            "{}-{}.passwd",
            ingress.namespace().unwrap_or_default(),
            ingress.name_any()
        ));
        fs::write(&file, passwd).map_err(|e| ParseError::Io {
            reason: format!("writing {}: {e}", file.display()),
        })?;

        Ok(AnnotationValue::BasicDigestAuth(BasicDigestAuth {
            auth_type,
            realm: get_string(ingress, AUTH_REALM).unwrap_or_default(),
            file,
            secured: true,
        }))
    }
}
