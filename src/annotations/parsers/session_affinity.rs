//! Sticky sessions.

use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_string};

const AFFINITY: &str = "affinity";
const COOKIE_NAME: &str = "session-cookie-name";
const COOKIE_HASH: &str = "session-cookie-hash";

const DEFAULT_COOKIE_NAME: &str = "INGRESSCOOKIE";
const DEFAULT_COOKIE_HASH: &str = "md5";
const COOKIE_HASHES: &[&str] = &["md5", "sha1", "index"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CookieConfig {
    pub name: String,
    pub hash: String,
}

/// Session affinity for a backend. An empty type means none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffinityConfig {
    pub affinity_type: String,
    pub cookie: CookieConfig,
}

#[derive(Debug, Default)]
pub struct SessionAffinityParser;

impl AnnotationParser for SessionAffinityParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let affinity_type = get_string(ingress, AFFINITY)?;
        if affinity_type != "cookie" {
            return Err(ParseError::invalid(
                AFFINITY,
                format!("{affinity_type:?} is not a supported affinity type"),
            ));
        }

        let name = get_string(ingress, COOKIE_NAME)
            .ok()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string());
        let hash = match get_string(ingress, COOKIE_HASH) {
            Ok(h) if COOKIE_HASHES.contains(&h.as_str()) => h,
            Ok(h) => {
                return Err(ParseError::invalid(
                    COOKIE_HASH,
                    format!("{h:?} is not one of {}", COOKIE_HASHES.join(", ")),
                ));
            }
            Err(_) => DEFAULT_COOKIE_HASH.to_string(),
        };

        Ok(AnnotationValue::Affinity(AffinityConfig {
            affinity_type,
            cookie: CookieConfig { name, hash },
        }))
    }
}
