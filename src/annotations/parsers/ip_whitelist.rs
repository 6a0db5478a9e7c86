//! Client source ranges allowed to reach a location.

use std::net::IpAddr;
use std::sync::Arc;

use ipnet::IpNet;
use k8s_openapi::api::networking::v1::Ingress;
use serde::Serialize;

use crate::annotations::{AnnotationParser, AnnotationValue, ParseError, get_string};
use crate::resolver::ConfigResolver;

const WHITELIST_SOURCE_RANGE: &str = "whitelist-source-range";

/// Allowed client networks, sorted and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceRange {
    pub cidrs: Vec<IpNet>,
}

pub struct WhitelistParser {
    resolver: Arc<dyn ConfigResolver>,
}

impl WhitelistParser {
    pub fn new(resolver: Arc<dyn ConfigResolver>) -> Self {
        Self { resolver }
    }
}

/// Parse one entry; a bare address becomes a host network.
fn parse_entry(entry: &str) -> Option<IpNet> {
    entry
        .parse::<IpNet>()
        .ok()
        .or_else(|| entry.parse::<IpAddr>().ok().map(IpNet::from))
}

impl AnnotationParser for WhitelistParser {
    fn parse(&self, ingress: &Ingress) -> Result<AnnotationValue, ParseError> {
        let raw = match get_string(ingress, WHITELIST_SOURCE_RANGE) {
            Ok(raw) => raw,
            Err(e) if e.is_missing() => {
                let defaults = self.resolver.default_backend().whitelist_source_range;
                if defaults.is_empty() {
                    return Err(e);
                }
                return Ok(AnnotationValue::SourceRange(SourceRange { cidrs: defaults }));
            }
            Err(e) => return Err(e),
        };

        let mut cidrs = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let net = parse_entry(entry).ok_or_else(|| {
                ParseError::invalid(
                    WHITELIST_SOURCE_RANGE,
                    format!("{entry:?} is not a CIDR or IP address"),
                )
            })?;
            cidrs.push(net.trunc());
        }
        if cidrs.is_empty() {
            return Err(ParseError::invalid(WHITELIST_SOURCE_RANGE, "no source ranges"));
        }
        cidrs.sort();
        cidrs.dedup();

        Ok(AnnotationValue::SourceRange(SourceRange { cidrs }))
    }
}
