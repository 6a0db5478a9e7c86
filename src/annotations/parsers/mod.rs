//! Built-in annotation parsers and the default registry.

mod auth;
mod auth_req;
mod auth_tls;
mod flags;
mod health_check;
mod ip_whitelist;
mod proxy;
mod rate_limit;
mod rewrite;
mod session_affinity;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub use auth::{BasicDigestAuth, BasicDigestAuthParser};
pub use auth_req::{ExternalAuth, ExternalAuthParser};
pub use auth_tls::{CertificateAuth, CertificateAuthParser};
pub(crate) use auth_tls::AUTH_TLS_SECRET;
pub use flags::{FlagParser, PortInRedirectParser, SnippetParser};
pub use health_check::{HealthCheckParser, Upstream};
pub use ip_whitelist::{SourceRange, WhitelistParser};
pub use proxy::{ProxyConfig, ProxyParser};
pub use rate_limit::{RateLimit, RateLimitParser, Zone};
pub use rewrite::{Redirect, RedirectParser};
pub use session_affinity::{AffinityConfig, CookieConfig, SessionAffinityParser};

use super::AnnotationParser;
use crate::resolver::ConfigResolver;

// Registry keys. Snapshot entries are stored under these names.
pub const BASIC_DIGEST_AUTH: &str = "BasicDigestAuth";
pub const EXTERNAL_AUTH: &str = "ExternalAuth";
pub const CERTIFICATE_AUTH: &str = "CertificateAuth";
pub const ENABLE_CORS: &str = "EnableCORS";
pub const HEALTH_CHECK: &str = "HealthCheck";
pub const WHITELIST: &str = "Whitelist";
pub const USE_PORT_IN_REDIRECTS: &str = "UsePortInRedirects";
pub const PROXY: &str = "Proxy";
pub const RATE_LIMIT: &str = "RateLimit";
pub const REDIRECT: &str = "Redirect";
pub const SECURE_UPSTREAM: &str = "SecureUpstream";
pub const SESSION_AFFINITY: &str = "SessionAffinity";
pub const SSL_PASSTHROUGH: &str = "SSLPassthrough";
pub const CONFIGURATION_SNIPPET: &str = "ConfigurationSnippet";

/// Parsers keyed by registry name. Iteration order is the key order.
pub type ParserRegistry = BTreeMap<String, Box<dyn AnnotationParser>>;

/// The full set of built-in parsers.
pub fn default_registry(
    resolver: Arc<dyn ConfigResolver>,
    auth_directory: impl Into<PathBuf>,
) -> ParserRegistry {
    let mut registry = ParserRegistry::new();
    register(
        &mut registry,
        BASIC_DIGEST_AUTH,
        BasicDigestAuthParser::new(resolver.clone(), auth_directory),
    );
    register(&mut registry, EXTERNAL_AUTH, ExternalAuthParser);
    register(
        &mut registry,
        CERTIFICATE_AUTH,
        CertificateAuthParser::new(resolver.clone()),
    );
    register(&mut registry, ENABLE_CORS, FlagParser::cors());
    register(&mut registry, HEALTH_CHECK, HealthCheckParser::new(resolver.clone()));
    register(&mut registry, WHITELIST, WhitelistParser::new(resolver.clone()));
    register(
        &mut registry,
        USE_PORT_IN_REDIRECTS,
        PortInRedirectParser::new(resolver.clone()),
    );
    register(&mut registry, PROXY, ProxyParser::new(resolver.clone()));
    register(&mut registry, RATE_LIMIT, RateLimitParser);
    register(&mut registry, REDIRECT, RedirectParser::new(resolver));
    register(&mut registry, SECURE_UPSTREAM, FlagParser::secure_upstream());
    register(&mut registry, SESSION_AFFINITY, SessionAffinityParser);
    register(&mut registry, SSL_PASSTHROUGH, FlagParser::ssl_passthrough());
    register(&mut registry, CONFIGURATION_SNIPPET, SnippetParser);
    registry
}

fn register(
    registry: &mut ParserRegistry,
    name: &str,
    parser: impl AnnotationParser + 'static,
) {
    registry.insert(name.to_string(), Box::new(parser));
}
