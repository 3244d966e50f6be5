//! Request classification.

use agrosentinel_transport::Request;

use crate::config::ArbiterConfig;

/// Resolution path chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Non-safe verb. Never cached.
    Write,
    /// Document load; falls back to the shell.
    Navigation,
    /// Cache-first.
    Static,
    /// Network-first.
    ApiRead,
}

/// Classify `request`, first match wins:
/// non-safe verb, navigation, static prefix, API prefix. Anything left over
/// is treated as a static asset.
pub fn classify(config: &ArbiterConfig, request: &Request) -> RequestClass {
    if !request.is_safe() {
        return RequestClass::Write;
    }

    let path = request.url.path();
    if request.is_navigation() || config.navigation_routes.iter().any(|r| r == path) {
        return RequestClass::Navigation;
    }
    if config
        .static_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
    {
        return RequestClass::Static;
    }
    if path.starts_with(config.api_prefix.as_str()) {
        return RequestClass::ApiRead;
    }
    RequestClass::Static
}
