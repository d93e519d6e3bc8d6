//! Connection authentication.
//!
//! The core treats authorization as a boolean fact about a presented
//! token; how tokens are issued and stored lives outside this crate. The
//! token arrives either as a `?token=` query parameter or as a bearer
//! `Authorization` header.

use std::sync::Arc;

/// Decides whether a presented token identifies an authorized principal.
pub trait Authenticator: Send + Sync {
    /// Returns true if the token is valid.
    fn verify(&self, token: &str) -> bool;
}

/// Authenticator backed by the single access token from the daemon
/// configuration.
pub struct StaticTokenAuthenticator {
    token: String,
}

impl StaticTokenAuthenticator {
    /// Creates an authenticator accepting exactly the given token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Convenience constructor returning a shareable trait object.
    pub fn shared(token: impl Into<String>) -> Arc<dyn Authenticator> {
        Arc::new(Self::new(token))
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn verify(&self, token: &str) -> bool {
        !self.token.is_empty() && self.token == token
    }
}

/// Extracts the access token from a request.
///
/// The query parameter takes precedence over the bearer header.
pub fn extract_token(query: Option<&str>, auth_header: Option<&str>) -> Option<String> {
    if let Some(token) = query.and_then(token_from_query) {
        return Some(token);
    }

    auth_header.and_then(token_from_bearer)
}

/// Finds `token=...` in a raw query string.
fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        let value = parts.next()?;
        if key == "token" {
            Some(value.to_string())
        } else {
            None
        }
    })
}

/// Strips the `Bearer ` prefix from an Authorization header value.
fn token_from_bearer(header_value: &str) -> Option<String> {
    header_value
        .strip_prefix("Bearer ")
        .map(|token| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_token_verify() {
        let auth = StaticTokenAuthenticator::new("secret");
        assert!(auth.verify("secret"));
        assert!(!auth.verify("wrong"));
        assert!(!auth.verify(""));
    }

    #[test]
    fn test_empty_configured_token_rejects_everything() {
        let auth = StaticTokenAuthenticator::new("");
        assert!(!auth.verify(""));
        assert!(!auth.verify("anything"));
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(
            extract_token(Some("token=abc123"), None),
            Some("abc123".to_string())
        );
        assert_eq!(
            extract_token(Some("foo=1&token=abc123&bar=2"), None),
            Some("abc123".to_string())
        );
        assert_eq!(extract_token(Some("foo=1&bar=2"), None), None);
        assert_eq!(extract_token(Some(""), None), None);
    }

    #[test]
    fn test_token_from_bearer_header() {
        assert_eq!(
            extract_token(None, Some("Bearer abc123")),
            Some("abc123".to_string())
        );
        assert_eq!(extract_token(None, Some("Basic abc123")), None);
        assert_eq!(extract_token(None, None), None);
    }

    #[test]
    fn test_query_takes_precedence_over_header() {
        assert_eq!(
            extract_token(Some("token=from_query"), Some("Bearer from_header")),
            Some("from_query".to_string())
        );
    }
}
