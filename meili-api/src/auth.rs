//! Api key handling.
//!
//! Meilisearch authenticates every request with `Authorization: Bearer <key>`.
//! The key is wiped from memory when dropped and never printed.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Meilisearch api key (master key, admin key, or a scoped key).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Adds the bearer authorization header to a request.
    pub(crate) fn set_auth_header(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let key = ApiKey::new("super-secret");
        let text = format!("{key:?}");
        assert!(!text.contains("super-secret"));
        assert!(text.contains("redacted"));
    }

    #[test]
    fn whitespace_key_is_empty() {
        assert!(ApiKey::new("  ").is_empty());
        assert!(!ApiKey::new("k").is_empty());
    }
}
