//! Cache key normalization.
//!
//! Keys are case-insensitive: every key is lower-cased and prefixed with the
//! configured namespace before it reaches a store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A normalized cache key.
///
/// Only [`KeyNormalizer`] creates keys from application input, so holding a
/// `CacheKey` means the key was validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Returns the key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuilds a key that was normalized by another instance (backplane
    /// messages carry keys in their stored form).
    pub(crate) fn from_normalized(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalizes application keys into [`CacheKey`]s.
#[derive(Debug, Clone, Default)]
pub struct KeyNormalizer {
    prefix: Option<String>,
}

impl KeyNormalizer {
    /// Create a normalizer without a namespace prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a normalizer that prepends `prefix` to every key.
    ///
    /// An empty prefix is ignored.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
        }
    }

    /// The namespace prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Validate and normalize a key.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::InvalidKey` if the key is empty or whitespace only.
    pub fn normalize(&self, key: &str) -> Result<CacheKey, CacheError> {
        if key.trim().is_empty() {
            return Err(CacheError::invalid_key(
                "cache key cannot be empty or whitespace",
            ));
        }

        let folded = key.to_lowercase();
        Ok(match &self.prefix {
            Some(prefix) => CacheKey(format!("{prefix}{folded}")),
            None => CacheKey(folded),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_case() {
        let normalizer = KeyNormalizer::new();
        let upper = normalizer.normalize("Users:42").unwrap();
        let lower = normalizer.normalize("users:42").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "users:42");
    }

    #[test]
    fn test_normalize_applies_prefix_verbatim() {
        let normalizer = KeyNormalizer::with_prefix("App:");
        let key = normalizer.normalize("Session:ABC").unwrap();
        assert_eq!(key.as_str(), "App:session:abc");
        assert_eq!(normalizer.prefix(), Some("App:"));
    }

    #[test]
    fn test_empty_prefix_is_ignored() {
        let normalizer = KeyNormalizer::with_prefix("");
        assert_eq!(normalizer.prefix(), None);
        assert_eq!(normalizer.normalize("k").unwrap().as_str(), "k");
    }

    #[test]
    fn test_rejects_blank_keys() {
        let normalizer = KeyNormalizer::new();
        for key in ["", " ", "\t\n", "   \r "] {
            let err = normalizer.normalize(key).unwrap_err();
            assert!(err.is_invalid_key(), "{key:?} should be rejected");
        }
    }

    #[test]
    fn test_keeps_inner_whitespace() {
        let normalizer = KeyNormalizer::new();
        let key = normalizer.normalize(" A b ").unwrap();
        assert_eq!(key.as_str(), " a b ");
    }
}
