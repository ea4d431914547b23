//! Cache error types.
//!
//! `CacheError` is `Clone` because a single population result is handed to
//! every caller waiting on the same key.

use std::fmt;
use std::sync::Arc;

/// Boxed error produced by caller-supplied factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The cache key was empty or contained only whitespace.
    #[error("Invalid cache key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// A local-tier factory produced no value.
    #[error("Cache factory returned no value for key '{key}'")]
    NullResult {
        /// The normalized key being created.
        key: String,
    },

    /// A local-tier value was stored with a different type than requested.
    #[error("Cached value for key '{key}' is not a {expected}")]
    TypeMismatch {
        /// The normalized key.
        key: String,
        /// The requested type name.
        expected: &'static str,
    },

    /// The population factory failed and no stale value could mask it.
    #[error("Population failed for key '{key}': {source}")]
    Population {
        /// The normalized key being populated.
        key: String,
        /// The factory's error.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The operation observed a cancelled token.
    #[error("Cache operation cancelled")]
    Cancelled,

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the codec failure.
        message: String,
    },

    /// The local (in-process) tier failed.
    #[error("Local tier error: {message}")]
    Local {
        /// Description of the failure.
        message: String,
    },

    /// The distributed (authoritative) tier failed.
    #[error("Distributed tier error: {message}")]
    Distributed {
        /// Description of the failure.
        message: String,
    },

    /// Publishing to or subscribing on the backplane failed.
    #[error("Backplane error: {message}")]
    Backplane {
        /// Description of the failure.
        message: String,
    },

    /// The population resource scope could not be created.
    #[error("Scope error: {message}")]
    Scope {
        /// Description of the failure.
        message: String,
    },

    /// Configuration was invalid or could not be loaded.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the failure.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Creates a new `NullResult` error.
    #[must_use]
    pub fn null_result(key: impl Into<String>) -> Self {
        Self::NullResult { key: key.into() }
    }

    /// Creates a new `Population` error from a factory failure.
    #[must_use]
    pub fn population(key: impl Into<String>, source: BoxError) -> Self {
        Self::Population {
            key: key.into(),
            source: Arc::from(source),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Local` error.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self::Local {
            message: message.into(),
        }
    }

    /// Creates a new `Distributed` error.
    #[must_use]
    pub fn distributed(message: impl Into<String>) -> Self {
        Self::Distributed {
            message: message.into(),
        }
    }

    /// Creates a new `Backplane` error.
    #[must_use]
    pub fn backplane(message: impl Into<String>) -> Self {
        Self::Backplane {
            message: message.into(),
        }
    }

    /// Creates a new `Scope` error.
    #[must_use]
    pub fn scope(message: impl Into<String>) -> Self {
        Self::Scope {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if this is an invalid key error.
    #[must_use]
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, Self::InvalidKey { .. })
    }

    /// Returns `true` if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if a population factory failed.
    #[must_use]
    pub fn is_population(&self) -> bool {
        matches!(self, Self::Population { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidKey { .. } | Self::Configuration { .. } => ErrorCategory::Contract,
            Self::NullResult { .. } | Self::TypeMismatch { .. } | Self::Population { .. } => {
                ErrorCategory::Factory
            }
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::Local { .. }
            | Self::Distributed { .. }
            | Self::Backplane { .. }
            | Self::Scope { .. } => ErrorCategory::Infrastructure,
        }
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller broke the API contract (bad key, bad config).
    Contract,
    /// A factory failed or produced nothing usable.
    Factory,
    /// The operation was cancelled.
    Cancelled,
    /// Encoding or decoding failed.
    Serialization,
    /// A tier or transport failed.
    Infrastructure,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contract => write!(f, "contract"),
            Self::Factory => write!(f, "factory"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Serialization => write!(f, "serialization"),
            Self::Infrastructure => write!(f, "infrastructure"),
        }
    }
}
