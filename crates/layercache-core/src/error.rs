//! Error types shared by every cache tier.
//!
//! Read-path failures in intermediate tiers are usually recovered by the
//! orchestrator; this module only describes what can go wrong, the policy of
//! what propagates lives in the engine.

use std::fmt;

/// Errors that can occur while resolving, persisting or invalidating values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// No tier and no data source produced a value for the key.
    #[error("Failed to resolve value for key \"{key}\"")]
    NotFound {
        /// The key that stayed unresolved.
        key: String,
    },

    /// A batch lookup left some keys unresolved.
    #[error("Failed to resolve values for keys: {}", keys.join(", "))]
    NotFoundMany {
        /// Every key that stayed unresolved, in request order.
        keys: Vec<String>,
    },

    /// A data source failed while loading a key.
    #[error("Data source \"{loader}\" failed to load \"{key}\": {message}")]
    Load {
        /// Name of the data source that failed.
        loader: String,
        /// The key (or comma separated keys) being loaded.
        key: String,
        /// Rendered error chain of the underlying failure.
        message: String,
    },

    /// A tier failed to persist or invalidate a value.
    #[error("Failed to update {tier} cache: {message}")]
    CacheUpdate {
        /// Name of the tier that failed.
        tier: String,
        /// Description of the failure.
        message: String,
    },

    /// A remote store operation did not finish before its deadline.
    #[error("Remote operation \"{operation}\" timed out after {timeout_ms}ms")]
    RemoteTimeout {
        /// The remote operation that timed out.
        operation: String,
        /// The configured deadline.
        timeout_ms: u64,
    },

    /// Invalid construction or a lifecycle misuse.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the misconfiguration.
        message: String,
    },

    /// The remote store could not be reached or rejected a command.
    #[error("Remote store error: {message}")]
    Remote {
        /// Description of the remote failure.
        message: String,
    },

    /// A value or notification could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the codec failure.
        message: String,
    },

    /// An internal invariant was broken (e.g. a load task panicked).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `NotFoundMany` error.
    #[must_use]
    pub fn not_found_many(keys: Vec<String>) -> Self {
        Self::NotFoundMany { keys }
    }

    /// Creates a new `Load` error from a data source failure.
    ///
    /// The whole `anyhow` context chain is kept in the message.
    #[must_use]
    pub fn load(loader: impl Into<String>, key: impl Into<String>, source: &anyhow::Error) -> Self {
        Self::Load {
            loader: loader.into(),
            key: key.into(),
            message: format!("{source:#}"),
        }
    }

    /// Creates a new `CacheUpdate` error.
    #[must_use]
    pub fn cache_update(tier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CacheUpdate {
            tier: tier.into(),
            message: message.into(),
        }
    }

    /// Creates a new `RemoteTimeout` error.
    #[must_use]
    pub fn remote_timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RemoteTimeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Remote` error.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the value (or any of the values) stayed unresolved.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotFoundMany { .. })
    }

    /// Returns `true` if a data source failed.
    #[must_use]
    pub fn is_load_error(&self) -> bool {
        matches!(self, Self::Load { .. })
    }

    /// Returns `true` if a remote deadline elapsed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RemoteTimeout { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::NotFoundMany { .. } => ErrorCategory::NotFound,
            Self::Load { .. } => ErrorCategory::Load,
            Self::CacheUpdate { .. } => ErrorCategory::CacheUpdate,
            Self::RemoteTimeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Remote { .. } | Self::Serialization { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Value unresolved.
    NotFound,
    /// Data source failure.
    Load,
    /// Tier write-back failure.
    CacheUpdate,
    /// Remote deadline exceeded.
    Timeout,
    /// Invalid construction.
    Configuration,
    /// Connection or codec failure.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Load => write!(f, "load"),
            Self::CacheUpdate => write!(f, "cache_update"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::not_found("user:1");
        assert_eq!(err.to_string(), "Failed to resolve value for key \"user:1\"");

        let err = CacheError::not_found_many(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Failed to resolve values for keys: a, b");

        let err = CacheError::remote_timeout("get", 250);
        assert_eq!(
            err.to_string(),
            "Remote operation \"get\" timed out after 250ms"
        );
    }

    #[test]
    fn test_load_error_keeps_context_chain() {
        let source = anyhow::anyhow!("connection refused").context("query users");
        let err = CacheError::load("postgres", "u1", &source);
        assert_eq!(
            err.to_string(),
            "Data source \"postgres\" failed to load \"u1\": query users: connection refused"
        );
        assert!(err.is_load_error());
    }

    #[test]
    fn test_error_predicates() {
        assert!(CacheError::not_found("k").is_not_found());
        assert!(CacheError::not_found_many(vec![]).is_not_found());
        assert!(!CacheError::remote("down").is_not_found());
        assert!(CacheError::remote_timeout("set", 10).is_timeout());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            CacheError::not_found("k").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            CacheError::cache_update("remote", "boom").category(),
            ErrorCategory::CacheUpdate
        );
        assert_eq!(
            CacheError::serialization("bad json").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(ErrorCategory::Timeout.to_string(), "timeout");
    }
}
