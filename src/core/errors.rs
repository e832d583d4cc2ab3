//! PCH-prefixed error types with structured error codes.
//!
//! The 4xxx range is the conformance taxonomy: assertion mismatch, timeout,
//! propagated platform failure, and environment skip. Keeping timeouts apart
//! from assertions lets a failure report say "never happened" instead of
//! "happened with the wrong value".

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PchError>;

/// Top-level error type for the conformance harness.
#[derive(Debug, Error)]
pub enum PchError {
    #[error("[PCH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PCH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PCH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PCH-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[PCH-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[PCH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PCH-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[PCH-3900] runtime failure: {details}")]
    Runtime { details: String },

    #[error("[PCH-4001] assertion failed: {message}")]
    Assertion { message: String },

    #[error("[PCH-4002] timed out after {waited_ms}ms (budget {budget_ms}ms) waiting for {condition}")]
    Timeout {
        condition: String,
        waited_ms: u64,
        budget_ms: u64,
    },

    #[error("[PCH-4003] platform failure in {operation}: {details}")]
    Platform {
        operation: String,
        details: String,
    },

    #[error("[PCH-4004] skipped: required capability {capability} is not available")]
    Skipped { capability: String },
}

impl PchError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "PCH-1001",
            Self::MissingConfig { .. } => "PCH-1002",
            Self::ConfigParse { .. } => "PCH-1003",
            Self::Serialization { .. } => "PCH-2101",
            Self::Sql { .. } => "PCH-2102",
            Self::Io { .. } => "PCH-3002",
            Self::ChannelClosed { .. } => "PCH-3003",
            Self::Runtime { .. } => "PCH-3900",
            Self::Assertion { .. } => "PCH-4001",
            Self::Timeout { .. } => "PCH-4002",
            Self::Platform { .. } => "PCH-4003",
            Self::Skipped { .. } => "PCH-4004",
        }
    }

    /// A bounded wait or poll ran out of budget.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// An observed value did not match the expectation.
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion { .. })
    }

    /// Early, non-failing exit because a capability is missing.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for assertion failures.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Wrap a failure reported by the platform under test.
    #[must_use]
    pub fn platform(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        Self::Platform {
            operation: operation.into(),
            details: details.to_string(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for PchError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for PchError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
