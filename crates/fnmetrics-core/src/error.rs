//! Shared error type across fnmetrics crates.

use thiserror::Error;

/// Stable error codes (safe to log and match on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The metrics backend refused to create an instrument.
    RegistrationRejected,
    /// Invalid configuration.
    BadConfig,
    /// Unsupported config schema version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and test assertions.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::RegistrationRejected => "REGISTRATION_REJECTED",
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Unified error type used by core and exporter.
///
/// These are telemetry-layer errors only. Errors returned by instrumented
/// functions never pass through this type.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("instrument {name} rejected: {reason}")]
    Rejected { name: String, reason: String },
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl MetricsError {
    /// Shorthand for a backend rejection.
    pub fn rejected(name: impl Into<String>, reason: impl Into<String>) -> Self {
        MetricsError::Rejected {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MetricsError::Rejected { .. } => ErrorCode::RegistrationRejected,
            MetricsError::BadConfig(_) => ErrorCode::BadConfig,
            MetricsError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            MetricsError::Internal(_) => ErrorCode::Internal,
        }
    }
}
