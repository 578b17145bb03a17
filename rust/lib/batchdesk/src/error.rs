use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;
use crate::notify::Severity;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable identifiers for views and logs. Messages may be reworded; codes
// never change.

pub mod error_code {
    pub const GATE_BUSY: &str = "GATE_BUSY";
    pub const NETWORK: &str = "NETWORK";
    pub const SERVER_REJECTED: &str = "SERVER_REJECTED";
    pub const MALFORMED: &str = "MALFORMED";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const MISSING_FILTER: &str = "MISSING_FILTER";
    pub const CANCELLED: &str = "CANCELLED";
    pub const TIMEOUT: &str = "TIMEOUT";
}

// ── DeskError ───────────────────────────────────────────────────────

/// Failure of a user-triggered operation, as reported at its boundary.
///
/// Every variant ends in a notification and a released gate; none is fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeskError {
    /// Another guarded operation holds the gate. Nothing was sent.
    #[error("an operation is already in progress, wait for it to finish")]
    GateBusy,

    /// The request never completed.
    #[error("connection error: {0}")]
    Network(String),

    /// The server answered and reported failure.
    #[error("{0}")]
    ServerRejected(String),

    /// The server answered with a body of the wrong shape.
    #[error("unexpected server response: {0}")]
    Malformed(String),

    /// Input rejected client-side before any request was made.
    #[error("{0}")]
    Validation(String),

    /// A bulk delete was requested with no filter criteria.
    #[error("select at least one filter")]
    MissingFilter,

    /// Typed confirmation did not match; the operation was not started.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation did not finish in time and was abandoned.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: &'static str, after: Duration },
}

impl DeskError {
    pub fn error_code(&self) -> &'static str {
        match self {
            DeskError::GateBusy => error_code::GATE_BUSY,
            DeskError::Network(_) => error_code::NETWORK,
            DeskError::ServerRejected(_) => error_code::SERVER_REJECTED,
            DeskError::Malformed(_) => error_code::MALFORMED,
            DeskError::Validation(_) => error_code::VALIDATION_FAILED,
            DeskError::MissingFilter => error_code::MISSING_FILTER,
            DeskError::Cancelled => error_code::CANCELLED,
            DeskError::Timeout { .. } => error_code::TIMEOUT,
        }
    }

    /// Notification severity used when reporting this error.
    pub fn severity(&self) -> Severity {
        match self {
            DeskError::GateBusy | DeskError::MissingFilter => Severity::Warning,
            DeskError::Cancelled => Severity::Info,
            _ => Severity::Error,
        }
    }
}

impl From<ApiError> for DeskError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Network(msg) => DeskError::Network(msg),
            ApiError::Server { reason, .. } => DeskError::ServerRejected(reason),
            ApiError::Malformed(msg) => DeskError::Malformed(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping() {
        assert_eq!(DeskError::GateBusy.severity(), Severity::Warning);
        assert_eq!(DeskError::MissingFilter.severity(), Severity::Warning);
        assert_eq!(DeskError::Cancelled.severity(), Severity::Info);
        assert_eq!(DeskError::Network("x".into()).severity(), Severity::Error);
        assert_eq!(DeskError::Validation("x".into()).severity(), Severity::Error);
        assert_eq!(
            DeskError::Timeout { operation: "sync", after: Duration::from_secs(30) }.severity(),
            Severity::Error
        );
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(DeskError::GateBusy.error_code(), "GATE_BUSY");
        assert_eq!(DeskError::ServerRejected("x".into()).error_code(), "SERVER_REJECTED");
        assert_eq!(DeskError::Malformed("x".into()).error_code(), "MALFORMED");
        assert_eq!(DeskError::MissingFilter.error_code(), "MISSING_FILTER");
    }

    #[test]
    fn api_errors_convert_by_kind() {
        let e: DeskError = ApiError::Server { status: 404, reason: "Batch not found".into() }.into();
        assert_eq!(e, DeskError::ServerRejected("Batch not found".into()));

        let e: DeskError = ApiError::Network("refused".into()).into();
        assert_eq!(e.error_code(), "NETWORK");
    }

    #[test]
    fn timeout_message() {
        let e = DeskError::Timeout { operation: "upload", after: Duration::from_secs(30) };
        assert_eq!(e.to_string(), "upload timed out after 30s");
    }
}
