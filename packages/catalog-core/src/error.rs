//! Shared error taxonomy for the catalog SDK (spec §7).
//!
//! Every layer of the client — HTTP, cache, repositories, prefetch — reports
//! failures through [`ApiError`]. The [`ErrorKind`] is a closed set; callers
//! match on it rather than on message text.

use std::fmt;

/// Closed set of error categories surfaced to SDK callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Cancelled,
    InvalidArgument,
    PreconditionFailed,
    NotFound,
    NetworkConnection,
    AuthenticationError,
    AccessDenied,
    ServiceUnavailable,
    Unknown,
}

impl ErrorKind {
    /// Maps an HTTP status code (as returned by a transport) to a kind,
    /// per the default retry/translation rules in spec §4.1/§7.
    #[must_use]
    pub fn from_http_status(status: i32) -> Self {
        match status {
            404 => ErrorKind::NotFound,
            401 => ErrorKind::AuthenticationError,
            403 => ErrorKind::AccessDenied,
            408 | 429 | 500..=599 => ErrorKind::ServiceUnavailable,
            _ if status < 0 => ErrorKind::NetworkConnection,
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::PreconditionFailed => "precondition failed",
            ErrorKind::NotFound => "not found",
            ErrorKind::NetworkConnection => "network connection",
            ErrorKind::AuthenticationError => "authentication error",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::ServiceUnavailable => "service unavailable",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A catalog-SDK error: a [`ErrorKind`], an HTTP-status-like integer (may be
/// a negative transport code, see [`crate::http_status`]), and a message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} ({status}): {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: i32,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ErrorKind, status: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(
            ErrorKind::Cancelled,
            http_status::CANCELLED,
            "operation was cancelled",
        )
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, 400, message)
    }

    #[must_use]
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, 412, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, 404, message)
    }

    #[must_use]
    pub fn from_http(status: i32, body: impl Into<String>) -> Self {
        let kind = ErrorKind::from_http_status(status);
        Self::new(kind, status, body)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Negative transport-error status codes (spec §4.1). Mirrors the source
/// SDK's `NetworkResponse` negative-status convention — these occupy a
/// range disjoint from any valid HTTP status.
pub mod http_status {
    pub const IO: i32 = -1;
    pub const CANCELLED: i32 = -2;
    pub const TIMEOUT: i32 = -3;
    pub const AUTH: i32 = -4;
    pub const NETWORK_OVERLOAD: i32 = -5;
    pub const OFFLINE: i32 = -6;
    pub const UNKNOWN: i32 = -7;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_http_status_maps_known_codes() {
        assert_eq!(ErrorKind::from_http_status(404), ErrorKind::NotFound);
        assert_eq!(ErrorKind::from_http_status(429), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_http_status(500), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_http_status(599), ErrorKind::ServiceUnavailable);
        assert_eq!(ErrorKind::from_http_status(401), ErrorKind::AuthenticationError);
        assert_eq!(ErrorKind::from_http_status(403), ErrorKind::AccessDenied);
        assert_eq!(
            ErrorKind::from_http_status(http_status::IO),
            ErrorKind::NetworkConnection
        );
        assert_eq!(ErrorKind::from_http_status(200), ErrorKind::Unknown);
    }

    #[test]
    fn cancelled_error_is_cancelled() {
        let err = ApiError::cancelled();
        assert!(err.is_cancelled());
        assert_eq!(err.status, http_status::CANCELLED);
    }
}
