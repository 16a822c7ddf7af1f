//! Error types for the fetch module.
//!
//! Every failure the engine reasons about is a [`FetchError`] carrying a closed
//! [`ErrorKind`]. Retry and abort decisions dispatch on the kind; nothing inspects
//! error messages after classification.

use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Which request field a `wrong_parameter` response complained about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParameterErrorKind {
    /// Page number or page size outside the accepted range.
    InvalidPage,
    /// Unknown or malformed genre identifier.
    InvalidGenre,
    /// Demographic or period filter rejected (age, sex, period).
    InvalidFilter,
    /// Some other parameter was rejected.
    Other,
}

impl ParameterErrorKind {
    /// Returns the stable label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPage => "invalid_page",
            Self::InvalidGenre => "invalid_genre",
            Self::InvalidFilter => "invalid_filter",
            Self::Other => "other",
        }
    }
}

/// Closed taxonomy of fetch failures.
///
/// | Kind | Retryable | Fatal |
/// |------|-----------|-------|
/// | `Network`, `Connection`, `Timeout` | yes | no |
/// | `RateLimit` | yes | no |
/// | `Authentication` | no | yes |
/// | `Parameter(_)` | no | yes |
/// | `ResponseFormat`, `DataParsing` | no | yes |
/// | `System` | yes | no |
/// | `UnknownHttp` | no | no |
/// | `Unknown` | no | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// Generic network failure (DNS, socket).
    Network,
    /// Connection refused or reset.
    Connection,
    /// Request timed out.
    Timeout,
    /// Upstream rate limiting (HTTP 429).
    RateLimit,
    /// Credentials missing or rejected (HTTP 401/403).
    Authentication,
    /// Request parameter rejected (HTTP 400 `wrong_parameter`).
    Parameter(ParameterErrorKind),
    /// Response body lacks the expected structure.
    ResponseFormat,
    /// Response body could not be parsed at all.
    DataParsing,
    /// Upstream server error (HTTP 5xx).
    System,
    /// Non-success HTTP status not covered by another kind.
    UnknownHttp,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are worth retrying by default.
    #[must_use]
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Connection | Self::Timeout | Self::RateLimit | Self::System
        )
    }

    /// Whether failures of this kind abort a batch when `stop_on_fatal_error` is set.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::Parameter(_) | Self::ResponseFormat | Self::DataParsing
        )
    }

    /// Returns the stable label used in logs, metrics, and JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::Parameter(ParameterErrorKind::InvalidPage) => "parameter.invalid_page",
            Self::Parameter(ParameterErrorKind::InvalidGenre) => "parameter.invalid_genre",
            Self::Parameter(ParameterErrorKind::InvalidFilter) => "parameter.invalid_filter",
            Self::Parameter(ParameterErrorKind::Other) => "parameter.other",
            Self::ResponseFormat => "response_format",
            Self::DataParsing => "data_parsing",
            Self::System => "system",
            Self::UnknownHttp => "unknown_http",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Serialized as the label so kinds can key JSON maps.
impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A classified fetch failure.
///
/// Built through [`FetchError::new`] and the consuming `with_*` methods; there
/// are no setters, so a constructed error never changes.
#[derive(Debug, Clone, Error, Serialize)]
#[error("[{kind}] {message}")]
pub struct FetchError {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_payload: Option<serde_json::Value>,
    #[source]
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<Box<FetchError>>,
}

impl FetchError {
    /// Creates an error whose retryability follows [`ErrorKind::default_retryable`].
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retryable: kind.default_retryable(),
            raw_payload: None,
            cause: None,
        }
    }

    /// Creates an error for an HTTP status response.
    pub fn http(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self::new(kind, message).with_status(status)
    }

    /// Attaches the HTTP status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Overrides the kind's default retryability.
    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attaches the raw response payload for diagnostics.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = Some(payload);
        self
    }

    /// Attaches the error that caused this one.
    #[must_use]
    pub fn with_cause(mut self, cause: FetchError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status code, if the failure came from an HTTP response.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Whether this error may be retried.
    ///
    /// Fatal kinds are never retryable, whatever was passed to
    /// [`with_retryable`](Self::with_retryable).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable && !self.kind.is_fatal()
    }

    /// Whether this error aborts a batch under `stop_on_fatal_error`.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Raw response payload, if one was captured.
    #[must_use]
    pub fn raw_payload(&self) -> Option<&serde_json::Value> {
        self.raw_payload.as_ref()
    }

    /// The underlying error, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&FetchError> {
        self.cause.as_deref()
    }
}

/// An unclassified failure signal as produced by a page source.
///
/// Convert into a [`FetchError`] with `.into()` (or `?`); conversion runs the
/// classifier in [`super::classify`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawFailure {
    /// Non-success HTTP response.
    Http {
        /// Status code.
        status: u16,
        /// Response body, when it could be read.
        body: Option<String>,
    },
    /// Failure below HTTP (DNS, socket, TLS, timeout).
    Transport {
        /// Transport error message.
        message: String,
    },
    /// Parsed JSON that does not have the expected shape.
    Malformed {
        /// What was wrong with the payload.
        detail: String,
        /// The offending payload.
        payload: Option<serde_json::Value>,
    },
    /// Body that is not valid JSON.
    Unparseable {
        /// Parser error message.
        detail: String,
    },
    /// Anything else.
    Other {
        /// Error message.
        message: String,
    },
}

impl RawFailure {
    /// Creates an HTTP failure signal.
    pub fn http(status: u16, body: Option<String>) -> Self {
        Self::Http { status, body }
    }

    /// Creates a transport failure signal.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

impl From<RawFailure> for FetchError {
    fn from(failure: RawFailure) -> Self {
        super::classify::classify(&failure)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_retryable_defaults_follow_kind() {
        assert!(FetchError::new(ErrorKind::Network, "x").is_retryable());
        assert!(FetchError::new(ErrorKind::RateLimit, "x").is_retryable());
        assert!(FetchError::new(ErrorKind::System, "x").is_retryable());
        assert!(!FetchError::new(ErrorKind::UnknownHttp, "x").is_retryable());
        assert!(!FetchError::new(ErrorKind::Unknown, "x").is_retryable());
    }

    #[test]
    fn test_retryable_override() {
        let error = FetchError::new(ErrorKind::Unknown, "flaky").with_retryable(true);
        assert!(error.is_retryable());

        let error = FetchError::new(ErrorKind::Timeout, "give up").with_retryable(false);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_fatal_kind_never_retryable() {
        let error = FetchError::new(ErrorKind::Authentication, "denied").with_retryable(true);
        assert!(!error.is_retryable());
        assert!(error.is_fatal());
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ErrorKind::Authentication.is_fatal());
        assert!(ErrorKind::Parameter(ParameterErrorKind::InvalidFilter).is_fatal());
        assert!(ErrorKind::ResponseFormat.is_fatal());
        assert!(ErrorKind::DataParsing.is_fatal());
        assert!(!ErrorKind::System.is_fatal());
        assert!(!ErrorKind::Unknown.is_fatal());
        assert!(!ErrorKind::UnknownHttp.is_fatal());
    }

    #[test]
    fn test_display_includes_kind_and_message() {
        let error = FetchError::http(ErrorKind::System, 503, "HTTP 503 from upstream");
        let msg = error.to_string();
        assert!(msg.contains("system"), "Expected kind in: {msg}");
        assert!(msg.contains("HTTP 503"), "Expected message in: {msg}");
        assert_eq!(error.status_code(), Some(503));
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let inner = FetchError::new(ErrorKind::Timeout, "read timed out");
        let outer = FetchError::new(ErrorKind::Unknown, "wrapped").with_cause(inner);
        assert_eq!(outer.cause().unwrap().kind(), ErrorKind::Timeout);
        assert!(outer.source().is_some());
    }

    #[test]
    fn test_kind_serializes_as_label() {
        let json = serde_json::to_string(&ErrorKind::Parameter(ParameterErrorKind::InvalidPage))
            .unwrap();
        assert_eq!(json, "\"parameter.invalid_page\"");
    }

    #[test]
    fn test_error_serializes_without_empty_fields() {
        let error = FetchError::new(ErrorKind::Timeout, "timed out");
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["kind"], "timeout");
        assert_eq!(value["retryable"], true);
        assert!(value.get("status_code").is_none());
        assert!(value.get("cause").is_none());
    }
}
