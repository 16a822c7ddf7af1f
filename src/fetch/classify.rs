//! Classification of raw failure signals into [`FetchError`]s.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! | Signal | Kind |
//! |--------|------|
//! | HTTP 401, 403 | `Authentication` |
//! | HTTP 429 | `RateLimit` |
//! | HTTP 400 with a `wrong_parameter` body | `Parameter(_)` |
//! | HTTP 5xx | `System` |
//! | Other non-2xx | `UnknownHttp` |
//! | Transport message mentioning a timeout | `Timeout` |
//! | Transport message mentioning a connection problem | `Connection` |
//! | Transport message mentioning a network problem | `Network` |
//! | Payload that is not an object or lacks the item collection | `ResponseFormat` |
//! | Body that is not JSON | `DataParsing` |
//! | Anything else | `Unknown` |
//!
//! Every function here is pure: the same signal always yields the same kind
//! and retryability.

use serde_json::{Map, Value};
use tracing::instrument;

use super::error::{ErrorKind, FetchError, ParameterErrorKind, RawFailure};

/// `error` value the upstream uses for rejected request parameters.
const WRONG_PARAMETER: &str = "wrong_parameter";

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "etimedout", "deadline"];

const CONNECTION_MARKERS: &[&str] = &[
    "connection",
    "connect",
    "econnrefused",
    "econnreset",
    "broken pipe",
];

const NETWORK_MARKERS: &[&str] = &[
    "network",
    "dns",
    "enotfound",
    "eai_again",
    "socket",
    "unreachable",
];

/// Classifies a raw failure signal.
#[must_use]
pub fn classify(failure: &RawFailure) -> FetchError {
    match failure {
        RawFailure::Http { status, body } => classify_http_status(*status, body.as_deref()),
        RawFailure::Transport { message } => classify_transport(message),
        RawFailure::Malformed { detail, payload } => {
            let error = FetchError::new(ErrorKind::ResponseFormat, detail.clone());
            match payload {
                Some(payload) => error.with_payload(payload.clone()),
                None => error,
            }
        }
        RawFailure::Unparseable { detail } => FetchError::new(
            ErrorKind::DataParsing,
            format!("response body is not valid JSON: {detail}"),
        ),
        RawFailure::Other { message } => FetchError::new(ErrorKind::Unknown, message.clone()),
    }
}

/// A 2xx ranking response split into its item array and the remaining fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBody {
    /// The array found at the item field.
    pub items: Vec<Value>,
    /// Every other top-level field, such as the total-count hint.
    pub fields: Map<String, Value>,
}

/// Parses a complete HTTP response into a [`PageBody`].
///
/// # Errors
///
/// Returns the classified error for a non-2xx status, a body that is not
/// JSON, or a JSON body that is not an object carrying an array at
/// `items_field`.
#[instrument(level = "debug", skip(body), fields(body_len = body.len()))]
pub fn parse_response(
    status: u16,
    body: &str,
    items_field: &str,
) -> Result<PageBody, FetchError> {
    if !(200..300).contains(&status) {
        return Err(classify_http_status(status, Some(body)));
    }

    let payload = serde_json::from_str::<Value>(body).map_err(|error| {
        classify(&RawFailure::Unparseable {
            detail: error.to_string(),
        })
    })?;
    split_items(payload, items_field)
}

/// Classifies a complete HTTP response.
///
/// Returns `None` when the response is a 2xx JSON object carrying an array at
/// `items_field`; otherwise returns the classified error.
#[must_use]
pub fn classify_response(status: u16, body: &str, items_field: &str) -> Option<FetchError> {
    parse_response(status, body, items_field).err()
}

fn split_items(payload: Value, items_field: &str) -> Result<PageBody, FetchError> {
    let mut fields = match payload {
        Value::Object(fields) => fields,
        other => {
            return Err(malformed(
                "response body is not a JSON object".to_string(),
                other,
            ));
        }
    };

    match fields.remove(items_field) {
        Some(Value::Array(items)) => Ok(PageBody { items, fields }),
        Some(other) => {
            fields.insert(items_field.to_string(), other);
            Err(malformed(
                format!("`{items_field}` is not an array"),
                Value::Object(fields),
            ))
        }
        None => Err(malformed(
            format!("response is missing `{items_field}`"),
            Value::Object(fields),
        )),
    }
}

fn malformed(detail: String, payload: Value) -> FetchError {
    classify(&RawFailure::Malformed {
        detail,
        payload: Some(payload),
    })
}

/// Classifies a non-success HTTP status.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16, body: Option<&str>) -> FetchError {
    let payload = body.and_then(|raw| serde_json::from_str::<Value>(raw).ok());

    let error = match status {
        401 | 403 => FetchError::http(
            ErrorKind::Authentication,
            status,
            format!("HTTP {status}: credentials rejected"),
        ),
        429 => FetchError::http(
            ErrorKind::RateLimit,
            status,
            "HTTP 429: rate limit exceeded",
        ),
        400 => match payload.as_ref().and_then(wrong_parameter_description) {
            Some(description) => FetchError::http(
                ErrorKind::Parameter(parameter_kind(description)),
                status,
                format!("HTTP 400: {description}"),
            ),
            None => FetchError::http(ErrorKind::UnknownHttp, status, "HTTP 400: bad request"),
        },
        s if s >= 500 => FetchError::http(
            ErrorKind::System,
            status,
            format!("HTTP {status}: upstream server error"),
        ),
        _ => FetchError::http(
            ErrorKind::UnknownHttp,
            status,
            format!("HTTP {status}: unexpected status"),
        ),
    };

    match payload {
        Some(payload) => error.with_payload(payload),
        None => error,
    }
}

/// Returns the description of a `wrong_parameter` error body.
fn wrong_parameter_description(payload: &Value) -> Option<&str> {
    let object = payload.as_object()?;
    if object.get("error")?.as_str()? != WRONG_PARAMETER {
        return None;
    }
    Some(
        object
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(WRONG_PARAMETER),
    )
}

/// Picks the parameter subtype from the field named in the description.
fn parameter_kind(description: &str) -> ParameterErrorKind {
    let lowered = description.to_ascii_lowercase();
    let mentions = |field: &str| {
        lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == field)
    };

    if mentions("genreid") || mentions("genre") {
        ParameterErrorKind::InvalidGenre
    } else if mentions("page") || mentions("hits") {
        ParameterErrorKind::InvalidPage
    } else if mentions("age") || mentions("sex") || mentions("period") {
        ParameterErrorKind::InvalidFilter
    } else {
        ParameterErrorKind::Other
    }
}

fn classify_transport(message: &str) -> FetchError {
    let lowered = message.to_ascii_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    let kind = if contains_any(TIMEOUT_MARKERS) {
        ErrorKind::Timeout
    } else if contains_any(CONNECTION_MARKERS) {
        ErrorKind::Connection
    } else if contains_any(NETWORK_MARKERS) {
        ErrorKind::Network
    } else {
        ErrorKind::Unknown
    };

    FetchError::new(kind, message.to_string())
}
