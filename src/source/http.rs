//! HTTP page source for the ranking API.
//!
//! Each page is a GET against the configured endpoint with the caller's
//! query parameters plus the application id and paging parameters. The JSON
//! body carries the ranked items under `Items` and the total-count hint
//! under `count` (both field names are configurable).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::fetch::classify::{PageBody, parse_response};
use crate::fetch::{FetchError, PageRequest, PageResult, PageSource, RawFailure};
use crate::user_agent;

/// Ranking endpoint used when none is configured.
pub const DEFAULT_BASE_URL: &str =
    "https://app.rakuten.co.jp/services/api/IchibaItem/Ranking/20220601";

/// Default HTTP connect timeout (10 seconds).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default HTTP timeout for a whole page request (30 seconds).
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure to construct an [`HttpPageSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    /// The base URL does not parse.
    #[error("invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The base URL parses but cannot carry query parameters.
    #[error("base URL '{url}' must be an http(s) URL")]
    UnsupportedBaseUrl { url: String },

    /// reqwest refused the client configuration.
    #[error("failed to build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
}

impl SourceError {
    fn invalid_base_url(url: &str, source: url::ParseError) -> Self {
        Self::InvalidBaseUrl {
            url: url.to_string(),
            source,
        }
    }

    fn unsupported_base_url(url: &str) -> Self {
        Self::UnsupportedBaseUrl {
            url: url.to_string(),
        }
    }
}

/// Settings for [`HttpPageSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSourceConfig {
    /// Endpoint URL, without paging parameters.
    pub base_url: String,
    /// Sent as `applicationId` when present.
    pub application_id: Option<String>,
    /// JSON field holding the item array.
    pub items_field: String,
    /// JSON field holding the total-count hint.
    pub count_field: String,
    /// Query parameter carrying the 1-based page number.
    pub page_param: String,
    /// Query parameter carrying the page size.
    pub page_size_param: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            application_id: None,
            items_field: "Items".to_string(),
            count_field: "count".to_string(),
            page_param: "page".to_string(),
            page_size_param: "hits".to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
        }
    }
}

impl HttpSourceConfig {
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout: Duration, read_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }
}

/// [`PageSource`] backed by the ranking API.
///
/// The inner `reqwest::Client` pools connections, so create one source and
/// reuse it for every page.
#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: Client,
    base_url: Url,
    config: HttpSourceConfig,
}

impl HttpPageSource {
    /// Creates a source from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the base URL is invalid or the HTTP client
    /// cannot be built.
    #[instrument(level = "debug", skip(config), fields(base_url = %config.base_url))]
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SourceError::invalid_base_url(&config.base_url, e))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(SourceError::unsupported_base_url(&config.base_url));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(|source| SourceError::Client { source })?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    /// Builds the full request URL for one page.
    #[must_use]
    pub fn page_url(&self, request: &PageRequest) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in request.query.iter() {
                pairs.append_pair(key, value);
            }
            if let Some(application_id) = &self.config.application_id {
                pairs.append_pair("applicationId", application_id);
            }
            pairs.append_pair("format", "json");
            pairs.append_pair(&self.config.page_param, &request.page_number.to_string());
            pairs.append_pair(&self.config.page_size_param, &request.page_size.to_string());
        }
        url
    }

    fn parse_page(&self, status: u16, body: &str) -> Result<PageResult<Value>, FetchError> {
        let PageBody { items, fields } = parse_response(status, body, &self.config.items_field)?;
        let page = PageResult::new(items);
        Ok(match fields.get(&self.config.count_field).and_then(Value::as_u64) {
            Some(total) => page.with_total_count(total),
            None => page,
        })
    }
}

/// Maps a reqwest failure below HTTP to a transport signal the classifier understands.
fn transport_failure(error: &reqwest::Error) -> FetchError {
    let message = if error.is_timeout() {
        format!("timeout: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        format!("network error: {error}")
    };
    RawFailure::transport(message).into()
}

#[async_trait]
impl PageSource for HttpPageSource {
    type Item = Value;

    #[instrument(level = "debug", skip(self, request), fields(page = request.page_number))]
    async fn fetch_page(&self, request: &PageRequest) -> Result<PageResult<Value>, FetchError> {
        let url = self.page_url(request);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_failure(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_failure(&e))?;

        debug!(status, body_len = body.len(), "page response received");
        self.parse_page(status, &body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::{ErrorKind, ParameterErrorKind, QueryParams};

    fn source() -> HttpPageSource {
        HttpPageSource::new(
            HttpSourceConfig::default()
                .with_base_url("https://api.example.test/ranking?existing=1")
                .with_application_id("app-123"),
        )
        .unwrap()
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_config_defaults() {
        let config = HttpSourceConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.items_field, "Items");
        assert_eq!(config.count_field, "count");
        assert_eq!(config.page_param, "page");
        assert_eq!(config.page_size_param, "hits");
        assert!(config.application_id.is_none());
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let error = HttpPageSource::new(HttpSourceConfig::default().with_base_url("not a url"))
            .unwrap_err();
        assert!(matches!(error, SourceError::InvalidBaseUrl { .. }));
        assert!(error.to_string().contains("not a url"));
    }

    #[test]
    fn test_new_rejects_non_http_scheme() {
        let error = HttpPageSource::new(
            HttpSourceConfig::default().with_base_url("ftp://example.test/ranking"),
        )
        .unwrap_err();
        assert!(matches!(error, SourceError::UnsupportedBaseUrl { .. }));
    }

    // ==================== URL Tests ====================

    #[test]
    fn test_page_url_parameters() {
        let query = QueryParams::new().with("genreId", "100283").with("age", "20");
        let url = source().page_url(&PageRequest::new(3, 30, query));

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("existing".to_string(), "1".to_string()),
                ("age".to_string(), "20".to_string()),
                ("genreId".to_string(), "100283".to_string()),
                ("applicationId".to_string(), "app-123".to_string()),
                ("format".to_string(), "json".to_string()),
                ("page".to_string(), "3".to_string()),
                ("hits".to_string(), "30".to_string()),
            ]
        );
    }

    #[test]
    fn test_page_url_escapes_values() {
        let query = QueryParams::new().with("keyword", "a&b c");
        let url = source().page_url(&PageRequest::new(1, 10, query));
        assert!(url.as_str().contains("keyword=a%26b+c"), "{url}");
    }

    // ==================== Response Parsing Tests ====================

    #[test]
    fn test_parse_page_items_and_count() {
        let body = r#"{"Items":[{"Item":{"rank":1}},{"Item":{"rank":2}}],"count":200,"page":1}"#;
        let page = source().parse_page(200, body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0]["Item"]["rank"], 1);
        assert_eq!(page.total_count, Some(200));
    }

    #[test]
    fn test_parse_page_without_count() {
        let page = source().parse_page(200, r#"{"Items":[]}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.total_count.is_none());
    }

    #[test]
    fn test_parse_page_negative_count_ignored() {
        let page = source().parse_page(200, r#"{"Items":[],"count":-1}"#).unwrap();
        assert!(page.total_count.is_none());
    }

    #[test]
    fn test_parse_page_missing_items_is_response_format() {
        let error = source().parse_page(200, r#"{"count":3}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResponseFormat);
        assert!(error.raw_payload().is_some());
    }

    #[test]
    fn test_parse_page_rejects_non_array_items_and_non_object_body() {
        let error = source().parse_page(200, r#"{"Items":{"rank":1}}"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResponseFormat);

        let error = source().parse_page(200, r#"[{"rank":1}]"#).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResponseFormat);
        assert!(error.raw_payload().unwrap().is_array());
    }

    #[test]
    fn test_parse_page_matches_response_classification() {
        use crate::fetch::classify_response;

        for (status, body) in [
            (200, r#"{"Items":[],"count":0}"#),
            (200, r#"{"Hits":[]}"#),
            (200, "<html>"),
            (401, ""),
            (500, "{}"),
        ] {
            let from_page = source().parse_page(status, body).err().map(|e| e.kind());
            let from_classifier = classify_response(status, body, "Items").map(|e| e.kind());
            assert_eq!(from_page, from_classifier, "{status} {body}");
        }
    }

    #[test]
    fn test_parse_page_invalid_json_is_data_parsing() {
        let error = source().parse_page(200, "<html>").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DataParsing);
    }

    #[test]
    fn test_parse_page_wrong_parameter() {
        let body = r#"{"error":"wrong_parameter","error_description":"page must be a number"}"#;
        let error = source().parse_page(400, body).unwrap_err();
        assert_eq!(
            error.kind(),
            ErrorKind::Parameter(ParameterErrorKind::InvalidPage)
        );
        assert_eq!(error.status_code(), Some(400));
    }

    #[test]
    fn test_parse_page_server_error_retryable() {
        let error = source().parse_page(503, "").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::System);
        assert!(error.is_retryable());
    }
}
