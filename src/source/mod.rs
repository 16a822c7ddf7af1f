//! Concrete page sources.
//!
//! - [`HttpPageSource`] - the ranking API over HTTP

mod http;

pub use http::{DEFAULT_BASE_URL, HttpPageSource, HttpSourceConfig, SourceError};
