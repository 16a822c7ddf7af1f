//! Rankfetch Core Library
//!
//! This library fetches paginated ranking data from a rate-limited
//! e-commerce API and keeps going through transient failures, returning
//! whatever could be collected together with an account of what failed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Error classification, retry, batch aggregation, metrics, and
//!   the paginated fetch orchestrator
//! - [`source`] - Page sources (the ranking API over HTTP)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod fetch;
pub mod source;
mod user_agent;

// Re-export commonly used types
pub use fetch::{
    AbortReason, BatchOptions, BatchResult, CancellationSignal, ErrorKind, ErrorMetrics,
    FetchError, MetricsCollector, PageRequest, PageResult, PageSource, PaginatedFetcher,
    QueryParams, RawFailure, RetryPolicy,
};
pub use source::{HttpPageSource, HttpSourceConfig, SourceError};
