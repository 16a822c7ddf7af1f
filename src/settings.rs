//! Resolution of effective run settings.
//!
//! Each value comes from the first source that sets it:
//! command line, then environment, then config file, then built-in default.

use std::time::Duration;

use anyhow::{Result, bail};
use rankfetch_core::fetch::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_CONSECUTIVE_ERRORS,
    DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_MIN_SUCCESS_RATE, DEFAULT_REQUEST_INTERVAL,
};
use rankfetch_core::{BatchOptions, HttpSourceConfig, QueryParams, RetryPolicy};

use crate::app_config::FileConfig;
use crate::cli::Args;

pub(crate) const ENV_APPLICATION_ID: &str = "RANKFETCH_APPLICATION_ID";
pub(crate) const ENV_BASE_URL: &str = "RANKFETCH_BASE_URL";

const DEFAULT_MAX_ITEMS: u64 = 30;
const DEFAULT_PAGE_SIZE: u32 = 30;

/// Everything a run needs, fully resolved.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) source: HttpSourceConfig,
    pub(crate) max_pages: Option<u32>,
    pub(crate) query: QueryParams,
    pub(crate) max_items: usize,
    pub(crate) page_size: u32,
    pub(crate) policy: RetryPolicy,
    pub(crate) options: BatchOptions,
    pub(crate) timeout: Option<Duration>,
    pub(crate) metrics_window: Option<Duration>,
}

impl Settings {
    /// Merges the command line, environment lookup, and file config.
    pub(crate) fn resolve(
        args: &Args,
        env: impl Fn(&str) -> Option<String>,
        file: Option<&FileConfig>,
    ) -> Result<Self> {
        let file = file.cloned().unwrap_or_default();
        let env_non_empty = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let mut source = HttpSourceConfig::default();
        if let Some(base_url) = args
            .base_url
            .clone()
            .or_else(|| env_non_empty(ENV_BASE_URL))
            .or(file.api.base_url)
        {
            source.base_url = base_url;
        }
        source.application_id = args
            .application_id
            .clone()
            .or_else(|| env_non_empty(ENV_APPLICATION_ID))
            .or(file.api.application_id);
        if let Some(secs) = file.api.connect_timeout_secs {
            source.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.api.read_timeout_secs {
            source.read_timeout = Duration::from_secs(secs);
        }

        let max_items = args
            .max_items
            .or(file.batch.max_items)
            .unwrap_or(DEFAULT_MAX_ITEMS);
        let Ok(max_items) = usize::try_from(max_items) else {
            bail!("max-items {max_items} is too large for this platform");
        };
        let page_size = args
            .page_size
            .or(file.batch.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE);

        let max_retries = args
            .max_retries
            .or(file.retry.max_retries)
            .map_or(DEFAULT_MAX_RETRIES, u32::from);
        let policy = RetryPolicy::new(
            max_retries,
            file.retry
                .initial_delay_ms
                .map_or(DEFAULT_INITIAL_DELAY, Duration::from_millis),
            file.retry
                .max_delay_ms
                .map_or(DEFAULT_MAX_DELAY, Duration::from_millis),
            file.retry.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR),
            file.retry.jitter.unwrap_or(true),
        );

        let request_interval = args
            .rate_limit
            .or(file.batch.rate_limit)
            .map_or(DEFAULT_REQUEST_INTERVAL, Duration::from_millis);
        let concurrency = args.concurrency.or(file.batch.concurrency).unwrap_or(1);
        let options = BatchOptions::default()
            .with_min_success_rate(file.batch.min_success_rate.unwrap_or(DEFAULT_MIN_SUCCESS_RATE))
            .with_max_consecutive_errors(
                file.batch
                    .max_consecutive_errors
                    .unwrap_or(DEFAULT_MAX_CONSECUTIVE_ERRORS),
            )
            .with_stop_on_fatal_error(file.batch.stop_on_fatal_error.unwrap_or(true))
            .with_request_interval(request_interval)
            .with_concurrency(usize::from(concurrency));

        Ok(Self {
            source,
            max_pages: file.api.max_pages,
            query: build_query(args),
            max_items,
            page_size,
            policy,
            options,
            timeout: args.timeout.map(Duration::from_secs),
            metrics_window: file.batch.metrics_window_secs.map(Duration::from_secs),
        })
    }
}

/// Builds API query parameters from the dedicated flags and `--param` pairs.
fn build_query(args: &Args) -> QueryParams {
    let mut query = QueryParams::new();
    let named = [
        ("genreId", &args.genre_id),
        ("age", &args.age),
        ("sex", &args.sex),
        ("period", &args.period),
    ];
    for (key, value) in named {
        if let Some(value) = value {
            query.insert(key, value.clone());
        }
    }
    for (key, value) in &args.params {
        query.insert(key.clone(), value.clone());
    }
    query
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::app_config::{ApiSection, BatchSection, RetrySection};

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["rankfetch"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn file_config() -> FileConfig {
        FileConfig {
            api: ApiSection {
                base_url: Some("https://file.example.test/ranking".to_string()),
                application_id: Some("file-id".to_string()),
                max_pages: Some(10),
                ..ApiSection::default()
            },
            retry: RetrySection {
                max_retries: Some(5),
                jitter: Some(false),
                ..RetrySection::default()
            },
            batch: BatchSection {
                max_items: Some(120),
                rate_limit: Some(2500),
                concurrency: Some(4),
                min_success_rate: Some(0.5),
                metrics_window_secs: Some(600),
                ..BatchSection::default()
            },
        }
    }

    #[test]
    fn test_defaults_without_any_source() {
        let settings = Settings::resolve(&args(&[]), no_env, None).unwrap();
        assert_eq!(settings.max_items, 30);
        assert_eq!(settings.page_size, 30);
        assert_eq!(settings.policy, RetryPolicy::default());
        assert_eq!(settings.options, BatchOptions::default());
        assert!(settings.source.application_id.is_none());
        assert!(settings.timeout.is_none());
        assert!(settings.metrics_window.is_none());
        assert!(settings.query.is_empty());
    }

    #[test]
    fn test_file_values_apply() {
        let file = file_config();
        let settings = Settings::resolve(&args(&[]), no_env, Some(&file)).unwrap();
        assert_eq!(settings.source.base_url, "https://file.example.test/ranking");
        assert_eq!(settings.source.application_id.as_deref(), Some("file-id"));
        assert_eq!(settings.max_pages, Some(10));
        assert_eq!(settings.max_items, 120);
        assert_eq!(settings.policy.max_retries(), 5);
        assert!(!settings.policy.jitter());
        assert_eq!(settings.options.request_interval(), Duration::from_millis(2500));
        assert_eq!(settings.options.concurrency(), 4);
        assert!((settings.options.min_success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.metrics_window, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = file_config();
        let env = |name: &str| match name {
            ENV_APPLICATION_ID => Some("env-id".to_string()),
            ENV_BASE_URL => Some("  ".to_string()),
            _ => None,
        };
        let settings = Settings::resolve(&args(&[]), env, Some(&file)).unwrap();
        assert_eq!(settings.source.application_id.as_deref(), Some("env-id"));
        // blank env values do not count
        assert_eq!(settings.source.base_url, "https://file.example.test/ranking");
    }

    #[test]
    fn test_command_line_overrides_everything() {
        let file = file_config();
        let env = |name: &str| (name == ENV_APPLICATION_ID).then(|| "env-id".to_string());
        let settings = Settings::resolve(
            &args(&[
                "--application-id",
                "cli-id",
                "-n",
                "45",
                "-r",
                "1",
                "-l",
                "0",
                "-c",
                "2",
                "--timeout",
                "60",
            ]),
            env,
            Some(&file),
        )
        .unwrap();
        assert_eq!(settings.source.application_id.as_deref(), Some("cli-id"));
        assert_eq!(settings.max_items, 45);
        assert_eq!(settings.policy.max_retries(), 1);
        assert_eq!(settings.options.request_interval(), Duration::ZERO);
        assert_eq!(settings.options.concurrency(), 2);
        assert_eq!(settings.timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_query_built_from_flags() {
        let settings = Settings::resolve(
            &args(&["--genre-id", "100283", "--sex", "1", "--param", "carrier=2"]),
            no_env,
            None,
        )
        .unwrap();
        assert_eq!(settings.query.get("genreId"), Some("100283"));
        assert_eq!(settings.query.get("sex"), Some("1"));
        assert_eq!(settings.query.get("carrier"), Some("2"));
        assert!(settings.query.get("age").is_none());
    }

    #[test]
    fn test_param_overrides_named_flag() {
        let settings = Settings::resolve(
            &args(&["--period", "daily", "--param", "period=realtime"]),
            no_env,
            None,
        )
        .unwrap();
        assert_eq!(settings.query.get("period"), Some("realtime"));
    }
}
