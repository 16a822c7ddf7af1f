//! CLI entry point for the rankfetch tool.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rankfetch_core::{CancellationSignal, HttpPageSource, MetricsCollector, PaginatedFetcher};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod report;
mod settings;

use cli::Args;
use report::Outcome;
use settings::Settings;

/// Exit code for configuration errors and a failed first page.
const EXIT_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    init_tracing(&args);

    match run(args).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_tracing(args: &Args) {
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout is reserved for the JSON report
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(args: Args) -> Result<Outcome> {
    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_config(args.config.as_deref())?;
    if let Some(path) = loaded.config.as_ref().and(loaded.path.as_ref()) {
        debug!(path = %path.display(), "loaded config file");
    }
    let settings = Settings::resolve(
        &args,
        |name| std::env::var(name).ok(),
        loaded.config.as_ref(),
    )?;

    if settings.source.application_id.is_none() {
        warn!(
            "no application id configured; set --application-id or {}",
            settings::ENV_APPLICATION_ID
        );
    }

    let signal = match settings.timeout {
        Some(timeout) => CancellationSignal::with_timeout(timeout),
        None => CancellationSignal::new(),
    };
    let trigger = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight requests");
            trigger.cancel();
        }
    });

    let source = HttpPageSource::new(settings.source.clone()).context("Invalid API settings")?;
    let metrics = match settings.metrics_window {
        Some(window) => MetricsCollector::with_window(window),
        None => MetricsCollector::new(),
    };
    let mut fetcher = PaginatedFetcher::new(source)
        .with_metrics(Arc::new(metrics))
        .with_cancellation(signal);
    if let Some(max_pages) = settings.max_pages {
        fetcher = fetcher.with_max_pages(max_pages);
    }

    info!(
        max_items = settings.max_items,
        page_size = settings.page_size,
        concurrency = settings.options.concurrency(),
        "Rankfetch starting"
    );

    let result = fetcher
        .fetch_all(
            settings.max_items,
            settings.page_size,
            &settings.query,
            &settings.policy,
            &settings.options,
        )
        .await
        .context("Failed to fetch the first page")?;

    let metrics = fetcher.metrics();
    report::write_report(&mut io::stdout().lock(), &result, &metrics)?;

    info!(
        items = result.items.len(),
        failed_pages = result.errors.len(),
        success = result.success,
        partial = result.is_partial(),
        "Fetch complete"
    );

    Ok(Outcome::of(&result))
}
