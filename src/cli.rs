//! CLI argument definitions using clap derive macros.
//!
//! Tunable values are `Option`s so that an absent flag falls through to the
//! environment, then the config file, then the built-in default.

use std::path::PathBuf;

use clap::Parser;

/// Fetch a ranked listing from a rate-limited e-commerce API.
///
/// Rankfetch pages through the ranking endpoint, retries transient failures
/// with backoff, and prints the collected items plus a failure report as JSON.
#[derive(Parser, Debug)]
#[command(name = "rankfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum number of items to collect [default: 30]
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_items: Option<u64>,

    /// Items requested per page (1-1000) [default: 30]
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub page_size: Option<u32>,

    /// Genre to rank within
    #[arg(long)]
    pub genre_id: Option<String>,

    /// Demographic filter: age bracket
    #[arg(long)]
    pub age: Option<String>,

    /// Demographic filter: sex
    #[arg(long)]
    pub sex: Option<String>,

    /// Ranking period (e.g. realtime)
    #[arg(long)]
    pub period: Option<String>,

    /// Extra query parameter passed through to the API (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Ranking endpoint URL [env: RANKFETCH_BASE_URL]
    #[arg(long)]
    pub base_url: Option<String>,

    /// API application id [env: RANKFETCH_APPLICATION_ID]
    #[arg(long)]
    pub application_id: Option<String>,

    /// Maximum retry attempts for transient failures (0-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Minimum delay between requests in milliseconds (0 to disable, max 60000) [default: 1000]
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Pages fetched concurrently (1-16) [default: 1]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,

    /// Give up and report partial results after this many seconds
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Path to a TOML config file [default: $XDG_CONFIG_HOME/rankfetch/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
