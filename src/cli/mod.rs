//! CLI definitions and verb handlers
//!
//! `scrape <username>` is the primary verb and also the default: when the
//! first positional argument is not a known verb, `scrape` is inserted before
//! it, so `igscraper nasa --resume` works.

pub mod auth;
pub mod error;
pub mod scrape;

pub use auth::AuthCommand;
pub use error::CliError;
pub use scrape::ScrapeArgs;

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::{self, Config, LogLevel, MAX_CONCURRENT};
use crate::downloader::progress::DisplayMode;
use crate::downloader::retry::RetryPolicy;
use crate::shutdown::CancelHandle;

/// Verbs recognised in the first positional slot
const KNOWN_VERBS: &[&str] = &["scrape", "auth", "version", "help"];

/// Global flags that consume the following argument
const VALUE_FLAGS: &[&str] = &[
    "-c",
    "--config",
    "-o",
    "--output",
    "--concurrent",
    "--rate-limit",
    "-a",
    "--account",
    "--max-retries",
    "--download-timeout",
    "--log-level",
];

/// Parse and validate the worker count
fn parse_concurrent(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("concurrent downloads must be at least 1".to_string());
    }
    if value > MAX_CONCURRENT {
        return Err(format!(
            "concurrent downloads {value} exceeds maximum of {MAX_CONCURRENT}"
        ));
    }
    Ok(value)
}

/// Download every photo of a profile
#[derive(Parser, Debug)]
#[command(name = "igscraper")]
#[command(about = "Download all photos from a profile, with resume and rate limiting", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: <config dir>/config.json)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Base output directory
    #[arg(short = 'o', long, global = true)]
    pub output: Option<PathBuf>,

    /// Concurrent downloads (1-10)
    #[arg(long, global = true, value_parser = parse_concurrent)]
    pub concurrent: Option<usize>,

    /// Requests per minute
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub rate_limit: Option<u32>,

    /// Stored account to use
    #[arg(short = 'a', long, global = true)]
    pub account: Option<String>,

    /// Maximum attempts per request, for every retryable error class
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub download_timeout: Option<u64>,

    /// Continue from the existing checkpoint
    #[arg(long, global = true)]
    pub resume: bool,

    /// Discard any existing checkpoint
    #[arg(long, global = true)]
    pub force_restart: bool,

    /// Full-screen interface
    #[arg(long, global = true)]
    pub tui: bool,

    /// Desktop notifications
    #[arg(long, global = true)]
    pub notifications: bool,

    /// Log level: debug, info, warn, error
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    /// Only print errors
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Show a progress bar instead of per-file lines
    #[arg(long, global = true)]
    pub progress: bool,

    /// Print pages, skips and rate-limit waits
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every photo of a profile
    Scrape(ScrapeArgs),

    /// Manage stored session credentials
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Print version information
    Version,
}

impl Cli {
    /// Parse `args`, inserting the default verb where needed
    pub fn parse_with_default_verb<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::parse_from(normalize_args(args))
    }

    /// Fallible variant of [`Cli::parse_with_default_verb`]
    pub fn try_parse_with_default_verb<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    /// Quiet from `--quiet` or the `QUIET` environment variable
    pub fn is_quiet(&self) -> bool {
        self.quiet || config::env_flag("QUIET")
    }

    /// Display mode for the line sink
    pub fn display_mode(&self) -> DisplayMode {
        DisplayMode::from_flags(self.is_quiet(), self.progress, self.verbose)
    }

    /// Level for the `igscraper` log target.
    ///
    /// `--log-level` wins, then `--verbose` / `--quiet`, then `LOG_LEVEL`.
    pub fn log_level(&self) -> LogLevel {
        if let Some(level) = self.log_level {
            return level;
        }
        if self.verbose {
            return LogLevel::Debug;
        }
        if self.is_quiet() {
            return LogLevel::Error;
        }
        config::env_var("LOG_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Load the config file and environment, then apply command-line overrides
    pub fn resolve_config(&self) -> Result<Config, CliError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(output) = &self.output {
            config.output.base_directory = output.clone();
        }
        if let Some(concurrent) = self.concurrent {
            config.download.concurrent_downloads = concurrent;
        }
        if let Some(rpm) = self.rate_limit {
            config.rate_limit.requests_per_minute = rpm;
        }
        if let Some(timeout) = self.download_timeout {
            config.download.download_timeout_secs = timeout;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.notifications {
            config.notifications.enabled = true;
        }
        config.validate()?;
        Ok(config)
    }

    /// Retry policy from the config, with `--max-retries` applied to every class
    pub fn retry_policy(&self, config: &Config) -> RetryPolicy {
        let policy = RetryPolicy::from_settings(&config.retry);
        match self.max_retries {
            Some(attempts) => policy.with_max_attempts(attempts),
            None => policy,
        }
    }

    /// Run the selected command
    pub async fn execute(&self, cancel: CancelHandle) -> Result<(), CliError> {
        match &self.command {
            Commands::Scrape(args) => args.execute(self, cancel).await.map(|_| ()),
            Commands::Auth(cmd) => cmd.execute(self),
            Commands::Version => {
                println!("{} {}", config::APP_NAME, env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Insert `scrape` before the first positional argument if it is not a verb
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].to_string_lossy().into_owned();
        if arg == "--" {
            break;
        }
        if arg.starts_with('-') {
            if VALUE_FLAGS.contains(&arg.as_str()) {
                i += 1;
            }
            i += 1;
            continue;
        }
        if !KNOWN_VERBS.contains(&arg.as_str()) {
            args.insert(i, OsString::from("scrape"));
        }
        break;
    }
    args
}
