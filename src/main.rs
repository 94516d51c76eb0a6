//! Main entry point for the igscraper CLI

use igscraper::cli::{Cli, CliError};
use igscraper::config::{load_dotenv, LogLevel};
use igscraper::shutdown::{install_ctrl_c, CancelHandle};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Initialize tracing on stderr with optional JSON formatting
fn init_tracing(level: LogLevel) {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("igscraper={}", level.as_filter())));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    load_dotenv();
    let cli = match Cli::try_parse_with_default_verb(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version also arrive here
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
    init_tracing(cli.log_level());

    let cancel = CancelHandle::new();
    install_ctrl_c(cancel.clone());

    if let Err(e) = run(&cli, cancel).await {
        report(&e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, cancel: CancelHandle) -> anyhow::Result<()> {
    cli.execute(cancel).await?;
    Ok(())
}

/// Print the failure summary to stderr
fn report(err: &anyhow::Error) {
    let summary = match err.downcast_ref::<CliError>() {
        Some(e) if e.is_cancelled() => {
            eprintln!("Interrupted");
            return;
        }
        Some(e) => {
            error!(kind = ?e.kind(), "Command failed: {}", e);
            e.summary()
        }
        None => {
            error!("Command failed: {:#}", err);
            format!("[FAILED] {err:#}")
        }
    };
    debug!(error = ?err, "Failure details");

    let mut lines = summary.lines();
    if let Some(first) = lines.next() {
        eprintln!("{}", console::style(first).red().for_stderr());
    }
    for line in lines {
        eprintln!("{line}");
    }
}
