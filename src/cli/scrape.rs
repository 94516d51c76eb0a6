//! `scrape` command implementation

use clap::Args;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Cli, CliError};
use crate::auth::{Account, CredentialError, CredentialManager, EnvironmentStore};
use crate::config;
use crate::downloader::coordinator::{Coordinator, RunSummary};
use crate::downloader::progress::{LineSink, ProgressSink};
use crate::error::ScrapeError;
use crate::shutdown::CancelHandle;
use crate::Username;

/// Arguments of `scrape`
#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Profile to download (a leading @ is accepted)
    pub username: String,
}

impl ScrapeArgs {
    /// Resolve settings and credentials, then run the pipeline
    pub async fn execute(&self, cli: &Cli, cancel: CancelHandle) -> Result<RunSummary, CliError> {
        let username = Username::parse(&self.username)?;
        let config = cli.resolve_config()?;

        if cli.tui {
            info!("Full-screen interface is not available, using line output");
        }
        if config.notifications.enabled {
            info!("Desktop notifications are not available, continuing without them");
        }

        let account = resolve_account(cli.account.as_deref())?;
        info!(account = ?account, target = %username, "Using stored session");

        let mut sink = LineSink::new(cli.display_mode());
        if cli.no_color {
            sink = sink.without_color();
        }
        let sink: Arc<dyn ProgressSink> = Arc::new(sink);

        let retry = cli.retry_policy(&config);
        let coordinator = Coordinator::new(config, account, sink, cancel)?.with_retry_policy(retry);
        let summary = coordinator
            .run(&username, cli.resume, cli.force_restart)
            .await?;
        Ok(summary)
    }
}

/// Credential manager over the default chain, or the environment alone when
/// the config directory cannot be used
pub fn credential_manager() -> CredentialManager {
    let chain = config::config_dir()
        .map_err(|e| CredentialError::StoreUnavailable(e.to_string()))
        .and_then(|dir| CredentialManager::with_default_chain(&dir));
    match chain {
        Ok(manager) => {
            debug!(backends = ?manager.backend_names(), "Credential chain ready");
            manager
        }
        Err(e) => {
            warn!(error = %e, "Credential storage unavailable, reading environment only");
            CredentialManager::new(vec![Box::new(EnvironmentStore::new())])
        }
    }
}

/// Account named by `--account`, else the default one
fn resolve_account(name: Option<&str>) -> Result<Account, CliError> {
    let manager = credential_manager();
    let result = match name {
        Some(name) => manager.retrieve(name),
        None => manager.retrieve_default(),
    };
    match result {
        Ok(account) => Ok(account),
        Err(CredentialError::NotFound(_)) => Err(ScrapeError::AuthRequired(match name {
            Some(name) => format!("no stored credentials for '{name}'"),
            None => "no session credentials found".to_string(),
        })
        .into()),
        Err(e) => Err(ScrapeError::from(e).into()),
    }
}
