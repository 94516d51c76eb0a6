//! `auth` subcommands: store, remove and list session credentials

use clap::Subcommand;
use std::io::{self, BufRead, Write};

use super::scrape::credential_manager;
use super::{Cli, CliError};
use crate::auth::{mask_secret, Account, CredentialManager};

/// Credential management commands
#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Store session cookies for an account
    Login {
        /// Account username; prompted for if omitted
        username: Option<String>,

        /// `sessionid` cookie value; prompted for if omitted
        #[arg(long)]
        session_id: Option<String>,

        /// `csrftoken` cookie value; prompted for if omitted
        #[arg(long)]
        csrf_token: Option<String>,

        /// Browser user agent to send with requests
        #[arg(long)]
        user_agent: Option<String>,
    },

    /// Remove stored credentials
    Logout {
        /// Account to remove
        username: Option<String>,

        /// Remove every stored account
        #[arg(long)]
        all: bool,
    },

    /// List stored accounts with masked tokens
    List,
}

impl AuthCommand {
    /// Execute against the default credential chain
    pub fn execute(&self, _cli: &Cli) -> Result<(), CliError> {
        let manager = credential_manager();
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut output = io::stdout();
        self.run(&manager, &mut input, &mut output)
    }

    /// Execute with explicit I/O, so prompts can be driven from tests
    pub fn run<R: BufRead, W: Write>(
        &self,
        manager: &CredentialManager,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), CliError> {
        match self {
            Self::Login {
                username,
                session_id,
                csrf_token,
                user_agent,
            } => {
                let username = value_or_prompt(username, "Username", input, output)?;
                let session_id = value_or_prompt(session_id, "Session ID (sessionid cookie)", input, output)?;
                let csrf_token = value_or_prompt(csrf_token, "CSRF token (csrftoken cookie)", input, output)?;
                let account = Account::new(username.trim_start_matches('@'), session_id, csrf_token)
                    .with_user_agent(user_agent.clone());

                let backend = manager.store(&account)?;
                writeln!(output, "Stored credentials for @{} in {backend}", account.username)?;
                Ok(())
            }
            Self::Logout { username, all } => {
                if *all {
                    let removed = manager.delete_all()?;
                    writeln!(output, "Removed {removed} account(s)")?;
                    return Ok(());
                }
                let username = username.as_deref().ok_or_else(|| {
                    CliError::InvalidArgument("give a username or --all".to_string())
                })?;
                manager.delete(username.trim_start_matches('@'))?;
                writeln!(output, "Removed credentials for @{username}")?;
                Ok(())
            }
            Self::List => {
                let accounts = manager.list()?;
                if accounts.is_empty() {
                    writeln!(output, "No stored accounts")?;
                    return Ok(());
                }
                for account in accounts {
                    writeln!(
                        output,
                        "{:<30} session {}  modified {}",
                        account.username,
                        mask_secret(&account.session_id),
                        account.last_modified.format("%Y-%m-%d %H:%M:%S UTC")
                    )?;
                }
                Ok(())
            }
        }
    }
}

fn value_or_prompt<R: BufRead, W: Write>(
    given: &Option<String>,
    label: &str,
    input: &mut R,
    output: &mut W,
) -> Result<String, CliError> {
    if let Some(value) = given.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(value.to_string());
    }
    write!(output, "{label}: ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let value = line.trim();
    if value.is_empty() {
        return Err(CliError::InvalidArgument(format!("{label} is required")));
    }
    Ok(value.to_string())
}
