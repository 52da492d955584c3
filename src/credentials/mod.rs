//! Account credentials.
//!
//! Accounts are numbered environment variables under a prefix (default `CITI`):
//!
//! ```text
//! CITI_USERNAME_1=jdoe
//! CITI_PASSWORD_1=...
//! CITI_HOLDER_1=Andrew
//! ```
//!
//! Numbering starts at 1 and stops at the first missing username. A missing
//! holder name defaults to `Holder <n>`. The variables may also live in a
//! `.env` file next to the config file or in the working directory.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::debug;

const DOTENV_FILE: &str = ".env";

/// One online-banking login.
pub struct Account {
    pub username: String,
    pub password: SecretString,
    pub holder: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("holder", &self.holder)
            .finish_non_exhaustive()
    }
}

/// Read accounts through `lookup`, which maps a variable name to its value.
pub fn load_accounts<F>(prefix: &str, lookup: F) -> Vec<Account>
where
    F: Fn(&str) -> Option<String>,
{
    let mut accounts = Vec::new();
    for n in 1.. {
        let Some(username) = lookup(&format!("{prefix}_USERNAME_{n}")).filter(|u| !u.is_empty())
        else {
            break;
        };
        let password = lookup(&format!("{prefix}_PASSWORD_{n}")).unwrap_or_default();
        let holder = lookup(&format!("{prefix}_HOLDER_{n}"))
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| format!("Holder {n}"));
        accounts.push(Account {
            username,
            password: SecretString::from(password),
            holder,
        });
    }
    accounts
}

/// Read accounts from the process environment.
pub fn load_accounts_from_env(prefix: &str) -> Vec<Account> {
    load_accounts(prefix, |key| std::env::var(key).ok())
}

/// Load `.env` from `config_dir`, then from the working directory, into the
/// process environment.
///
/// Variables already set are kept, so the real environment wins over both
/// files and the config directory's file wins over the working directory's.
/// Returns the files that were read.
pub fn load_dotenv(config_dir: &Path) -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let candidates = [cwd.join(config_dir).join(DOTENV_FILE), cwd.join(DOTENV_FILE)];

    let mut loaded: Vec<PathBuf> = Vec::new();
    for path in candidates {
        if !path.is_file() || loaded.contains(&path) {
            continue;
        }
        dotenvy::from_path(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        debug!(path = %path.display(), "Loaded environment file");
        loaded.push(path);
    }
    Ok(loaded)
}

/// Move the priority holder's accounts to the front, keeping relative order.
pub fn prioritize(accounts: &mut [Account], priority_holder: Option<&str>) {
    if let Some(holder) = priority_holder {
        accounts.sort_by_key(|account| account.holder != holder);
    }
}
