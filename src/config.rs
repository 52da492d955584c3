use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, parse_duration};

/// Site routes and text conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub login_url: String,
    pub offers_url: String,
    pub home_url: String,
    pub logout_url: String,

    /// URL fragment that identifies the offers view.
    pub offers_route_marker: String,

    /// Offers whose body mentions this place are flagged local.
    pub locality: String,

    /// Card name used when neither the dropdown label nor the offer text names one.
    pub default_card_name: String,

    /// Dropdown entry that is a heading rather than a card.
    pub placeholder_card_label: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            login_url: "https://online.citi.com/US/login.do".to_string(),
            offers_url: "https://online.citi.com/US/ag/products-offers/merchantoffers".to_string(),
            home_url: "https://online.citi.com/US/home".to_string(),
            logout_url: "https://online.citi.com/US/logout".to_string(),
            offers_route_marker: "merchantoffers".to_string(),
            locality: "philadelphia".to_string(),
            default_card_name: "Citi Card".to_string(),
            placeholder_card_label: "credit".to_string(),
        }
    }
}

/// Pauses and wait bounds. All values accept "4s", "250ms", "1.2s" style strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Pause after a full page load.
    #[serde(deserialize_with = "deserialize_duration")]
    pub page_load_pause: Duration,

    /// Pause after a fresh browser window opens.
    #[serde(deserialize_with = "deserialize_duration")]
    pub new_window_settle: Duration,

    /// Pause after the card dropdown switches cards.
    #[serde(deserialize_with = "deserialize_duration")]
    pub card_switch_settle: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,

    /// Bound on waiting for the offers page to show any signal after navigating.
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle_timeout: Duration,

    /// Bound on waiting for a control (dropdown, options, dialog close).
    #[serde(deserialize_with = "deserialize_duration")]
    pub element_timeout: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub login_field_timeout: Duration,

    /// How long to keep scanning for popups before giving up.
    #[serde(deserialize_with = "deserialize_duration")]
    pub popup_timeout: Duration,

    /// Bound on waiting for an enrollment click to show its result.
    #[serde(deserialize_with = "deserialize_duration")]
    pub enroll_timeout: Duration,

    /// Short pause after a click.
    #[serde(deserialize_with = "deserialize_duration")]
    pub action_pause: Duration,

    /// Pause after clicking an offers tab to force a re-render.
    #[serde(deserialize_with = "deserialize_duration")]
    pub tab_toggle_pause: Duration,

    /// Pause between dismissing an enrollment error and clicking again.
    #[serde(deserialize_with = "deserialize_duration")]
    pub enroll_retry_pause: Duration,

    /// Pause after an offer dialog closes.
    #[serde(deserialize_with = "deserialize_duration")]
    pub modal_close_pause: Duration,

    /// Pause after a recovery step (404 bounce, home visit, failed login).
    #[serde(deserialize_with = "deserialize_duration")]
    pub recovery_pause: Duration,

    /// Pause between navigation attempts.
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_backoff: Duration,

    /// Pause on the login route before looking for the form, and after logout.
    #[serde(deserialize_with = "deserialize_duration")]
    pub session_pause: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            page_load_pause: Duration::from_secs(4),
            new_window_settle: Duration::from_millis(1200),
            card_switch_settle: Duration::from_secs(1),
            poll_interval: Duration::from_millis(200),
            settle_timeout: Duration::from_secs(12),
            element_timeout: Duration::from_secs(10),
            login_field_timeout: Duration::from_secs(25),
            popup_timeout: Duration::from_secs(4),
            enroll_timeout: Duration::from_secs(8),
            action_pause: Duration::from_millis(300),
            tab_toggle_pause: Duration::from_millis(600),
            enroll_retry_pause: Duration::from_millis(800),
            modal_close_pause: Duration::from_millis(250),
            recovery_pause: Duration::from_millis(1500),
            retry_backoff: Duration::from_secs(1),
            session_pause: Duration::from_secs(3),
        }
    }
}

impl TimingConfig {
    /// Every pause and bound zero: each wait checks once and never sleeps.
    pub fn instant() -> Self {
        Self {
            page_load_pause: Duration::ZERO,
            new_window_settle: Duration::ZERO,
            card_switch_settle: Duration::ZERO,
            poll_interval: Duration::ZERO,
            settle_timeout: Duration::ZERO,
            element_timeout: Duration::ZERO,
            login_field_timeout: Duration::ZERO,
            popup_timeout: Duration::ZERO,
            enroll_timeout: Duration::ZERO,
            action_pause: Duration::ZERO,
            tab_toggle_pause: Duration::ZERO,
            enroll_retry_pause: Duration::ZERO,
            modal_close_pause: Duration::ZERO,
            recovery_pause: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            session_pause: Duration::ZERO,
        }
    }
}

/// Navigation and session policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Attempts at reaching the offers page before giving up on an account.
    pub offers_retry_max: u32,

    /// Try the in-app rewards menu when the direct URL does not land.
    pub menu_fallback: bool,

    /// First attempt at which a home-page visit is used to re-anchor the session.
    pub home_bridge_from_attempt: u32,

    /// Start a fresh browser between accounts.
    pub restart_between_accounts: bool,

    /// Typing cadence per login attempt, in milliseconds.
    pub login_pacing_ms: Vec<u64>,

    /// Healing rounds when the offer grid does not load for a card.
    pub offers_heal_tries: u32,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            offers_retry_max: 8,
            menu_fallback: true,
            home_bridge_from_attempt: 3,
            restart_between_accounts: true,
            login_pacing_ms: vec![100, 500, 1000],
            offers_heal_tries: 3,
        }
    }
}

/// Chrome launch settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Chrome executable. Auto-detected when unset.
    pub chrome_path: Option<PathBuf>,

    /// Window position `[x, y]`, e.g. `[3440, 0]` to open on a second monitor.
    pub window_position: Option<[i32; 2]>,

    /// Chrome profile directory. If relative, resolved from the config file location.
    pub profile_dir: Option<PathBuf>,

    /// Extra command-line switches passed to Chrome.
    pub extra_args: Vec<String>,
}

/// Environment variable naming a service-account key; overrides
/// `[sheets] service_account_path`.
pub const SERVICE_ACCOUNT_ENV_VAR: &str = "GOOGLE_SA_PATH";

/// Key file picked up from the config directory when no path is set.
pub const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "service_account.json";

fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

/// Google Sheets record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    pub spreadsheet_id: Option<String>,

    /// File holding an OAuth access token. If relative, resolved from the
    /// config file location. Falls back to `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub token_path: Option<PathBuf>,

    /// Service-account JSON key, used when no access token is given. If
    /// relative, resolved from the config file location. Defaults to
    /// `service_account.json` next to the config file when that exists.
    pub service_account_path: Option<PathBuf>,

    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            token_path: None,
            service_account_path: None,
            api_base: default_sheets_api_base(),
        }
    }
}

/// Where account credentials come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    /// Prefix of the `<PREFIX>_USERNAME_<n>` environment variables.
    pub env_prefix: String,

    /// Holder whose accounts run first.
    pub priority_holder: Option<String>,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            env_prefix: "CITI".to_string(),
            priority_holder: None,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub timing: TimingConfig,
    pub navigation: NavigationConfig,
    pub browser: BrowserSettings,
    pub sheets: SheetsConfig,
    pub accounts: AccountsConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `<PREFIX>_PAGE_LOAD_PAUSE`, `<PREFIX>_OFFERS_RETRY_MAX`,
    /// `<PREFIX>_NAV_MENU_FALLBACK` and `<PREFIX>_RESTART_BETWEEN_ACCOUNTS`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = self.accounts.env_prefix.clone();
        let var = |name: &str| {
            let key = format!("{prefix}_{name}");
            lookup(&key)
                .map(|value| (key, value.trim().to_string()))
                .filter(|(_, value)| !value.is_empty())
        };

        if let Some((key, value)) = var("PAGE_LOAD_PAUSE") {
            self.timing.page_load_pause =
                parse_duration(&value).with_context(|| format!("Invalid {key}"))?;
        }
        if let Some((key, value)) = var("OFFERS_RETRY_MAX") {
            self.navigation.offers_retry_max = value
                .parse()
                .with_context(|| format!("Invalid {key}: {value}"))?;
        }
        if let Some((key, value)) = var("NAV_MENU_FALLBACK") {
            self.navigation.menu_fallback =
                parse_flag(&value).with_context(|| format!("Invalid {key}: {value}"))?;
        }
        if let Some((key, value)) = var("RESTART_BETWEEN_ACCOUNTS") {
            self.navigation.restart_between_accounts =
                parse_flag(&value).with_context(|| format!("Invalid {key}: {value}"))?;
        }
        if let Some(path) = lookup(SERVICE_ACCOUNT_ENV_VAR).filter(|p| !p.trim().is_empty()) {
            self.sheets.service_account_path = Some(PathBuf::from(path.trim()));
        }
        Ok(())
    }

    fn resolve_path(path: &Option<PathBuf>, config_dir: &Path) -> Option<PathBuf> {
        match path {
            Some(path) if path.is_absolute() => Some(path.clone()),
            Some(path) => Some(config_dir.join(path)),
            None => None,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Loaded configuration with resolved paths and environment overrides applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config_path: PathBuf,
    pub site: SiteConfig,
    pub timing: TimingConfig,
    pub navigation: NavigationConfig,
    pub browser: BrowserSettings,
    pub sheets: SheetsConfig,
    pub accounts: AccountsConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./offerbook.toml` if it exists in current directory
/// 2. `~/.config/offerbook/offerbook.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("offerbook.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("offerbook").join("offerbook.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load config (or defaults when the file is missing), resolve relative
    /// paths against the config file's directory and apply environment
    /// overrides from the process environment.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(config_path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };
        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?
            .to_path_buf();

        let mut config = Config::load_or_default(&config_path)?;
        config.apply_env_overrides(lookup)?;

        let mut browser = config.browser;
        browser.profile_dir = Config::resolve_path(&browser.profile_dir, &config_dir);
        let mut sheets = config.sheets;
        sheets.token_path = Config::resolve_path(&sheets.token_path, &config_dir);
        sheets.service_account_path =
            Config::resolve_path(&sheets.service_account_path, &config_dir).or_else(|| {
                let default = config_dir.join(DEFAULT_SERVICE_ACCOUNT_FILE);
                default.is_file().then_some(default)
            });

        Ok(Self {
            config_path,
            site: config.site,
            timing: config.timing,
            navigation: config.navigation,
            browser,
            sheets,
            accounts: config.accounts,
        })
    }
}
