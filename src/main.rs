use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use offerbook::activity::ActivityLog;
use offerbook::browser::{BrowserLauncher, ChromeLauncher};
use offerbook::clock::{Clock, SystemClock};
use offerbook::config::{default_config_path, ResolvedConfig};
use offerbook::credentials::{load_accounts_from_env, load_dotenv, prioritize};
use offerbook::duration::format_duration;
use offerbook::reconcile;
use offerbook::runner::{RunOutcome, Runner};
use offerbook::store::{ensure_schema, MemoryRecordStore, RecordStore, SheetsStore};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("OFFERBOOK_GIT_COMMIT"),
    ")"
);

#[derive(Parser)]
#[command(name = "offerbook")]
#[command(version = VERSION)]
#[command(about = "Enroll merchant offers and keep the offers spreadsheet tidy")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Keep records in memory instead of writing to Google Sheets
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape every account, then clean up the spreadsheet (default)
    Run,
    /// Delete expired and duplicate rows and reset the filter
    Reconcile,
    /// List configured account holders
    Accounts,
    /// Show current configuration
    Config,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off")
    });
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .init();
    }
}

fn open_store(config: &ResolvedConfig, dry_run: bool) -> Result<Arc<dyn RecordStore>> {
    if dry_run {
        info!("Dry run: records stay in memory");
        return Ok(Arc::new(MemoryRecordStore::new()));
    }
    let store = SheetsStore::from_config(&config.sheets).context("Failed to set up Google Sheets")?;
    Ok(Arc::new(store))
}

fn show_config(cli: &Cli, config: &ResolvedConfig) {
    println!("Config file: {}", cli.config.display());
    println!("Offers URL: {}", config.site.offers_url);
    println!("Locality: {}", config.site.locality);
    println!(
        "Page load pause: {}",
        format_duration(config.timing.page_load_pause)
    );
    println!(
        "Settle timeout: {}",
        format_duration(config.timing.settle_timeout)
    );
    println!("Offers retry max: {}", config.navigation.offers_retry_max);
    println!("Menu fallback: {}", config.navigation.menu_fallback);
    println!(
        "Restart between accounts: {}",
        config.navigation.restart_between_accounts
    );
    match &config.browser.chrome_path {
        Some(path) => println!("Chrome: {}", path.display()),
        None => println!("Chrome: auto-detect"),
    }
    println!(
        "Spreadsheet: {}",
        config.sheets.spreadsheet_id.as_deref().unwrap_or("(not set)")
    );
    match (&config.sheets.token_path, &config.sheets.service_account_path) {
        (Some(path), _) => println!("Sheets token file: {}", path.display()),
        (None, Some(path)) => println!("Service account key: {}", path.display()),
        (None, None) => println!("Sheets credentials: from environment"),
    }
    println!("Account prefix: {}", config.accounts.env_prefix);
    if let Some(holder) = &config.accounts.priority_holder {
        println!("Priority holder: {holder}");
    }
}

async fn run_maintenance(store: Arc<dyn RecordStore>) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let log = ActivityLog::new(store.clone(), clock.clone());
    ensure_schema(store.as_ref()).await?;
    let summary = reconcile::reconcile(store.as_ref(), &log, clock.today()).await?;
    println!(
        "Removed {} expired and {} duplicate row(s)",
        summary.expired, summary.duplicates
    );
    Ok(())
}

async fn run_scrape(config: &ResolvedConfig, store: Arc<dyn RecordStore>) -> ExitCode {
    let accounts = load_accounts_from_env(&config.accounts.env_prefix);
    if accounts.is_empty() {
        error!(
            prefix = %config.accounts.env_prefix,
            "No accounts configured; set {}_USERNAME_1 and {}_PASSWORD_1",
            config.accounts.env_prefix,
            config.accounts.env_prefix
        );
        return ExitCode::from(1);
    }

    let launcher: Arc<dyn BrowserLauncher> = Arc::new(ChromeLauncher::new(config.browser.clone()));
    let runner = Runner::new(config, launcher, store);
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
        } else {
            std::future::pending::<()>().await;
        }
    };

    let outcome = runner.run_until(accounts, interrupt).await;
    match &outcome {
        RunOutcome::Completed(summary) => {
            let appended: usize = summary.accounts.iter().map(|a| a.appended()).sum();
            println!(
                "Run complete: {} account(s), {appended} new offer(s)",
                summary.accounts.len()
            );
        }
        RunOutcome::BrowserClosed(_) => {
            println!("Browser window closed - run ended early.");
        }
        RunOutcome::Failed(err) => {
            eprintln!("Fatal error: {err:#}");
        }
    }
    ExitCode::from(outcome.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config_dir = cli.config.parent().unwrap_or_else(|| Path::new(""));
    if let Err(err) = load_dotenv(config_dir) {
        eprintln!("{err:#}");
        return ExitCode::from(1);
    }

    let config = match ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load offerbook config: {}", cli.config.display()))
    {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(1);
        }
    };

    match cli.command {
        Some(Command::Config) => {
            show_config(&cli, &config);
            ExitCode::SUCCESS
        }
        Some(Command::Accounts) => {
            let mut accounts = load_accounts_from_env(&config.accounts.env_prefix);
            prioritize(&mut accounts, config.accounts.priority_holder.as_deref());
            if accounts.is_empty() {
                println!("No accounts configured.");
            }
            for (n, account) in accounts.iter().enumerate() {
                println!("{}. {} ({})", n + 1, account.holder, account.username);
            }
            ExitCode::SUCCESS
        }
        Some(Command::Reconcile) => {
            let result = match open_store(&config, cli.dry_run) {
                Ok(store) => run_maintenance(store).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    eprintln!("{err:#}");
                    ExitCode::from(1)
                }
            }
        }
        Some(Command::Run) | None => match open_store(&config, cli.dry_run) {
            Ok(store) => run_scrape(&config, store).await,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::from(1)
            }
        },
    }
}
