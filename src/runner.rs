//! Run orchestration: every account in turn, then worksheet maintenance.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityLog;
use crate::browser::wait::pause;
use crate::browser::{is_session_closed, Browser, BrowserLauncher};
use crate::clock::{Clock, SystemClock};
use crate::config::{NavigationConfig, ResolvedConfig, SiteConfig, TimingConfig};
use crate::credentials::{prioritize, Account};
use crate::models::{OfferKey, OfferRecord, OFFER_SHEET};
use crate::offers::{enumerate_cards, scrape_card, CardOutcome, ScrapeContext};
use crate::reconcile::{self, ReconcileSummary};
use crate::site::{
    authenticate, check_interrupted, logout, reach_offers_page, NavigationReport, SiteContext,
};
use crate::store::{ensure_schema, RecordStore};

/// One card's result within an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardReport {
    pub label: String,
    pub outcome: CardOutcome,
}

/// What happened for one account.
#[derive(Debug, Clone, Default)]
pub struct AccountReport {
    pub holder: String,
    pub logged_in: bool,
    pub navigation: Option<NavigationReport>,
    pub cards: Vec<CardReport>,
    /// Offer keys added to the seen set during this account.
    pub recorded: usize,
    /// Set when the account stopped on an unexpected error.
    pub aborted: Option<String>,
}

impl AccountReport {
    fn new(holder: &str) -> Self {
        Self {
            holder: holder.to_string(),
            ..Default::default()
        }
    }

    pub fn appended(&self) -> usize {
        self.cards.iter().map(|card| card.outcome.appended).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub accounts: Vec<AccountReport>,
    /// `None` when the run ended before maintenance.
    pub reconcile: Option<ReconcileSummary>,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The browser went away (closed window or interrupt). Not a failure.
    BrowserClosed(RunSummary),
    Failed(anyhow::Error),
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Completed(_) | RunOutcome::BrowserClosed(_) => 0,
            RunOutcome::Failed(_) => 1,
        }
    }
}

/// Drives accounts through one browser at a time.
pub struct Runner {
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    log: ActivityLog,
    site: SiteConfig,
    timing: TimingConfig,
    navigation: NavigationConfig,
    priority_holder: Option<String>,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(
        config: &ResolvedConfig,
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            launcher,
            log: ActivityLog::new(store.clone(), clock.clone()),
            store,
            clock,
            site: config.site.clone(),
            timing: config.timing.clone(),
            navigation: config.navigation.clone(),
            priority_holder: config.accounts.priority_holder.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.log = ActivityLog::new(self.store.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    fn site_context<'a>(&'a self, browser: &'a dyn Browser) -> SiteContext<'a> {
        SiteContext {
            browser,
            site: &self.site,
            timing: &self.timing,
            navigation: &self.navigation,
            log: &self.log,
            shutdown: &self.shutdown,
        }
    }

    async fn launch(&self) -> Result<Box<dyn Browser>> {
        let browser = self.launcher.launch().await?;
        pause(self.timing.new_window_settle).await;
        Ok(browser)
    }

    async fn quit(browser: Box<dyn Browser>) {
        if let Err(err) = browser.quit().await {
            debug!(error = %format!("{err:#}"), "Browser quit failed");
        }
    }

    /// Every offer key already in the store.
    async fn seed_seen(&self) -> Result<HashSet<OfferKey>> {
        let rows = self.store.read_all_rows(OFFER_SHEET).await?;
        Ok(rows
            .iter()
            .skip(1)
            .map(|row| OfferRecord::from_row(row).key())
            .collect())
    }

    /// Log in, reach the offers page and scrape each card, stopping at the
    /// first card whose offers never load. Logs out at the end unless the
    /// browser is gone.
    pub async fn scrape_account(
        &self,
        browser: &dyn Browser,
        account: &Account,
    ) -> Result<AccountReport> {
        let ctx = self.site_context(browser);
        let mut report = AccountReport::new(&account.holder);

        if !authenticate(&ctx, &account.username, &account.password).await? {
            return Ok(report);
        }
        report.logged_in = true;
        ctx.check_interrupted()?;

        let navigation = reach_offers_page(&ctx, self.navigation.offers_retry_max).await?;
        let arrived = navigation.arrived;
        report.navigation = Some(navigation);
        if !arrived {
            logout(&ctx).await;
            return Ok(report);
        }

        let mut seen = self.seed_seen().await?;
        let seeded = seen.len();

        let cards = match enumerate_cards(&ctx).await {
            Ok(cards) => cards,
            Err(err) if is_session_closed(&err) => return Err(err),
            Err(err) => {
                self.log.error("card_list", format!("{err:#}")).await;
                Vec::new()
            }
        };

        let scrape_ctx = ScrapeContext {
            site: ctx,
            store: self.store.as_ref(),
            clock: self.clock.as_ref(),
        };
        for label in &cards {
            ctx.check_interrupted()?;
            let outcome = scrape_card(&scrape_ctx, label, &account.holder, &mut seen).await?;
            report.cards.push(CardReport {
                label: label.clone(),
                outcome,
            });
            if !outcome.loaded {
                break;
            }
        }
        report.recorded = seen.len() - seeded;

        logout(&ctx).await;
        Ok(report)
    }

    async fn run_accounts(
        &self,
        accounts: &[Account],
        session: &mut Option<Box<dyn Browser>>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        ensure_schema(self.store.as_ref()).await?;

        for (i, account) in accounts.iter().enumerate() {
            check_interrupted(&self.shutdown)?;
            let browser = match session.take() {
                Some(browser) => browser,
                None => self.launch().await?,
            };
            let browser = session.insert(browser);

            self.log
                .info("account", format!("start {}", account.holder))
                .await;
            let report = match self.scrape_account(browser.as_ref(), account).await {
                Ok(report) => report,
                Err(err) if is_session_closed(&err) => return Err(err),
                Err(err) => {
                    self.log
                        .error(
                            "account",
                            format!("{} aborted: {err:#}", account.holder),
                        )
                        .await;
                    logout(&self.site_context(browser.as_ref())).await;
                    AccountReport {
                        aborted: Some(format!("{err:#}")),
                        ..AccountReport::new(&account.holder)
                    }
                }
            };
            info!(
                holder = %report.holder,
                appended = report.appended(),
                cards = report.cards.len(),
                "Account finished"
            );
            summary.accounts.push(report);

            if self.navigation.restart_between_accounts && i + 1 < accounts.len() {
                if let Some(old) = session.take() {
                    Self::quit(old).await;
                }
                debug!("Restarting browser for the next account");
                *session = Some(self.launch().await?);
            }
        }

        let today = self.clock.today();
        summary.reconcile =
            Some(reconcile::reconcile(self.store.as_ref(), &self.log, today).await?);
        self.log.info("main", "COMPLETE").await;
        Ok(())
    }

    /// Run every account until done or until `shutdown` resolves.
    ///
    /// Shutdown is treated like a closed browser. The run is not dropped
    /// mid-step: it stops at the next offer, card or account boundary, so the
    /// current card's captured rows are still written. The browser is quit on
    /// every path. A runner is spent once shut down.
    pub async fn run_until<F>(&self, mut accounts: Vec<Account>, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        prioritize(&mut accounts, self.priority_holder.as_deref());

        let mut session = None;
        let mut summary = RunSummary::default();
        let result = {
            let run = self.run_accounts(&accounts, &mut session, &mut summary);
            tokio::pin!(run);
            tokio::select! {
                biased;
                () = shutdown => {
                    info!("Shutdown requested; stopping at the next safe point");
                    self.shutdown.cancel();
                    run.await
                }
                result = &mut run => result,
            }
        };

        if let Some(browser) = session.take() {
            Self::quit(browser).await;
        }

        match result {
            Ok(()) => RunOutcome::Completed(summary),
            Err(err) if is_session_closed(&err) => {
                warn!(error = %format!("{err:#}"), "Browser closed; ending run");
                self.log
                    .warn("main", format!("Browser closed - {err:#}"))
                    .await;
                RunOutcome::BrowserClosed(summary)
            }
            Err(err) => {
                self.log.error("main", format!("Fatal: {err:#}")).await;
                RunOutcome::Failed(err)
            }
        }
    }

    pub async fn run(&self, accounts: Vec<Account>) -> RunOutcome {
        self.run_until(accounts, std::future::pending()).await
    }
}
