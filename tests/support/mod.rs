use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use offerbook::activity::ActivityLog;
use offerbook::browser::{Browser, BrowserError, BrowserLauncher, ElementInfo, Key, Locator};
use offerbook::clock::FixedClock;
use offerbook::config::{ResolvedConfig, SiteConfig, TimingConfig};
use offerbook::credentials::Account;
use offerbook::models::LOG_SHEET;
use offerbook::site::{selectors, SiteContext};
use offerbook::store::{ensure_schema, MemoryRecordStore};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;

pub const DASHBOARD_URL: &str = "https://online.citi.com/US/ag/dashboard";
pub const NOT_FOUND_URL: &str = "https://online.citi.com/US/ag/not-found";
pub const PLACEHOLDER_OPTION: &str = "Credit";

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::on_date(today()))
}

/// Defaults with every pause and wait bound set to zero.
pub fn test_config(dir: &Path) -> ResolvedConfig {
    let mut config = ResolvedConfig::load_with_env(&dir.join("offerbook.toml"), |_| None)
        .expect("default config");
    config.timing = TimingConfig::instant();
    config
}

pub fn account(username: &str, password: &str, holder: &str) -> Account {
    Account {
        username: username.to_string(),
        password: SecretString::from(password.to_string()),
        holder: holder.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct FakeOffer {
    pub brand: String,
    pub title: String,
    pub body: String,
    pub expiration: String,
    pub enrolled: bool,
    /// Enroll clicks that show the error overlay before one succeeds.
    pub enroll_errors: u32,
}

impl FakeOffer {
    pub fn new(brand: &str, title: &str, body: &str, expiration: &str) -> Self {
        Self {
            brand: brand.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            expiration: expiration.to_string(),
            enrolled: false,
            enroll_errors: 0,
        }
    }

    pub fn already_enrolled(mut self) -> Self {
        self.enrolled = true;
        self
    }

    pub fn with_enroll_errors(mut self, errors: u32) -> Self {
        self.enroll_errors = errors;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakeCard {
    pub label: String,
    pub offers: Vec<FakeOffer>,
    /// Show-more clicks needed before the list is fully expanded.
    pub show_more: u32,
}

impl FakeCard {
    pub fn new(label: &str, offers: Vec<FakeOffer>) -> Self {
        Self {
            label: label.to_string(),
            offers,
            show_more: 0,
        }
    }

    pub fn with_show_more(mut self, clicks: u32) -> Self {
        self.show_more = clicks;
        self
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub url: String,
    pub closed: bool,
    pub logged_in: bool,
    pub typed_username: String,
    pub typed_password: String,
    pub credentials: HashMap<String, String>,
    pub cards: Vec<FakeCard>,
    pub selected: usize,
    pub dropdown_open: bool,
    /// `(card, offer)` of the open detail dialog.
    pub modal: Option<(usize, usize)>,
    pub error_overlay: bool,
    pub popup: bool,
    /// The grid never renders, but no error shows either.
    pub grid_hidden: bool,
    pub toast: bool,
    /// A page refresh clears the error toast.
    pub refresh_clears_toast: bool,
    /// Loading the offers URL directly lands on a "not found" page.
    pub direct_404: bool,
    /// Close the window on this enroll click (1-based).
    pub close_on_enroll_click: Option<usize>,
    /// Cancel the token once this enroll click (1-based) has gone through.
    pub cancel_after_enroll_click: Option<(usize, CancellationToken)>,
    /// Login-route loads that come up without the sign-on form.
    pub login_form_missing_loads: usize,
    pub login_form_missing: bool,

    pub gotos: Vec<String>,
    pub logouts: usize,
    pub cookie_clears: usize,
    pub refreshes: usize,
    pub launches: usize,
    pub quits: usize,
    pub enroll_clicks: usize,
    pub tab_clicks: usize,
    pub storage_clears: usize,
}

/// Scripted stand-in for the merchant-offers site.
pub struct FakeSite {
    site: SiteConfig,
    state: Mutex<FakeState>,
}

impl FakeSite {
    pub fn new(site: &SiteConfig, cards: Vec<FakeCard>) -> Arc<Self> {
        Arc::new(Self {
            site: site.clone(),
            state: Mutex::new(FakeState {
                url: "about:blank".to_string(),
                cards,
                ..Default::default()
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn allow_login(&self, username: &str, password: &str) {
        self.state()
            .credentials
            .insert(username.to_string(), password.to_string());
    }

    /// Already signed in and looking at the offers page.
    pub fn start_on_offers_page(&self) {
        let mut state = self.state();
        state.logged_in = true;
        state.url = self.site.offers_url.clone();
    }

    pub fn browser(self: &Arc<Self>) -> FakeBrowser {
        FakeBrowser { site: self.clone() }
    }
}

fn closed() -> anyhow::Error {
    BrowserError::SessionClosed("fake window closed".to_string()).into()
}

fn visible(count: usize, text: &str) -> Vec<ElementInfo> {
    (0..count).map(|_| ElementInfo::visible(text)).collect()
}

impl FakeState {
    fn on_login_page(&self, site: &SiteConfig) -> bool {
        !self.logged_in && self.url == site.login_url
    }

    fn login_form_shown(&self, site: &SiteConfig) -> bool {
        self.on_login_page(site) && !self.login_form_missing
    }

    fn on_offers_page(&self, site: &SiteConfig) -> bool {
        self.logged_in && self.url.contains(&site.offers_route_marker)
    }

    fn card(&self) -> Option<&FakeCard> {
        self.cards.get(self.selected)
    }

    fn unenrolled(&self) -> Vec<usize> {
        self.card()
            .map(|card| {
                card.offers
                    .iter()
                    .enumerate()
                    .filter(|(_, offer)| !offer.enrolled)
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn modal_offer(&self) -> Option<&FakeOffer> {
        let (card, offer) = self.modal?;
        self.cards.get(card)?.offers.get(offer)
    }

    fn option_labels(&self) -> Vec<String> {
        std::iter::once(PLACEHOLDER_OPTION.to_string())
            .chain(self.cards.iter().map(|card| card.label.clone()))
            .collect()
    }

    fn submit_login(&mut self) {
        let accepted = self
            .credentials
            .get(&self.typed_username)
            .is_some_and(|password| *password == self.typed_password);
        if accepted {
            self.logged_in = true;
            self.url = DASHBOARD_URL.to_string();
        }
    }
}

pub struct FakeBrowser {
    site: Arc<FakeSite>,
}

impl FakeBrowser {
    fn lock(&self) -> Result<MutexGuard<'_, FakeState>> {
        let state = self.site.state();
        if state.closed {
            return Err(closed());
        }
        Ok(state)
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn goto(&self, url: &str) -> Result<()> {
        let site = &self.site.site;
        let mut state = self.lock()?;
        state.gotos.push(url.to_string());
        state.modal = None;
        state.dropdown_open = false;
        if url == site.logout_url {
            state.logouts += 1;
            state.logged_in = false;
            state.url = site.login_url.clone();
        } else if url == site.offers_url && state.direct_404 {
            state.url = NOT_FOUND_URL.to_string();
        } else if url == site.login_url {
            state.login_form_missing = state.login_form_missing_loads > 0;
            state.login_form_missing_loads = state.login_form_missing_loads.saturating_sub(1);
            state.url = url.to_string();
        } else {
            state.url = url.to_string();
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock()?.url.clone())
    }

    async fn refresh(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.refreshes += 1;
        if state.refresh_clears_toast {
            state.toast = false;
        }
        state.modal = None;
        state.dropdown_open = false;
        Ok(())
    }

    async fn elements(&self, locator: Locator) -> Result<Vec<ElementInfo>> {
        let site = &self.site.site;
        let state = self.lock()?;
        let on_offers = state.on_offers_page(site);
        let on_login = state.login_form_shown(site);

        let found = if locator == selectors::USERNAME_FIELDS[0]
            || locator == selectors::PASSWORD_FIELDS[0]
            || locator == selectors::SIGN_ON_BUTTONS[0]
        {
            visible(usize::from(on_login), "")
        } else if locator == selectors::POPUP_DISMISS[0] {
            visible(usize::from(state.popup), "No thanks")
        } else if locator == selectors::NOT_FOUND {
            visible(usize::from(state.url == NOT_FOUND_URL), "Page not found")
        } else if locator == selectors::RETURN_TO_ACCOUNT {
            visible(usize::from(state.url == NOT_FOUND_URL), "Return to your account")
        } else if locator == selectors::REWARDS_MENU {
            visible(usize::from(state.logged_in), "Rewards & Offers")
        } else if locator == selectors::MERCHANT_OFFERS_LINK {
            visible(usize::from(state.logged_in), "Merchant Offers")
        } else if locator == selectors::TOAST_ERROR {
            visible(usize::from(on_offers && state.toast), "We're having trouble loading your offers")
        } else if locator == selectors::OFFER_TILE {
            let tiles = match state.card() {
                Some(card) if on_offers && !state.grid_hidden => card.offers.len(),
                _ => 0,
            };
            visible(tiles, "offer")
        } else if locator == selectors::TAB_ENROLLED {
            visible(usize::from(on_offers), "Enrolled")
        } else if locator == selectors::TAB_ALL {
            visible(usize::from(on_offers), "All")
        } else if locator == selectors::CARD_DROPDOWN_BUTTON {
            visible(usize::from(on_offers), "")
        } else if locator == selectors::CARD_OPTIONS {
            if state.dropdown_open {
                state
                    .option_labels()
                    .into_iter()
                    .map(ElementInfo::visible)
                    .collect()
            } else {
                Vec::new()
            }
        } else if locator == selectors::CARD_LABEL {
            match state.card() {
                Some(card) if on_offers => vec![ElementInfo::visible(card.label.clone())],
                _ => Vec::new(),
            }
        } else if locator == selectors::SHOW_MORE {
            let pending = state.card().map_or(0, |card| card.show_more);
            visible(usize::from(on_offers && pending > 0), "Show more")
        } else if locator == selectors::ENROLL_ICON {
            if on_offers && !state.grid_hidden {
                visible(state.unenrolled().len(), "")
            } else {
                Vec::new()
            }
        } else if locator == selectors::ENROLLED_TILE {
            let enrolled = state
                .card()
                .map_or(0, |card| card.offers.iter().filter(|o| o.enrolled).count());
            visible(if on_offers { enrolled } else { 0 }, "Enrolled")
        } else if locator == selectors::ENROLLMENT_ERROR {
            visible(usize::from(state.error_overlay), "Unable to enroll merchant offer")
        } else if locator == selectors::MODAL_MERCHANT_NAME {
            state
                .modal_offer()
                .map(|offer| vec![ElementInfo::visible(offer.brand.clone())])
                .unwrap_or_default()
        } else if locator == selectors::MODAL_OFFER_TITLE {
            state
                .modal_offer()
                .map(|offer| vec![ElementInfo::visible(offer.title.clone())])
                .unwrap_or_default()
        } else if locator == selectors::MODAL_BODY {
            state
                .modal_offer()
                .map(|offer| vec![ElementInfo::visible(offer.body.clone())])
                .unwrap_or_default()
        } else if locator == selectors::MODAL_EXPIRATION {
            state
                .modal_offer()
                .map(|offer| vec![ElementInfo::visible(offer.expiration.clone())])
                .unwrap_or_default()
        } else if locator == selectors::MODAL_CLOSE_BUTTONS[0] {
            visible(usize::from(state.modal.is_some()), "Close")
        } else if locator == selectors::PAGE_BODY {
            let text = match (state.modal_offer(), state.card()) {
                (Some(offer), Some(card)) => {
                    format!("{}\nOffer for: {}\n{}", offer.title, card.label, offer.body)
                }
                _ => String::new(),
            };
            vec![ElementInfo::visible(text)]
        } else {
            Vec::new()
        };
        Ok(found)
    }

    async fn click(&self, locator: Locator, index: usize) -> Result<()> {
        let site = self.site.site.clone();
        let mut state = self.lock()?;
        let missing = || BrowserError::NoSuchElement(locator.to_string());

        if locator == selectors::SIGN_ON_BUTTONS[0] {
            if !state.login_form_shown(&site) {
                return Err(missing().into());
            }
            state.submit_login();
        } else if locator == selectors::POPUP_DISMISS[0] {
            state.popup = false;
        } else if locator == selectors::RETURN_TO_ACCOUNT {
            state.url = DASHBOARD_URL.to_string();
        } else if locator == selectors::MERCHANT_OFFERS_LINK {
            if !state.logged_in {
                return Err(missing().into());
            }
            state.url = site.offers_url.clone();
        } else if locator == selectors::TAB_ENROLLED || locator == selectors::TAB_ALL {
            state.tab_clicks += 1;
        } else if locator == selectors::CARD_DROPDOWN_BUTTON {
            state.dropdown_open = true;
        } else if locator == selectors::CARD_OPTIONS {
            if !state.dropdown_open || index >= state.option_labels().len() {
                return Err(missing().into());
            }
            if index > 0 {
                state.selected = index - 1;
            }
            state.dropdown_open = false;
        } else if locator == selectors::SHOW_MORE {
            let selected = state.selected;
            match state.cards.get_mut(selected) {
                Some(card) if card.show_more > 0 => card.show_more -= 1,
                _ => return Err(missing().into()),
            }
        } else if locator == selectors::ENROLL_ICON {
            state.enroll_clicks += 1;
            if state.close_on_enroll_click == Some(state.enroll_clicks) {
                state.closed = true;
                return Err(closed());
            }
            let offer_index = *state.unenrolled().get(index).ok_or_else(missing)?;
            let selected = state.selected;
            let offer = &mut state.cards[selected].offers[offer_index];
            if offer.enroll_errors > 0 {
                offer.enroll_errors -= 1;
                state.error_overlay = true;
            } else {
                offer.enrolled = true;
                state.modal = Some((selected, offer_index));
            }
            if let Some((click, token)) = &state.cancel_after_enroll_click {
                if *click == state.enroll_clicks {
                    token.cancel();
                }
            }
        } else if locator == selectors::MODAL_CLOSE_BUTTONS[0] {
            if state.modal.take().is_none() {
                return Err(missing().into());
            }
        } else {
            return Err(missing().into());
        }
        Ok(())
    }

    async fn hover(&self, locator: Locator, _index: usize) -> Result<()> {
        let state = self.lock()?;
        if locator == selectors::REWARDS_MENU && state.logged_in {
            Ok(())
        } else {
            Err(BrowserError::NoSuchElement(locator.to_string()).into())
        }
    }

    async fn type_text(&self, locator: Locator, _index: usize, text: &str) -> Result<()> {
        let mut state = self.lock()?;
        if locator == selectors::USERNAME_FIELDS[0] {
            state.typed_username = text.to_string();
        } else if locator == selectors::PASSWORD_FIELDS[0] {
            state.typed_password = text.to_string();
        } else {
            return Err(BrowserError::NoSuchElement(locator.to_string()).into());
        }
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        let site = self.site.site.clone();
        let mut state = self.lock()?;
        match key {
            Key::Escape => {
                state.error_overlay = false;
                state.dropdown_open = false;
                state.modal = None;
            }
            Key::Enter => {
                if state.login_form_shown(&site) {
                    state.submit_login();
                }
            }
        }
        Ok(())
    }

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value> {
        let mut state = self.lock()?;
        if script.contains("localStorage.clear()") {
            state.storage_clears += 1;
        }
        Ok(serde_json::Value::Null)
    }

    async fn delete_cookies(&self) -> Result<()> {
        self.lock()?.cookie_clears += 1;
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        let mut state = self.site.state();
        state.quits += 1;
        if state.closed {
            return Err(closed());
        }
        state.closed = true;
        Ok(())
    }
}

/// Hands out windows onto one shared [`FakeSite`]. Each launch starts signed
/// out on a blank page.
pub struct FakeLauncher {
    site: Arc<FakeSite>,
}

impl FakeLauncher {
    pub fn new(site: Arc<FakeSite>) -> Arc<Self> {
        Arc::new(Self { site })
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        {
            let mut state = self.site.state();
            state.launches += 1;
            state.closed = false;
            state.logged_in = false;
            state.modal = None;
            state.error_overlay = false;
            state.url = "about:blank".to_string();
        }
        Ok(Box::new(self.site.browser()))
    }
}

/// Config, store and activity log shared by one test.
pub struct Harness {
    pub config: ResolvedConfig,
    pub store: Arc<MemoryRecordStore>,
    pub clock: Arc<FixedClock>,
    pub log: ActivityLog,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub async fn new(dir: &Path) -> Result<Self> {
        let store = Arc::new(MemoryRecordStore::new());
        ensure_schema(store.as_ref()).await?;
        let clock = fixed_clock();
        let log = ActivityLog::new(store.clone(), clock.clone());
        Ok(Self {
            config: test_config(dir),
            store,
            clock,
            log,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn site_context<'a>(&'a self, browser: &'a dyn Browser) -> SiteContext<'a> {
        SiteContext {
            browser,
            site: &self.config.site,
            timing: &self.config.timing,
            navigation: &self.config.navigation,
            log: &self.log,
            shutdown: &self.shutdown,
        }
    }

    /// Messages logged under `function`, oldest first.
    pub fn logged(&self, function: &str) -> Vec<String> {
        logged(&self.store, function)
    }
}

pub fn logged(store: &MemoryRecordStore, function: &str) -> Vec<String> {
    store
        .data_rows(LOG_SHEET)
        .into_iter()
        .filter(|row| row.get(2).map(String::as_str) == Some(function))
        .map(|row| row.get(3).cloned().unwrap_or_default())
        .collect()
}
