//! Best-effort healing steps.
//!
//! None of these fail the caller. Each reports what happened as a
//! [`RecoveryOutcome`] so navigation can decide what to try next.

use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::debug;

use crate::browser::wait::{pause, poll_until};
use crate::browser::{is_session_closed, Browser, Locator};

use super::{detect, selectors, SiteContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The step ran and changed something.
    Recovered,
    /// The condition the step heals was not present.
    NotApplicable,
    /// The step looked but found nothing to act on.
    NothingFound,
    Failed(String),
}

impl RecoveryOutcome {
    pub fn recovered(&self) -> bool {
        matches!(self, RecoveryOutcome::Recovered)
    }

    fn failed(err: &anyhow::Error) -> Self {
        RecoveryOutcome::Failed(format!("{err:#}"))
    }
}

/// Wait for a clickable match of `locator` and click it.
async fn click_when_ready(
    ctx: &SiteContext<'_>,
    locator: Locator,
    timeout: Duration,
) -> Result<bool> {
    let browser = ctx.browser;
    let ready = poll_until(timeout, ctx.timing.poll_interval, move || async move {
        matches!(browser.first_clickable(locator).await, Ok(Some(_)))
    })
    .await;
    if !ready {
        return Ok(false);
    }
    match browser.first_clickable(locator).await? {
        Some(index) => {
            browser.click(locator, index).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Click every visible popup-dismissal control, scanning until one scan
/// clicks something or `timeout` runs out.
pub async fn dismiss_transient_popups(ctx: &SiteContext<'_>, timeout: Duration) -> RecoveryOutcome {
    let browser = ctx.browser;
    let deadline = Instant::now() + timeout;
    loop {
        let mut clicked = 0usize;
        for locator in selectors::POPUP_DISMISS {
            let elements = match browser.elements(locator).await {
                Ok(elements) => elements,
                Err(err) if is_session_closed(&err) => return RecoveryOutcome::failed(&err),
                Err(_) => continue,
            };
            // Back to front so a click that removes its element keeps earlier indices valid.
            for index in (0..elements.len()).rev() {
                if !elements[index].visible {
                    continue;
                }
                if browser.click(locator, index).await.is_ok() {
                    clicked += 1;
                    pause(ctx.timing.action_pause).await;
                }
            }
        }
        if clicked > 0 {
            debug!(clicked, "Dismissed popups");
            return RecoveryOutcome::Recovered;
        }
        if Instant::now() >= deadline {
            return RecoveryOutcome::NothingFound;
        }
        pause(ctx.timing.poll_interval).await;
    }
}

/// On a "page not found" view, follow its "Return to your account" control.
pub async fn bounce_from_not_found(ctx: &SiteContext<'_>, timeout: Duration) -> RecoveryOutcome {
    if !detect::not_found_page_visible(ctx.browser).await {
        return RecoveryOutcome::NotApplicable;
    }
    match click_when_ready(ctx, selectors::RETURN_TO_ACCOUNT, timeout).await {
        Ok(true) => {
            pause(ctx.timing.recovery_pause).await;
            ctx.log
                .info("nav", "Recovered via 'Return to your account'")
                .await;
            RecoveryOutcome::Recovered
        }
        Ok(false) => RecoveryOutcome::NothingFound,
        Err(err) => RecoveryOutcome::failed(&err),
    }
}

/// Reach the offers view through the site's own menu, keeping app state.
pub async fn navigate_via_menu(ctx: &SiteContext<'_>, timeout: Duration) -> RecoveryOutcome {
    let browser = ctx.browser;
    let menu_present = poll_until(timeout, ctx.timing.poll_interval, move || async move {
        browser
            .exists(selectors::REWARDS_MENU)
            .await
            .unwrap_or(false)
    })
    .await;

    if menu_present {
        let via_menu = async {
            browser.hover(selectors::REWARDS_MENU, 0).await?;
            pause(ctx.timing.action_pause).await;
            click_when_ready(ctx, selectors::MERCHANT_OFFERS_LINK, timeout).await
        };
        match via_menu.await {
            Ok(true) => {
                pause(ctx.timing.page_load_pause).await;
                return RecoveryOutcome::Recovered;
            }
            Ok(false) => {}
            Err(err) if is_session_closed(&err) => return RecoveryOutcome::failed(&err),
            Err(err) => debug!(error = %err, "Rewards menu navigation failed"),
        }
    }

    match click_when_ready(ctx, selectors::OFFERS_HREF_LINK, ctx.timing.popup_timeout).await {
        Ok(true) => {
            pause(ctx.timing.page_load_pause).await;
            RecoveryOutcome::Recovered
        }
        Ok(false) => RecoveryOutcome::NothingFound,
        Err(err) => RecoveryOutcome::failed(&err),
    }
}

/// Visit the home page, then the offers route again.
pub async fn re_anchor_via_home(ctx: &SiteContext<'_>) -> RecoveryOutcome {
    let mut failure = None;
    if let Err(err) = ctx.browser.goto(&ctx.site.home_url).await {
        failure = Some(err);
    } else {
        pause(ctx.timing.recovery_pause).await;
    }
    match ctx.browser.goto(&ctx.site.offers_url).await {
        Ok(()) => pause(ctx.timing.page_load_pause).await,
        Err(err) => failure = Some(err),
    }
    match failure {
        Some(err) => RecoveryOutcome::failed(&err),
        None => RecoveryOutcome::Recovered,
    }
}

/// Clear `localStorage` and `sessionStorage`.
pub async fn clear_client_storage(browser: &dyn Browser) -> RecoveryOutcome {
    match browser
        .execute_script("window.localStorage.clear(); window.sessionStorage.clear();")
        .await
    {
        Ok(_) => RecoveryOutcome::Recovered,
        Err(err) => RecoveryOutcome::failed(&err),
    }
}

/// Navigate to `url`, retrying when the load lands on a "not found" page.
///
/// Popups are dismissed after every load. Returns the last navigation error
/// when every try failed outright; a persistent 404 is not an error.
pub async fn robust_get(ctx: &SiteContext<'_>, url: &str, tries: u32) -> Result<()> {
    let mut last_error = None;
    for attempt in 1..=tries {
        match ctx.browser.goto(url).await {
            Ok(()) => {
                pause(ctx.timing.page_load_pause).await;
                dismiss_transient_popups(ctx, ctx.timing.popup_timeout).await;
                if !detect::not_found_page_visible(ctx.browser).await {
                    return Ok(());
                }
                ctx.log
                    .warn(
                        "nav",
                        format!("Not Found on try {attempt} for {url} - retrying"),
                    )
                    .await;
                last_error = None;
            }
            Err(err) if is_session_closed(&err) => return Err(err),
            Err(err) => {
                ctx.log
                    .warn("nav", format!("navigation failed (try {attempt}): {err:#}"))
                    .await;
                last_error = Some(err);
            }
        }
        pause(ctx.timing.retry_backoff).await;
    }
    match last_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
