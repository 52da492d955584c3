//! Reaching the merchant-offers view.
//!
//! The site's routing is unreliable: direct loads bounce to 404s, the grid
//! sometimes never renders, and a stale client cache can pin a broken state.
//! Navigation is an explicit state machine. [`transition`] is the whole
//! policy and is pure; [`reach_offers_page`] performs each state's action and
//! feeds the result back in.

use anyhow::Result;
use tracing::debug;

use crate::browser::is_session_closed;
use crate::browser::wait::{pause, poll_until};

use super::recovery::{self, RecoveryOutcome};
use super::{detect, SiteContext};

/// Where a successful navigation landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Direct,
    Menu,
    HomeBridge,
    Refresh,
}

impl Checkpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checkpoint::Direct => "direct",
            Checkpoint::Menu => "menu",
            Checkpoint::HomeBridge => "home-bridge",
            Checkpoint::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    /// Clear client storage and bounce off any 404.
    Stale,
    /// Load the offers route directly.
    Direct,
    /// Wait for any page signal, then check arrival.
    Settle,
    /// Use the in-app rewards menu.
    Menu,
    MenuSettle,
    /// Visit home, then the offers route.
    HomeBridge,
    Refresh,
    /// Pause before the next attempt.
    Backoff,
    Arrived(Checkpoint),
    Exhausted,
}

/// Knobs for [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavPolicy {
    pub max_attempts: u32,
    pub menu_fallback: bool,
    pub home_bridge_from_attempt: u32,
}

/// Next state and attempt number.
///
/// `ok` is the result of the state just run: arrival for the check states
/// (`Settle`, `MenuSettle`, `HomeBridge`, `Refresh`), whether the menu
/// navigation went through for `Menu`. Other states ignore it.
pub fn transition(state: NavState, attempt: u32, ok: bool, policy: &NavPolicy) -> (NavState, u32) {
    let escalate = || {
        if attempt >= policy.home_bridge_from_attempt {
            NavState::HomeBridge
        } else {
            NavState::Refresh
        }
    };

    let next = match state {
        NavState::Stale => NavState::Direct,
        NavState::Direct => NavState::Settle,
        NavState::Settle if ok => NavState::Arrived(Checkpoint::Direct),
        NavState::Settle if policy.menu_fallback => NavState::Menu,
        NavState::Settle => escalate(),
        NavState::Menu if ok => NavState::MenuSettle,
        NavState::Menu => escalate(),
        NavState::MenuSettle if ok => NavState::Arrived(Checkpoint::Menu),
        NavState::MenuSettle => escalate(),
        NavState::HomeBridge if ok => NavState::Arrived(Checkpoint::HomeBridge),
        NavState::HomeBridge => NavState::Refresh,
        NavState::Refresh if ok => NavState::Arrived(Checkpoint::Refresh),
        NavState::Refresh => NavState::Backoff,
        NavState::Backoff if attempt < policy.max_attempts => {
            return (NavState::Stale, attempt + 1);
        }
        NavState::Backoff => NavState::Exhausted,
        terminal @ (NavState::Arrived(_) | NavState::Exhausted) => terminal,
    };
    (next, attempt)
}

/// Checkpoint to report for an arrival. A refresh that lands after the menu
/// went through this attempt is credited to the menu.
pub fn credited_checkpoint(checkpoint: Checkpoint, used_menu: bool) -> Checkpoint {
    match checkpoint {
        Checkpoint::Refresh if used_menu => Checkpoint::Menu,
        other => other,
    }
}

/// Outcome of [`reach_offers_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationReport {
    pub arrived: bool,
    /// Attempt during which navigation ended.
    pub attempts: u32,
    pub checkpoint: Option<Checkpoint>,
    /// Every state entered, in order.
    pub trail: Vec<NavState>,
}

/// The one success test: on the offers route, and either the grid shows or
/// no error toast does. A hidden grid with no toast counts as arrived.
///
/// Only a closed browser is an error.
pub async fn arrived(ctx: &SiteContext<'_>) -> Result<bool> {
    let url = match ctx.browser.current_url().await {
        Ok(url) => url,
        Err(err) if is_session_closed(&err) => return Err(err),
        Err(_) => return Ok(false),
    };
    if !url.contains(&ctx.site.offers_route_marker) {
        return Ok(false);
    }
    Ok(detect::offers_grid_visible(ctx.browser).await
        || !detect::toast_error_visible(ctx.browser).await)
}

async fn settle(ctx: &SiteContext<'_>, include_not_found: bool) {
    let browser = ctx.browser;
    poll_until(
        ctx.timing.settle_timeout,
        ctx.timing.poll_interval,
        move || async move { detect::offers_page_settled(browser, include_not_found).await },
    )
    .await;
}

/// Drive the navigation machine until the offers view is reached or
/// `max_attempts` are used up. Exhaustion is a failed report, not an error;
/// only a closed browser propagates.
pub async fn reach_offers_page(ctx: &SiteContext<'_>, max_attempts: u32) -> Result<NavigationReport> {
    let policy = NavPolicy {
        max_attempts: max_attempts.max(1),
        menu_fallback: ctx.navigation.menu_fallback,
        home_bridge_from_attempt: ctx.navigation.home_bridge_from_attempt,
    };

    let mut state = NavState::Stale;
    let mut attempt = 1;
    let mut trail = Vec::new();
    // The menu navigation went through during the current attempt.
    let mut used_menu = false;

    loop {
        trail.push(state);
        debug!(?state, attempt, "Navigation state");

        let ok = match state {
            NavState::Stale => {
                used_menu = false;
                if let RecoveryOutcome::Failed(reason) =
                    recovery::clear_client_storage(ctx.browser).await
                {
                    debug!(%reason, "Could not clear client storage");
                }
                if recovery::bounce_from_not_found(ctx, ctx.timing.element_timeout)
                    .await
                    .recovered()
                {
                    pause(ctx.timing.retry_backoff).await;
                }
                true
            }
            NavState::Direct => {
                if let Err(err) = recovery::robust_get(ctx, &ctx.site.offers_url, 2).await {
                    if is_session_closed(&err) {
                        return Err(err);
                    }
                    ctx.log
                        .warn(
                            "nav",
                            format!("direct offers load failed (try {attempt}): {err:#}"),
                        )
                        .await;
                }
                true
            }
            NavState::Settle => {
                settle(ctx, true).await;
                arrived(ctx).await?
            }
            NavState::Menu => {
                used_menu = recovery::navigate_via_menu(ctx, ctx.timing.element_timeout)
                    .await
                    .recovered();
                used_menu
            }
            NavState::MenuSettle => {
                settle(ctx, false).await;
                arrived(ctx).await?
            }
            NavState::HomeBridge => {
                recovery::re_anchor_via_home(ctx).await;
                arrived(ctx).await?
            }
            NavState::Refresh => {
                if let Err(err) = ctx.browser.refresh().await {
                    if is_session_closed(&err) {
                        return Err(err);
                    }
                    debug!(error = %err, "Refresh failed");
                }
                pause(ctx.timing.page_load_pause).await;
                arrived(ctx).await?
            }
            NavState::Backoff => {
                ctx.log
                    .warn(
                        "nav",
                        format!("offers not ready - retrying ({attempt}/{})", policy.max_attempts),
                    )
                    .await;
                pause(ctx.timing.retry_backoff).await;
                true
            }
            NavState::Arrived(checkpoint) => {
                let checkpoint = credited_checkpoint(checkpoint, used_menu);
                ctx.log
                    .info(
                        "nav",
                        format!("offers ready ({}, try {attempt})", checkpoint.as_str()),
                    )
                    .await;
                return Ok(NavigationReport {
                    arrived: true,
                    attempts: attempt,
                    checkpoint: Some(checkpoint),
                    trail,
                });
            }
            NavState::Exhausted => {
                ctx.log
                    .error("nav", "could not reach merchant offers after login")
                    .await;
                return Ok(NavigationReport {
                    arrived: false,
                    attempts: attempt,
                    checkpoint: None,
                    trail,
                });
            }
        };

        (state, attempt) = transition(state, attempt, ok, &policy);
    }
}
