//! The card dropdown and the offer grid around it.

use anyhow::Result;
use tracing::{debug, warn};

use crate::browser::wait::{pause, poll_until};
use crate::browser::{is_session_closed, normalize_space, Browser, BrowserError, Key};
use crate::site::{detect, selectors, SiteContext};

use super::tolerate;

/// Upper bound on show-more scans, in case a button never goes away.
const MAX_EXPAND_ROUNDS: usize = 50;

/// Normalized text the dropdown currently shows.
async fn current_label(browser: &dyn Browser) -> Option<String> {
    browser
        .text(selectors::CARD_LABEL)
        .await
        .ok()
        .flatten()
        .map(|text| normalize_space(&text))
}

async fn open_dropdown(ctx: &SiteContext<'_>) -> Result<()> {
    let browser = ctx.browser;
    let timeout = ctx.timing.element_timeout;
    let ready = poll_until(timeout, ctx.timing.poll_interval, move || async move {
        matches!(
            browser.first_clickable(selectors::CARD_DROPDOWN_BUTTON).await,
            Ok(Some(_))
        )
    })
    .await;

    let index = match browser.first_clickable(selectors::CARD_DROPDOWN_BUTTON).await? {
        Some(index) if ready => index,
        _ => {
            return Err(BrowserError::Timeout {
                timeout,
                what: "card dropdown".to_string(),
            }
            .into())
        }
    };
    browser.click(selectors::CARD_DROPDOWN_BUTTON, index).await?;
    poll_until(timeout, ctx.timing.poll_interval, move || async move {
        browser.exists(selectors::CARD_OPTIONS).await.unwrap_or(false)
    })
    .await;
    Ok(())
}

/// Index of the option whose normalized text is exactly `label`.
async fn option_index(browser: &dyn Browser, label: &str) -> Result<Option<usize>> {
    Ok(browser
        .elements(selectors::CARD_OPTIONS)
        .await?
        .iter()
        .position(|option| option.visible && normalize_space(&option.text) == label))
}

/// Read every card label from the dropdown without selecting one.
///
/// Empty entries and the placeholder heading are left out.
pub async fn enumerate_cards(ctx: &SiteContext<'_>) -> Result<Vec<String>> {
    open_dropdown(ctx).await?;

    let placeholder = ctx.site.placeholder_card_label.as_str();
    let labels: Vec<String> = ctx
        .browser
        .elements(selectors::CARD_OPTIONS)
        .await?
        .iter()
        .map(|option| normalize_space(&option.text))
        .filter(|label| !label.is_empty() && !label.eq_ignore_ascii_case(placeholder))
        .collect();

    tolerate(ctx.browser.press_key(Key::Escape).await, "closing card dropdown")?;
    debug!(count = labels.len(), ?labels, "Enumerated cards");
    Ok(labels)
}

/// Make `label` the selected card, matching the option text exactly.
pub async fn select_card(ctx: &SiteContext<'_>, label: &str) -> Result<()> {
    let browser = ctx.browser;
    if current_label(browser).await.as_deref() == Some(label) {
        return Ok(());
    }

    open_dropdown(ctx).await?;
    let index = option_index(browser, label)
        .await?
        .ok_or_else(|| BrowserError::NoSuchElement(format!("card option '{label}'")))?;
    browser.click(selectors::CARD_OPTIONS, index).await?;

    let timeout = ctx.timing.element_timeout;
    let switched = poll_until(timeout, ctx.timing.poll_interval, move || async move {
        current_label(browser).await.as_deref() == Some(label)
    })
    .await;
    if !switched {
        return Err(BrowserError::Timeout {
            timeout,
            what: format!("dropdown to show '{label}'"),
        }
        .into());
    }

    debug!(label, "Switched card");
    pause(ctx.timing.card_switch_settle).await;
    Ok(())
}

/// Heal a slow or broken offer grid.
///
/// Each round toggles the Enrolled/All tabs, then refreshes and reselects
/// `label`. Returns whether the grid ended up ready without a toast.
pub async fn ensure_offers_loaded(
    ctx: &SiteContext<'_>,
    label: Option<&str>,
    tries: u32,
) -> Result<bool> {
    let browser = ctx.browser;
    for round in 1..=tries.max(1) {
        if detect::offers_ready(browser).await {
            return Ok(true);
        }

        for tab in [selectors::TAB_ENROLLED, selectors::TAB_ALL] {
            if let Some(Some(index)) = tolerate(browser.first_clickable(tab).await, "tab lookup")? {
                if tolerate(browser.click(tab, index).await, "tab click")?.is_some() {
                    pause(ctx.timing.tab_toggle_pause).await;
                }
            }
        }
        if detect::offers_ready(browser).await {
            debug!(round, "Offers loaded after tab toggle");
            return Ok(true);
        }

        tolerate(browser.refresh().await, "refresh")?;
        pause(ctx.timing.recovery_pause).await;
        if let Some(label) = label {
            tolerate(select_card(ctx, label).await, "card reselect")?;
        }

        poll_until(
            ctx.timing.element_timeout,
            ctx.timing.poll_interval,
            move || async move {
                detect::offers_ready(browser).await || detect::toast_error_visible(browser).await
            },
        )
        .await;
        if detect::offers_ready(browser).await {
            debug!(round, "Offers loaded after refresh");
            return Ok(true);
        }
        debug!(round, tries, "Offers still not ready");
    }
    Ok(false)
}

/// Click show-more controls until none are visible, then wait for a tile.
///
/// Buttons are rescanned every round because expanding can reveal more.
pub async fn expand_all_offers(ctx: &SiteContext<'_>) -> Result<()> {
    let browser = ctx.browser;
    let mut rounds = 0;
    loop {
        let visible: Vec<usize> = browser
            .elements(selectors::SHOW_MORE)
            .await?
            .iter()
            .enumerate()
            .filter(|(_, button)| button.visible)
            .map(|(index, _)| index)
            .collect();
        if visible.is_empty() {
            break;
        }
        if rounds == MAX_EXPAND_ROUNDS {
            warn!(remaining = visible.len(), "Show-more controls never cleared");
            break;
        }
        rounds += 1;

        // Highest index first so a button that removes itself keeps the
        // earlier indices valid.
        for &index in visible.iter().rev() {
            if let Err(err) = browser.click(selectors::SHOW_MORE, index).await {
                if is_session_closed(&err) {
                    return Err(err);
                }
                ctx.log.error("expand", format!("{err:#}")).await;
            }
            pause(ctx.timing.action_pause).await;
        }
        pause(ctx.timing.action_pause).await;
    }

    let timeout = ctx.timing.element_timeout;
    let tiles = poll_until(timeout, ctx.timing.poll_interval, move || async move {
        detect::offers_grid_visible(browser).await
    })
    .await;
    if !tiles {
        return Err(BrowserError::Timeout {
            timeout,
            what: "offer tiles".to_string(),
        }
        .into());
    }
    debug!(rounds, "Expanded offer list");
    Ok(())
}
