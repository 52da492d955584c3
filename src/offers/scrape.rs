//! Per-card enrollment loop and offer capture.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::browser::wait::{pause, poll_until};
use crate::browser::{is_session_closed, Browser, BrowserError, Key, Locator};
use crate::clock::Clock;
use crate::models::{CardLabel, OfferKey, OfferRecord, OFFER_SHEET};
use crate::reconcile;
use crate::site::{detect, selectors, SiteContext};

use super::cards::{ensure_offers_loaded, expand_all_offers, select_card};
use super::parse::{
    card_from_modal_text, is_local, normalize_expiration, parse_max_discount, parse_min_spend,
};
use super::{tolerate, ScrapeContext};

/// Upper bound on enroll clicks per card.
const MAX_OFFERS_PER_CARD: usize = 500;

const UNKNOWN_BRAND: &str = "Unknown Brand";

/// What one card's scrape produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardOutcome {
    /// The offer grid loaded. `false` means the account should stop.
    pub loaded: bool,
    /// Rows written to the store.
    pub appended: usize,
    /// Offers that could not be enrolled or read.
    pub skipped: usize,
}

/// Fields read from an open offer dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferDetails {
    pub brand: String,
    pub discount: String,
    pub max_discount: String,
    pub min_spend: String,
    pub date_added: String,
    pub expiration: String,
    pub local: bool,
    /// Card name and last four guessed from the page text.
    pub modal_card_name: String,
    pub modal_last_four: String,
}

impl OfferDetails {
    /// Attach the card. Label values win; the dialog's own text fills gaps.
    pub fn into_record(self, holder: &str, label: &CardLabel, default_card_name: &str) -> OfferRecord {
        let card_name = [label.name.as_str(), self.modal_card_name.as_str()]
            .into_iter()
            .find(|name| !name.is_empty())
            .unwrap_or(default_card_name)
            .to_string();
        let last_four = if label.last_four.is_empty() {
            self.modal_last_four
        } else {
            label.last_four.clone()
        };

        OfferRecord {
            card_holder: holder.to_string(),
            last_four,
            card_name,
            brand: self.brand,
            discount: self.discount,
            max_discount: self.max_discount,
            min_spend: self.min_spend,
            date_added: self.date_added,
            expiration: self.expiration,
            local: self.local,
        }
    }
}

async fn first_text(browser: &dyn Browser, locator: Locator) -> Result<String> {
    Ok(browser.text(locator).await?.unwrap_or_default())
}

/// Read the open offer dialog.
pub async fn extract_one_offer(
    ctx: &SiteContext<'_>,
    clock: &dyn Clock,
) -> Result<OfferDetails> {
    let browser = ctx.browser;

    let brand = first_text(browser, selectors::MODAL_MERCHANT_NAME).await?;
    let discount = first_text(browser, selectors::MODAL_OFFER_TITLE).await?;
    let body = first_text(browser, selectors::MODAL_BODY).await?;
    let expiration_raw = first_text(browser, selectors::MODAL_EXPIRATION).await?;
    let page_text = first_text(browser, selectors::PAGE_BODY).await?;
    let (modal_card_name, modal_last_four) = card_from_modal_text(&page_text);

    Ok(OfferDetails {
        brand: if brand.is_empty() {
            UNKNOWN_BRAND.to_string()
        } else {
            brand
        },
        discount,
        max_discount: parse_max_discount(&body).unwrap_or_default(),
        min_spend: parse_min_spend(&body).unwrap_or_else(|| "None".to_string()),
        date_added: clock.today().format("%m/%d/%Y").to_string(),
        expiration: normalize_expiration(&expiration_raw),
        local: is_local(&body, &ctx.site.locality),
        modal_card_name,
        modal_last_four,
    })
}

async fn wait_for_modal_closed(ctx: &SiteContext<'_>) -> bool {
    let browser = ctx.browser;
    poll_until(
        ctx.timing.element_timeout,
        ctx.timing.poll_interval,
        move || async move { !detect::offer_modal_open(browser).await },
    )
    .await
}

/// Close the offer dialog through its close control, or Escape as a last
/// resort, and wait for it to go away.
pub async fn close_modal(ctx: &SiteContext<'_>) -> Result<()> {
    let browser = ctx.browser;
    for locator in selectors::MODAL_CLOSE_BUTTONS {
        if !browser.exists(locator).await.unwrap_or(false) {
            continue;
        }
        if tolerate(browser.click(locator, 0).await, "dialog close")?.is_some()
            && wait_for_modal_closed(ctx).await
        {
            return Ok(());
        }
    }

    browser.press_key(Key::Escape).await?;
    if wait_for_modal_closed(ctx).await {
        return Ok(());
    }
    Err(BrowserError::Timeout {
        timeout: ctx.timing.element_timeout,
        what: "offer dialog to close".to_string(),
    }
    .into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnrollSignal {
    Modal,
    Enrolled,
    Error,
    Nothing,
}

async fn enroll_signal(browser: &dyn Browser) -> EnrollSignal {
    if detect::enrollment_error_visible(browser).await {
        EnrollSignal::Error
    } else if detect::offer_modal_open(browser).await {
        EnrollSignal::Modal
    } else if browser.exists(selectors::ENROLLED_TILE).await.unwrap_or(false) {
        EnrollSignal::Enrolled
    } else {
        EnrollSignal::Nothing
    }
}

async fn wait_for_modal(ctx: &SiteContext<'_>) -> bool {
    let browser = ctx.browser;
    poll_until(
        ctx.timing.enroll_timeout,
        ctx.timing.poll_interval,
        move || async move { detect::offer_modal_open(browser).await },
    )
    .await
}

/// Click the `index`-th enroll icon and read the dialog it opens.
///
/// `Ok(None)` means the offer was skipped after a repeated enrollment error.
async fn enroll_and_capture(
    ctx: &SiteContext<'_>,
    clock: &dyn Clock,
    index: usize,
) -> Result<Option<OfferDetails>> {
    let browser = ctx.browser;
    browser.click(selectors::ENROLL_ICON, index).await?;

    poll_until(
        ctx.timing.enroll_timeout,
        ctx.timing.poll_interval,
        move || async move { enroll_signal(browser).await != EnrollSignal::Nothing },
    )
    .await;

    if enroll_signal(browser).await == EnrollSignal::Error {
        debug!(index, "Enrollment error; retrying once");
        tolerate(browser.press_key(Key::Escape).await, "error dismiss")?;
        pause(ctx.timing.enroll_retry_pause).await;

        let clicked = tolerate(browser.click(selectors::ENROLL_ICON, index).await, "retry")?;
        if clicked.is_none() || !wait_for_modal(ctx).await {
            ctx.log
                .warn("enroll", "Offer enrollment error - skipping this one")
                .await;
            tolerate(browser.press_key(Key::Escape).await, "error dismiss")?;
            return Ok(None);
        }
    } else if !wait_for_modal(ctx).await {
        ctx.log
            .warn("enroll", "Offer details never opened - skipping this one")
            .await;
        return Ok(None);
    }

    let details = extract_one_offer(ctx, clock).await?;
    close_modal(ctx).await?;
    pause(ctx.timing.modal_close_pause).await;
    Ok(Some(details))
}

async fn scroll_to_top(ctx: &SiteContext<'_>) -> Result<()> {
    tolerate(ctx.browser.execute_script("window.scrollTo(0,0);").await, "scroll")?;
    Ok(())
}

/// Scroll to the top and expand the offer list, healing once on timeout.
async fn prepare_offer_list(ctx: &SiteContext<'_>, label: &str) -> Result<bool> {
    scroll_to_top(ctx).await?;
    let err = match expand_all_offers(ctx).await {
        Ok(()) => return Ok(true),
        Err(err) if is_session_closed(&err) => return Err(err),
        Err(err) => err,
    };

    debug!(label, error = %format!("{err:#}"), "Expansion failed; healing once");
    if !ensure_offers_loaded(ctx, Some(label), ctx.navigation.offers_heal_tries).await? {
        return Ok(false);
    }
    scroll_to_top(ctx).await?;
    match expand_all_offers(ctx).await {
        Ok(()) => Ok(true),
        Err(err) if is_session_closed(&err) => Err(err),
        Err(err) => {
            ctx.log
                .error("expand", format!("{label}: {err:#}"))
                .await;
            Ok(false)
        }
    }
}

/// Append the card's batch and refresh the filter. Failures are logged.
async fn flush_batch(ctx: &ScrapeContext<'_>, label: &str, pending: &[OfferRecord]) -> usize {
    if pending.is_empty() {
        return 0;
    }
    let rows: Vec<Vec<String>> = pending.iter().map(OfferRecord::to_row).collect();
    if let Err(err) = ctx.store.append_rows(OFFER_SHEET, &rows).await {
        ctx.site
            .log
            .error("append_rows", format!("{label}: {err:#}"))
            .await;
        return 0;
    }
    if let Err(err) = reconcile::refresh_derived_filters(ctx.store, ctx.site.log).await {
        ctx.site
            .log
            .error("filters", format!("{err:#}"))
            .await;
    }
    rows.len()
}

/// Enroll every open offer on card `label` and record the new ones.
///
/// Records whose key is already in `seen` are not appended. New rows are
/// written as one batch on every exit path, including a closed browser.
pub async fn scrape_card(
    ctx: &ScrapeContext<'_>,
    label: &str,
    holder: &str,
    seen: &mut HashSet<OfferKey>,
) -> Result<CardOutcome> {
    let site = &ctx.site;
    let browser = site.browser;

    if let Err(err) = select_card(site, label).await {
        if is_session_closed(&err) {
            return Err(err);
        }
        site.log
            .warn("card", format!("{label}: could not select card: {err:#}"))
            .await;
    }

    if !ensure_offers_loaded(site, Some(label), site.navigation.offers_heal_tries).await? {
        site.log
            .warn("card", format!("{label}: could not load offers - aborting this account"))
            .await;
        return Ok(CardOutcome::default());
    }
    if !prepare_offer_list(site, label).await? {
        site.log
            .warn("card", format!("{label}: offers never loaded - aborting this account"))
            .await;
        return Ok(CardOutcome::default());
    }

    let card = CardLabel::parse(label);
    let mut pending = Vec::new();
    let mut skipped = 0;

    let result: Result<()> = async {
        // Icons before `skip` belong to offers that already failed.
        let mut skip = 0;
        for _ in 0..MAX_OFFERS_PER_CARD {
            site.check_interrupted()?;
            let before = browser.count(selectors::ENROLL_ICON).await?;
            if before <= skip {
                return Ok(());
            }

            match enroll_and_capture(site, ctx.clock, skip).await {
                Ok(Some(details)) => {
                    let record =
                        details.into_record(holder, &card, &site.site.default_card_name);
                    if seen.insert(record.key()) {
                        pending.push(record);
                    } else {
                        debug!(brand = %record.brand, "Offer already recorded");
                    }
                }
                Ok(None) => skipped += 1,
                Err(err) if is_session_closed(&err) => return Err(err),
                Err(err) => {
                    skipped += 1;
                    site.log
                        .warn("enroll", format!("{label}: offer skipped: {err:#}"))
                        .await;
                    if detect::offer_modal_open(browser).await {
                        tolerate(close_modal(site).await, "dialog close")?;
                    }
                }
            }

            let after = browser.count(selectors::ENROLL_ICON).await?;
            if after >= before {
                skip += 1;
            }
        }
        warn!(label, "Stopped after {MAX_OFFERS_PER_CARD} offers");
        Ok(())
    }
    .await;

    let appended = flush_batch(ctx, label, &pending).await;
    let outcome = CardOutcome {
        loaded: true,
        appended,
        skipped,
    };

    match result {
        Ok(()) => {}
        Err(err) if is_session_closed(&err) => return Err(err),
        Err(err) => {
            site.log
                .error("scrape_card", format!("{label}: {err:#}"))
                .await;
        }
    }

    info!(label, holder, appended, skipped, "Card scraped");
    Ok(outcome)
}
