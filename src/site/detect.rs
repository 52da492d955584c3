//! Page state detectors.
//!
//! Each is a single query against the live page. A failed query reads as
//! "not present" so callers can use these inside polling loops.

use crate::browser::{Browser, Locator};

use super::selectors;

async fn present(browser: &dyn Browser, locator: Locator) -> bool {
    browser.exists(locator).await.unwrap_or(false)
}

pub async fn offers_grid_visible(browser: &dyn Browser) -> bool {
    present(browser, selectors::OFFER_TILE).await
}

pub async fn inline_error_visible(browser: &dyn Browser) -> bool {
    present(browser, selectors::INLINE_ERROR).await
}

pub async fn toast_error_visible(browser: &dyn Browser) -> bool {
    present(browser, selectors::TOAST_ERROR).await
}

pub async fn not_found_page_visible(browser: &dyn Browser) -> bool {
    present(browser, selectors::NOT_FOUND).await
}

/// URL heuristic: the dashboard or the offers route means a live session.
pub async fn is_authenticated(browser: &dyn Browser, offers_route_marker: &str) -> bool {
    match browser.current_url().await {
        Ok(url) => url.contains("/dashboard") || url.contains(offers_route_marker),
        Err(_) => false,
    }
}

/// The "Unable to enroll merchant offer" overlay.
pub async fn enrollment_error_visible(browser: &dyn Browser) -> bool {
    present(browser, selectors::ENROLLMENT_ERROR).await
}

pub async fn offer_modal_open(browser: &dyn Browser) -> bool {
    present(browser, selectors::MODAL_MERCHANT_NAME).await
}

/// Any of the signals that end the post-navigation settle wait.
pub async fn offers_page_settled(browser: &dyn Browser, include_not_found: bool) -> bool {
    offers_grid_visible(browser).await
        || inline_error_visible(browser).await
        || toast_error_visible(browser).await
        || (include_not_found && not_found_page_visible(browser).await)
}

/// Offers usable: tiles showing and no toast error.
pub async fn offers_ready(browser: &dyn Browser) -> bool {
    offers_grid_visible(browser).await && !toast_error_visible(browser).await
}
