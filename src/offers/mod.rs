//! Card enumeration, offer enrollment and record capture.

pub mod cards;
pub mod parse;
pub mod scrape;

pub use cards::{enumerate_cards, ensure_offers_loaded, expand_all_offers, select_card};
pub use scrape::{close_modal, extract_one_offer, scrape_card, CardOutcome, OfferDetails};

use anyhow::Result;
use tracing::debug;

use crate::browser::is_session_closed;
use crate::clock::Clock;
use crate::site::SiteContext;
use crate::store::RecordStore;

/// A [`SiteContext`] plus the record store and the capture clock.
#[derive(Clone, Copy)]
pub struct ScrapeContext<'a> {
    pub site: SiteContext<'a>,
    pub store: &'a dyn RecordStore,
    pub clock: &'a dyn Clock,
}

/// Turn a failed page action into `None`, except a closed browser.
pub(crate) fn tolerate<T>(result: Result<T>, what: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if is_session_closed(&err) => Err(err),
        Err(err) => {
            debug!(error = %format!("{err:#}"), "{what} failed");
            Ok(None)
        }
    }
}
