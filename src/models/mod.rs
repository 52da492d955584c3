mod card;
mod offer;

pub use card::CardLabel;
pub use offer::{
    OfferKey, OfferRecord, LOG_HEADERS, LOG_SHEET, OFFER_COLUMNS, OFFER_HEADERS, OFFER_SHEET,
};
