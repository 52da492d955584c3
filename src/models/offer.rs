use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::offers::parse::parse_date_any;

pub const OFFER_SHEET: &str = "Card Offers";
pub const OFFER_COLUMNS: usize = 10;
pub const OFFER_HEADERS: [&str; OFFER_COLUMNS] = [
    "Card Holder",
    "Last Four",
    "Card Name",
    "Brand",
    "Discount",
    "Maximum Discount",
    "Minimum Spend",
    "Date Added",
    "Expiration",
    "Local",
];

pub const LOG_SHEET: &str = "Log";
pub const LOG_HEADERS: [&str; 4] = ["Time", "Level", "Function", "Message"];

/// One enrolled merchant offer, as persisted in the offers worksheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRecord {
    pub card_holder: String,
    pub last_four: String,
    pub card_name: String,
    pub brand: String,
    pub discount: String,
    /// `"$<amount>"` or empty.
    pub max_discount: String,
    /// `"$<amount>"` or `"None"`.
    pub min_spend: String,
    /// `MM/DD/YYYY`.
    pub date_added: String,
    /// `Mon DD, YYYY`, or the raw text when it could not be parsed.
    pub expiration: String,
    pub local: bool,
}

/// Identity of an offer for deduplication: every field except `date_added`,
/// so an unchanged offer scraped again on a later day is not a new row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfferKey([String; 9]);

impl OfferRecord {
    /// Cells in column order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.card_holder.clone(),
            self.last_four.clone(),
            self.card_name.clone(),
            self.brand.clone(),
            self.discount.clone(),
            self.max_discount.clone(),
            self.min_spend.clone(),
            self.date_added.clone(),
            self.expiration.clone(),
            if self.local { "Yes" } else { "No" }.to_string(),
        ]
    }

    /// Positional conversion; short rows are padded, extra cells ignored.
    pub fn from_row(row: &[String]) -> Self {
        let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
        Self {
            card_holder: cell(0),
            last_four: cell(1),
            card_name: cell(2),
            brand: cell(3),
            discount: cell(4),
            max_discount: cell(5),
            min_spend: cell(6),
            date_added: cell(7),
            expiration: cell(8),
            local: cell(9).trim().eq_ignore_ascii_case("yes"),
        }
    }

    pub fn key(&self) -> OfferKey {
        OfferKey([
            self.card_holder.clone(),
            self.last_four.clone(),
            self.card_name.clone(),
            self.brand.clone(),
            self.discount.clone(),
            self.max_discount.clone(),
            self.min_spend.clone(),
            self.expiration.clone(),
            if self.local { "Yes" } else { "No" }.to_string(),
        ])
    }

    /// Expired when the expiration parses to a date strictly before `today`.
    /// Unparseable expirations never expire.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        parse_date_any(&self.expiration).is_some_and(|date| date < today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> OfferRecord {
        OfferRecord {
            card_holder: "Andrew".into(),
            last_four: "1234".into(),
            card_name: "Citi Double Cash".into(),
            brand: "Wawa".into(),
            discount: "10% back".into(),
            max_discount: "$5".into(),
            min_spend: "None".into(),
            date_added: "03/01/2025".into(),
            expiration: "Mar 31, 2025".into(),
            local: true,
        }
    }

    #[test]
    fn row_has_ten_cells_in_header_order() {
        let row = record().to_row();
        assert_eq!(row.len(), OFFER_HEADERS.len());
        assert_eq!(row[0], "Andrew");
        assert_eq!(row[7], "03/01/2025");
        assert_eq!(row[9], "Yes");
    }

    #[test]
    fn short_rows_are_padded() {
        let row = vec!["Andrew".to_string(), "1234".to_string()];
        let parsed = OfferRecord::from_row(&row);
        assert_eq!(parsed.card_holder, "Andrew");
        assert_eq!(parsed.brand, "");
        assert!(!parsed.local);
    }

    #[test]
    fn key_ignores_date_added() {
        let first = record();
        let mut later = record();
        later.date_added = "04/02/2025".into();
        assert_eq!(first.key(), later.key());

        later.brand = "Sunoco".into();
        assert_ne!(first.key(), later.key());
    }

    #[test]
    fn expiry_is_strictly_before_today() {
        let offer = record();
        let day = |d| NaiveDate::from_ymd_opt(2025, 3, d).unwrap();
        assert!(!offer.is_expired(day(31)));
        assert!(!offer.is_expired(day(30)));

        let mut past = record();
        past.expiration = "Mar 01, 2025".into();
        assert!(past.is_expired(day(2)));

        let mut garbage = record();
        garbage.expiration = "Ongoing".into();
        assert!(!garbage.is_expired(day(31)));
    }
}
