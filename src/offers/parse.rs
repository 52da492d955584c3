//! Field extraction from offer detail text.
//!
//! All functions are total: unknown input yields `None`, an empty string or
//! the input unchanged, never a panic.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

static MAX_DISCOUNT_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)max(?:imum)?[^$]{0,30}\$(\d[\d,]*)").expect("valid regex"),
        Regex::new(r"(?i)up to[^$]{0,30}\$(\d[\d,]*)").expect("valid regex"),
        Regex::new(r"(?i)capped at[^$]{0,30}\$(\d[\d,]*)").expect("valid regex"),
    ]
});

static MIN_SPEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:purchase|spend)[^$]{0,25}\$(\d[\d,]*)").expect("valid regex")
});

static NUMERIC_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})$").expect("valid regex")
});

static CARD_LAST_FOUR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\*\*|\b|-|\s)(\d{4})\b").expect("valid regex"));

static OFFER_FOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^offer\s*for[:\s-]+").expect("valid regex"));

const TEXT_DATE_FORMATS: [&str; 4] = ["%b %d, %Y", "%B %d, %Y", "%b %d,%Y", "%B %d,%Y"];

/// Characters of context looked at before the last four digits.
const CARD_NAME_WINDOW: usize = 120;

fn dollars(amount: &str) -> String {
    format!("${}", amount.trim_end_matches(','))
}

/// Maximum reward cap, e.g. `"Get 5% back, max $50 per purchase"` -> `"$50"`.
///
/// Cues are tried in order: `max`/`maximum`, `up to`, `capped at`.
pub fn parse_max_discount(text: &str) -> Option<String> {
    MAX_DISCOUNT_RES
        .iter()
        .find_map(|re| re.captures(text))
        .map(|caps| dollars(&caps[1]))
}

/// Spend threshold, e.g. `"Spend $75 or more"` -> `"$75"`.
pub fn parse_min_spend(text: &str) -> Option<String> {
    MIN_SPEND_RE.captures(text).map(|caps| dollars(&caps[1]))
}

/// Parse `Mon DD, YYYY`, `Month DD, YYYY` (space before the year optional)
/// or numeric `M/D/YY[YY]` with `/` or `-`. Two-digit years are 20xx.
pub fn parse_date_any(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(date) = TEXT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
    {
        return Some(date);
    }

    let caps = NUMERIC_DATE_RE.captures(text)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let mut year: i32 = caps[3].parse().ok()?;
    if year < 100 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Canonical `Mon DD, YYYY`, or the input unchanged when it is not a date.
pub fn normalize_expiration(text: &str) -> String {
    match parse_date_any(text) {
        Some(date) => date.format("%b %d, %Y").to_string(),
        None => text.to_string(),
    }
}

/// Best-effort card name and last four digits from the detail view's text.
///
/// The last four is the first standalone group of four digits. The name is
/// the line just before it, up to the first dash, with any leading
/// `Offer for` removed.
pub fn card_from_modal_text(text: &str) -> (String, String) {
    let Some(caps) = CARD_LAST_FOUR_RE.captures(text) else {
        return (String::new(), String::new());
    };
    let digits = caps.get(1).map_or("", |m| m.as_str());
    let start = caps.get(1).map_or(0, |m| m.start());

    let before = &text[..start];
    let window_start = before
        .char_indices()
        .rev()
        .nth(CARD_NAME_WINDOW - 1)
        .map_or(0, |(i, _)| i);
    let line = before[window_start..].lines().last().unwrap_or("").trim();
    let line = OFFER_FOR_RE.replace(line, "");
    let line = line.replace(['\u{2013}', '\u{2014}'], "-");
    let name = line
        .split('-')
        .next()
        .unwrap_or("")
        .trim()
        .trim_end_matches('*')
        .trim_end();

    let name = if name.to_lowercase().contains("products & offers") {
        ""
    } else {
        name
    };
    (name.to_string(), digits.to_string())
}

/// Case-insensitive substring match of `locality` in the offer body.
pub fn is_local(body: &str, locality: &str) -> bool {
    !locality.is_empty() && body.to_lowercase().contains(&locality.to_lowercase())
}
