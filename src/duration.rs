//! Duration parsing utilities for human-readable pauses like "4s", "250ms", "1.2s".

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a duration string like "250ms", "4s", "1.5s", "2m", "1h".
///
/// Supported units:
/// - `ms` - milliseconds
/// - `s` - seconds
/// - `m` - minutes
/// - `h` - hours
///
/// A bare number is read as seconds, matching the float-seconds environment
/// overrides (`CITI_PAGE_LOAD_PAUSE=4.0`). Fractions are allowed and rounded to
/// the nearest millisecond. The input is case-insensitive and whitespace is trimmed.
///
/// # Examples
///
/// ```
/// use offerbook::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("4s").unwrap(), Duration::from_secs(4));
/// assert_eq!(parse_duration("1.2s").unwrap(), Duration::from_millis(1200));
/// assert_eq!(parse_duration("4.0").unwrap(), Duration::from_secs(4));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        anyhow::bail!("Duration is empty");
    }

    let (num, millis_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (s.as_str(), 1_000.0)
    };

    let value: f64 = num
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in duration: {s}"))?;
    if !value.is_finite() || value < 0.0 {
        anyhow::bail!("Duration must be a non-negative number: {s}");
    }

    let millis = (value * millis_per_unit).round();
    if millis > u64::MAX as f64 {
        anyhow::bail!("Duration is too large: {s}");
    }

    Ok(Duration::from_millis(millis as u64))
}

/// Format a duration using the largest unit that represents it exactly.
///
/// # Examples
///
/// ```
/// use offerbook::duration::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_secs(4)), "4s");
/// assert_eq!(format_duration(Duration::from_secs(120)), "2m");
/// ```
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();

    const MILLIS_PER_HOUR: u128 = 60 * 60 * 1000;
    const MILLIS_PER_MINUTE: u128 = 60 * 1000;
    const MILLIS_PER_SECOND: u128 = 1000;

    if millis == 0 {
        "0s".to_string()
    } else if millis % MILLIS_PER_HOUR == 0 {
        format!("{}h", millis / MILLIS_PER_HOUR)
    } else if millis % MILLIS_PER_MINUTE == 0 {
        format!("{}m", millis / MILLIS_PER_MINUTE)
    } else if millis % MILLIS_PER_SECOND == 0 {
        format!("{}s", millis / MILLIS_PER_SECOND)
    } else {
        format!("{millis}ms")
    }
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}
