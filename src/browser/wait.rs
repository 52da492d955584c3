//! Bounded polling.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;

use super::{is_session_closed, Browser, Locator};

/// Poll `check` until it returns true or `timeout` elapses.
///
/// The condition is always evaluated at least once, so a zero timeout is a
/// single check.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// First clickable match among `candidates`, tried in order on every poll.
///
/// Query errors count as "not yet", except a closed session.
pub async fn first_clickable_of(
    browser: &dyn Browser,
    candidates: &[Locator],
    timeout: Duration,
    interval: Duration,
) -> Result<Option<(Locator, usize)>> {
    let deadline = Instant::now() + timeout;
    loop {
        for &locator in candidates {
            match browser.first_clickable(locator).await {
                Ok(Some(index)) => return Ok(Some((locator, index))),
                Ok(None) => {}
                Err(err) if is_session_closed(&err) => return Err(err),
                Err(_) => {}
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Sleep unless the pause is zero.
pub async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
