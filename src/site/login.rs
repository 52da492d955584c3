//! Login and logout.

use std::time::Duration;

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::browser::wait::{first_clickable_of, pause, poll_until};
use crate::browser::{is_session_closed, BrowserError, Key, Locator};

use super::recovery::{self, RecoveryOutcome};
use super::{detect, selectors, SiteContext};

/// Open the login route. If the form does not show up, bounce through the
/// offers route, clear client storage and load the login route once more.
async fn ensure_login_context(ctx: &SiteContext<'_>) -> Result<()> {
    open_login_route(ctx).await?;

    let form = first_clickable_of(
        ctx.browser,
        &selectors::USERNAME_FIELDS,
        ctx.timing.login_field_timeout,
        ctx.timing.poll_interval,
    )
    .await?;
    if form.is_some() {
        return Ok(());
    }

    debug!("Login form missing; bouncing through the offers route");
    if let Err(err) = ctx.browser.goto(&ctx.site.offers_url).await {
        if is_session_closed(&err) {
            return Err(err);
        }
    }
    pause(ctx.timing.recovery_pause).await;
    if let RecoveryOutcome::Failed(reason) = recovery::clear_client_storage(ctx.browser).await {
        debug!(%reason, "Storage clear failed");
    }
    recovery::dismiss_transient_popups(ctx, ctx.timing.popup_timeout).await;
    open_login_route(ctx).await
}

async fn open_login_route(ctx: &SiteContext<'_>) -> Result<()> {
    if let Err(err) = ctx.browser.goto(&ctx.site.login_url).await {
        if is_session_closed(&err) {
            return Err(err);
        }
        debug!(error = %err, "Login route load failed");
    }
    pause(ctx.timing.session_pause).await;
    Ok(())
}

async fn require_field(
    ctx: &SiteContext<'_>,
    candidates: &[Locator],
    what: &str,
) -> Result<(Locator, usize)> {
    let timeout = ctx.timing.login_field_timeout;
    first_clickable_of(ctx.browser, candidates, timeout, ctx.timing.poll_interval)
        .await?
        .ok_or_else(|| {
            BrowserError::Timeout {
                timeout,
                what: what.to_string(),
            }
            .into()
        })
}

/// Fill and submit the form once, pausing `pacing` after each field.
async fn login_once(
    ctx: &SiteContext<'_>,
    username: &str,
    password: &SecretString,
    pacing: Duration,
) -> Result<()> {
    let browser = ctx.browser;

    let (user_field, user_index) =
        require_field(ctx, &selectors::USERNAME_FIELDS, "username field").await?;
    browser.type_text(user_field, user_index, username).await?;
    pause(pacing).await;

    if let Ok(Some(index)) = browser.first_clickable(selectors::PASSWORD_WRAPPER).await {
        if browser.click(selectors::PASSWORD_WRAPPER, index).await.is_ok() {
            pause(ctx.timing.action_pause).await;
        }
    }

    let (pass_field, pass_index) =
        require_field(ctx, &selectors::PASSWORD_FIELDS, "password field").await?;
    browser
        .type_text(pass_field, pass_index, password.expose_secret())
        .await?;
    pause(pacing).await;

    let submit = first_clickable_of(
        browser,
        &selectors::SIGN_ON_BUTTONS,
        ctx.timing.element_timeout,
        ctx.timing.poll_interval,
    )
    .await?;
    match submit {
        Some((button, index)) => browser.click(button, index).await,
        None => browser.press_key(Key::Enter).await,
    }
}

/// Log in, trying once per configured typing pace.
///
/// Success is judged only by the URL. Returns `Ok(false)` when every attempt
/// fails; errors are reserved for a closed browser.
pub async fn authenticate(
    ctx: &SiteContext<'_>,
    username: &str,
    password: &SecretString,
) -> Result<bool> {
    ensure_login_context(ctx).await?;

    let browser = ctx.browser;
    let marker = ctx.site.offers_route_marker.as_str();
    for (attempt, pacing_ms) in ctx.navigation.login_pacing_ms.iter().enumerate() {
        let attempt = attempt + 1;
        if let Err(err) = login_once(ctx, username, password, Duration::from_millis(*pacing_ms)).await
        {
            if is_session_closed(&err) {
                return Err(err);
            }
            ctx.log
                .warn("login", format!("{username} attempt {attempt} failed: {err:#}"))
                .await;
        }

        poll_until(
            ctx.timing.settle_timeout,
            ctx.timing.poll_interval,
            move || async move {
                detect::is_authenticated(browser, marker).await
                    || browser
                        .current_url()
                        .await
                        .map(|url| url.contains("login"))
                        .unwrap_or(false)
            },
        )
        .await;
        recovery::dismiss_transient_popups(ctx, ctx.timing.popup_timeout).await;

        if detect::is_authenticated(browser, marker).await {
            ctx.log
                .info("login", format!("{username} success (try {attempt})"))
                .await;
            pause(ctx.timing.retry_backoff).await;
            return Ok(true);
        }
        pause(ctx.timing.recovery_pause).await;
    }

    let url = match browser.current_url().await {
        Ok(url) => url,
        Err(err) if is_session_closed(&err) => return Err(err),
        Err(_) => String::new(),
    };
    ctx.log
        .error("login", format!("{username} failed on URL {url}"))
        .await;
    Ok(false)
}

/// Log out and wipe cookies and storage so the next account starts clean.
pub async fn logout(ctx: &SiteContext<'_>) -> RecoveryOutcome {
    let result: Result<()> = async {
        ctx.browser.goto(&ctx.site.logout_url).await?;
        pause(ctx.timing.session_pause).await;
        ctx.browser.delete_cookies().await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            recovery::clear_client_storage(ctx.browser).await;
            ctx.log.info("logout", "success").await;
            RecoveryOutcome::Recovered
        }
        Err(err) => {
            ctx.log.warn("logout", format!("{err:#}")).await;
            RecoveryOutcome::Failed(format!("{err:#}"))
        }
    }
}
