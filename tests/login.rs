mod support;

use anyhow::Result;
use offerbook::browser::is_session_closed;
use offerbook::site::{authenticate, logout, RecoveryOutcome};
use secrecy::SecretString;
use support::{FakeSite, Harness, DASHBOARD_URL};
use tempfile::TempDir;

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

#[tokio::test]
async fn login_lands_on_dashboard() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(&harness.config.site, Vec::new());
    site.allow_login("andrew", "hunter2");
    let browser = site.browser();

    let ok = authenticate(&harness.site_context(&browser), "andrew", &secret("hunter2")).await?;

    assert!(ok);
    assert_eq!(site.state().url, DASHBOARD_URL);
    assert_eq!(harness.logged("login"), vec!["andrew success (try 1)"]);
    Ok(())
}

#[tokio::test]
async fn wrong_password_fails_after_every_pace() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(&harness.config.site, Vec::new());
    site.allow_login("andrew", "hunter2");
    let browser = site.browser();

    let ok = authenticate(&harness.site_context(&browser), "andrew", &secret("wrong")).await?;

    assert!(!ok);
    assert!(!site.state().logged_in);
    let expected = format!("andrew failed on URL {}", harness.config.site.login_url);
    assert_eq!(harness.logged("login"), vec![expected]);
    Ok(())
}

#[tokio::test]
async fn missing_form_bounces_through_offers_and_clears_storage() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(&harness.config.site, Vec::new());
    site.allow_login("andrew", "hunter2");
    site.state().login_form_missing_loads = 1;
    let browser = site.browser();

    let ok = authenticate(&harness.site_context(&browser), "andrew", &secret("hunter2")).await?;

    assert!(ok);
    let state = site.state();
    let login_url = harness.config.site.login_url.clone();
    assert_eq!(
        state.gotos,
        vec![
            login_url.clone(),
            harness.config.site.offers_url.clone(),
            login_url,
        ]
    );
    assert_eq!(state.storage_clears, 1);
    assert_eq!(state.url, DASHBOARD_URL);
    Ok(())
}

#[tokio::test]
async fn login_on_closed_browser_is_an_error() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(&harness.config.site, Vec::new());
    site.state().closed = true;
    let browser = site.browser();

    let err = authenticate(&harness.site_context(&browser), "andrew", &secret("hunter2"))
        .await
        .unwrap_err();

    assert!(is_session_closed(&err));
    Ok(())
}

#[tokio::test]
async fn logout_clears_session() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(&harness.config.site, Vec::new());
    site.start_on_offers_page();
    let browser = site.browser();

    let outcome = logout(&harness.site_context(&browser)).await;

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    let state = site.state();
    assert!(!state.logged_in);
    assert_eq!(state.logouts, 1);
    assert_eq!(state.cookie_clears, 1);
    Ok(())
}
