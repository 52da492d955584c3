mod support;

use std::collections::HashSet;

use anyhow::Result;
use offerbook::browser::is_session_closed;
use offerbook::models::OFFER_SHEET;
use offerbook::offers::{enumerate_cards, scrape_card, CardOutcome, ScrapeContext};
use support::{FakeCard, FakeOffer, FakeSite, Harness};
use tempfile::TempDir;

const DOUBLE_CASH: &str = "Citi Double Cash - 1234";

fn wawa() -> FakeOffer {
    FakeOffer::new(
        "Wawa",
        "10% back",
        "Spend $10 or more, up to $5 back. Valid at Philadelphia locations.",
        "03/31/2025",
    )
}

fn offer(brand: &str) -> FakeOffer {
    FakeOffer::new(brand, "5% back", "Earn cash back nationwide.", "Apr 30, 2025")
}

#[tokio::test]
async fn captured_offer_becomes_one_row() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(DOUBLE_CASH, vec![wawa()])],
    );
    site.start_on_offers_page();
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let mut seen = HashSet::new();
    let outcome = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut seen).await?;

    assert_eq!(
        outcome,
        CardOutcome {
            loaded: true,
            appended: 1,
            skipped: 0,
        }
    );
    assert_eq!(
        harness.store.data_rows(OFFER_SHEET),
        vec![vec![
            "Andrew",
            "1234",
            "Citi Double Cash",
            "Wawa",
            "10% back",
            "$5",
            "$10",
            "03/10/2025",
            "Mar 31, 2025",
            "Yes",
        ]]
    );
    assert!(site.state().cards[0].offers[0].enrolled);
    assert!(harness.store.filter(OFFER_SHEET).is_some());
    Ok(())
}

#[tokio::test]
async fn failing_offer_is_skipped_and_the_rest_recorded() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(
            DOUBLE_CASH,
            vec![
                offer("Alpha"),
                offer("Bravo").with_enroll_errors(2),
                offer("Charlie"),
            ],
        )],
    );
    site.start_on_offers_page();
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let outcome = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut HashSet::new()).await?;

    assert_eq!(outcome.appended, 2);
    assert_eq!(outcome.skipped, 1);
    let brands: Vec<String> = harness
        .store
        .data_rows(OFFER_SHEET)
        .into_iter()
        .map(|row| row[3].clone())
        .collect();
    assert_eq!(brands, vec!["Alpha", "Charlie"]);
    assert_eq!(harness.store.append_calls(OFFER_SHEET), 1);
    assert_eq!(
        harness.logged("enroll"),
        vec!["Offer enrollment error - skipping this one"]
    );
    Ok(())
}

#[tokio::test]
async fn single_enrollment_error_is_retried() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(DOUBLE_CASH, vec![offer("Alpha").with_enroll_errors(1)])],
    );
    site.start_on_offers_page();
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let outcome = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut HashSet::new()).await?;

    assert_eq!(outcome.appended, 1);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(site.state().enroll_clicks, 2);
    Ok(())
}

#[tokio::test]
async fn already_seen_offer_is_not_appended_again() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(DOUBLE_CASH, vec![wawa()])],
    );
    site.start_on_offers_page();
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let mut seen = HashSet::new();
    scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut seen).await?;
    site.state().cards[0].offers[0].enrolled = false;
    let second = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut seen).await?;

    assert_eq!(second.appended, 0);
    assert_eq!(harness.store.data_rows(OFFER_SHEET).len(), 1);
    assert_eq!(seen.len(), 1);
    Ok(())
}

#[tokio::test]
async fn show_more_is_expanded_before_enrolling() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(DOUBLE_CASH, vec![offer("Alpha"), offer("Bravo")]).with_show_more(2)],
    );
    site.start_on_offers_page();
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let outcome = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut HashSet::new()).await?;

    assert_eq!(outcome.appended, 2);
    assert_eq!(site.state().cards[0].show_more, 0);
    Ok(())
}

#[tokio::test]
async fn closed_browser_still_flushes_captured_rows() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(
            DOUBLE_CASH,
            vec![offer("Alpha"), offer("Bravo"), offer("Charlie")],
        )],
    );
    site.start_on_offers_page();
    site.state().close_on_enroll_click = Some(2);
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let err = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut HashSet::new())
        .await
        .unwrap_err();

    assert!(is_session_closed(&err));
    let rows = harness.store.data_rows(OFFER_SHEET);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][3], "Alpha");
    Ok(())
}

#[tokio::test]
async fn shutdown_mid_card_flushes_captured_rows() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(
            DOUBLE_CASH,
            vec![offer("Alpha"), offer("Bravo"), offer("Charlie")],
        )],
    );
    site.start_on_offers_page();
    site.state().cancel_after_enroll_click = Some((2, harness.shutdown.clone()));
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let err = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut HashSet::new())
        .await
        .unwrap_err();

    assert!(is_session_closed(&err));
    assert_eq!(site.state().enroll_clicks, 2);
    let brands: Vec<String> = harness
        .store
        .data_rows(OFFER_SHEET)
        .into_iter()
        .map(|row| row[3].clone())
        .collect();
    assert_eq!(brands, vec!["Alpha", "Bravo"]);
    assert_eq!(harness.store.append_calls(OFFER_SHEET), 1);
    Ok(())
}

#[tokio::test]
async fn grid_that_never_loads_stops_the_account() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(DOUBLE_CASH, vec![offer("Alpha")])],
    );
    site.start_on_offers_page();
    site.state().grid_hidden = true;
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let outcome = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut HashSet::new()).await?;

    assert_eq!(outcome, CardOutcome::default());
    assert!(harness.store.data_rows(OFFER_SHEET).is_empty());
    assert_eq!(
        harness.logged("card"),
        vec![format!("{DOUBLE_CASH}: could not load offers - aborting this account")]
    );
    let heal_tries = harness.config.navigation.offers_heal_tries as usize;
    assert_eq!(site.state().refreshes, heal_tries);
    Ok(())
}

#[tokio::test]
async fn failed_append_is_logged_not_raised() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    harness.store.fail_appends_to(OFFER_SHEET);
    let site = FakeSite::new(
        &harness.config.site,
        vec![FakeCard::new(DOUBLE_CASH, vec![offer("Alpha")])],
    );
    site.start_on_offers_page();
    let browser = site.browser();
    let ctx = ScrapeContext {
        site: harness.site_context(&browser),
        store: harness.store.as_ref(),
        clock: harness.clock.as_ref(),
    };

    let outcome = scrape_card(&ctx, DOUBLE_CASH, "Andrew", &mut HashSet::new()).await?;

    assert!(outcome.loaded);
    assert_eq!(outcome.appended, 0);
    assert_eq!(harness.logged("append_rows").len(), 1);
    Ok(())
}

#[tokio::test]
async fn card_list_skips_placeholder_heading() -> Result<()> {
    let dir = TempDir::new()?;
    let harness = Harness::new(dir.path()).await?;
    let site = FakeSite::new(
        &harness.config.site,
        vec![
            FakeCard::new(DOUBLE_CASH, Vec::new()),
            FakeCard::new("Citi Strata Premier - 8549", Vec::new()),
        ],
    );
    site.start_on_offers_page();
    let browser = site.browser();

    let cards = enumerate_cards(&harness.site_context(&browser)).await?;

    assert_eq!(cards, vec![DOUBLE_CASH, "Citi Strata Premier - 8549"]);
    assert!(!site.state().dropdown_open);
    Ok(())
}
