//! Offers worksheet maintenance: expiry, deduplication and the filter range.
//!
//! The index calculations are pure; the async wrappers read the worksheet,
//! issue one batched delete and log what they removed.

use std::collections::HashSet;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::debug;

use crate::activity::ActivityLog;
use crate::models::{OfferRecord, OFFER_COLUMNS, OFFER_SHEET};
use crate::store::RecordStore;

/// Rows removed by a full maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub expired: usize,
    pub duplicates: usize,
}

/// Data rows whose expiration is before `today`, highest index first.
pub fn expired_row_indices(rows: &[Vec<String>], today: NaiveDate) -> Vec<usize> {
    (1..rows.len())
        .rev()
        .filter(|&i| OfferRecord::from_row(&rows[i]).is_expired(today))
        .collect()
}

/// Data rows repeating an earlier row's offer key, highest index first.
/// The first occurrence from the top is kept.
pub fn duplicate_row_indices(rows: &[Vec<String>]) -> Vec<usize> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<usize> = (1..rows.len())
        .filter(|&i| !seen.insert(OfferRecord::from_row(&rows[i]).key()))
        .collect();
    duplicates.reverse();
    duplicates
}

async fn delete_rows(store: &dyn RecordStore, indices: &[usize]) -> Result<usize> {
    if indices.is_empty() {
        return Ok(0);
    }
    store.batch_delete_rows(OFFER_SHEET, indices).await?;
    Ok(indices.len())
}

/// Delete every row that expired before `today`.
pub async fn delete_expired_records(
    store: &dyn RecordStore,
    log: &ActivityLog,
    today: NaiveDate,
) -> Result<usize> {
    let rows = store.read_all_rows(OFFER_SHEET).await?;
    let deleted = delete_rows(store, &expired_row_indices(&rows, today)).await?;
    if deleted > 0 {
        log.info("cleanup", format!("deleted {deleted} expired row(s)"))
            .await;
    } else {
        debug!("No expired rows");
    }
    Ok(deleted)
}

/// Delete later copies of the same offer.
pub async fn deduplicate_records(store: &dyn RecordStore, log: &ActivityLog) -> Result<usize> {
    let rows = store.read_all_rows(OFFER_SHEET).await?;
    let removed = delete_rows(store, &duplicate_row_indices(&rows)).await?;
    if removed > 0 {
        log.info("dedupe", format!("removed {removed} duplicate row(s)"))
            .await;
    } else {
        debug!("No duplicate rows");
    }
    Ok(removed)
}

/// Reset the basic filter to cover every used row and all offer columns.
pub async fn refresh_derived_filters(store: &dyn RecordStore, log: &ActivityLog) -> Result<()> {
    let rows = store.read_all_rows(OFFER_SHEET).await?;
    let last_row = rows.len().max(1);
    store
        .set_filter_range(OFFER_SHEET, 0..last_row, 0..OFFER_COLUMNS)
        .await?;
    log.info("filters", format!("basic filter reset for rows 1..{last_row}"))
        .await;
    Ok(())
}

/// Expiry, then deduplication, then the filter reset.
pub async fn reconcile(
    store: &dyn RecordStore,
    log: &ActivityLog,
    today: NaiveDate,
) -> Result<ReconcileSummary> {
    let expired = delete_expired_records(store, log, today).await?;
    let duplicates = deduplicate_records(store, log).await?;
    refresh_derived_filters(store, log).await?;
    Ok(ReconcileSummary {
        expired,
        duplicates,
    })
}
