//! Record store: a spreadsheet-like table of string rows per worksheet.
//!
//! Row indices are 0-based and count the header row, so index 0 is the
//! header and data rows start at 1. The store assumes a single writer.

#[cfg(feature = "sheets")]
mod google_auth;
mod memory;
#[cfg(feature = "sheets")]
mod sheets;

#[cfg(feature = "sheets")]
pub use google_auth::{ServiceAccountAuth, ServiceAccountKey, SheetsAuth, SHEETS_SCOPES};
pub use memory::MemoryRecordStore;
#[cfg(feature = "sheets")]
pub use sheets::SheetsStore;

use std::ops::Range;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{LOG_HEADERS, LOG_SHEET, OFFER_HEADERS, OFFER_SHEET};

/// Row height of the log worksheet, in pixels.
pub const LOG_ROW_HEIGHT: u32 = 21;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Make sure `title` exists and its first row is `headers`. A missing
    /// worksheet is created; a mismatched header row is rewritten in place.
    async fn open_or_create_worksheet(&self, title: &str, headers: &[&str]) -> Result<()>;

    /// Every row, header included.
    async fn read_all_rows(&self, title: &str) -> Result<Vec<Vec<String>>>;

    /// Append rows after the last row.
    async fn append_rows(&self, title: &str, rows: &[Vec<String>]) -> Result<()>;

    /// Delete the given rows in one request, applied in the order given.
    /// Pass indices highest first so earlier deletions don't shift later ones.
    async fn batch_delete_rows(&self, title: &str, row_indices: &[usize]) -> Result<()>;

    /// Replace the basic filter with one over `rows` x `columns`.
    async fn set_filter_range(
        &self,
        title: &str,
        rows: Range<usize>,
        columns: Range<usize>,
    ) -> Result<()>;

    async fn set_row_height(&self, title: &str, pixels: u32) -> Result<()>;
}

/// Prepare the offers and log worksheets.
pub async fn ensure_schema(store: &dyn RecordStore) -> Result<()> {
    store
        .open_or_create_worksheet(OFFER_SHEET, &OFFER_HEADERS)
        .await?;
    store.open_or_create_worksheet(LOG_SHEET, &LOG_HEADERS).await?;
    store.set_row_height(LOG_SHEET, LOG_ROW_HEIGHT).await?;
    Ok(())
}
