use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::RecordStore;

#[derive(Debug, Default, Clone)]
struct Worksheet {
    rows: Vec<Vec<String>>,
    filter: Option<(Range<usize>, Range<usize>)>,
    row_height: Option<u32>,
    append_calls: usize,
    delete_calls: usize,
}

#[derive(Debug, Default)]
struct State {
    sheets: HashMap<String, Worksheet>,
    failing_appends: HashSet<String>,
}

/// In-memory record store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<State>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `title` worksheet already holds `rows` (header included).
    pub fn with_rows(title: &str, rows: Vec<Vec<String>>) -> Self {
        let store = Self::new();
        store.lock().sheets.insert(
            title.to_string(),
            Worksheet {
                rows,
                ..Default::default()
            },
        );
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every later append to `title` fail.
    pub fn fail_appends_to(&self, title: &str) {
        self.lock().failing_appends.insert(title.to_string());
    }

    /// All rows of `title`, header included.
    pub fn rows(&self, title: &str) -> Vec<Vec<String>> {
        self.lock()
            .sheets
            .get(title)
            .map(|sheet| sheet.rows.clone())
            .unwrap_or_default()
    }

    /// Rows of `title` after the header.
    pub fn data_rows(&self, title: &str) -> Vec<Vec<String>> {
        self.rows(title).into_iter().skip(1).collect()
    }

    pub fn filter(&self, title: &str) -> Option<(Range<usize>, Range<usize>)> {
        self.lock().sheets.get(title).and_then(|s| s.filter.clone())
    }

    pub fn row_height(&self, title: &str) -> Option<u32> {
        self.lock().sheets.get(title).and_then(|s| s.row_height)
    }

    pub fn append_calls(&self, title: &str) -> usize {
        self.lock().sheets.get(title).map_or(0, |s| s.append_calls)
    }

    pub fn delete_calls(&self, title: &str) -> usize {
        self.lock().sheets.get(title).map_or(0, |s| s.delete_calls)
    }
}

fn missing(title: &str) -> anyhow::Error {
    anyhow::anyhow!("No worksheet named '{title}'")
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn open_or_create_worksheet(&self, title: &str, headers: &[&str]) -> Result<()> {
        let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
        let mut state = self.lock();
        let sheet = state.sheets.entry(title.to_string()).or_default();
        match sheet.rows.first_mut() {
            Some(first) if *first == headers => {}
            Some(first) => *first = headers,
            None => sheet.rows.push(headers),
        }
        Ok(())
    }

    async fn read_all_rows(&self, title: &str) -> Result<Vec<Vec<String>>> {
        let state = self.lock();
        let sheet = state.sheets.get(title).ok_or_else(|| missing(title))?;
        Ok(sheet.rows.clone())
    }

    async fn append_rows(&self, title: &str, rows: &[Vec<String>]) -> Result<()> {
        let mut state = self.lock();
        if state.failing_appends.contains(title) {
            anyhow::bail!("Append to '{title}' rejected");
        }
        let sheet = state.sheets.get_mut(title).ok_or_else(|| missing(title))?;
        sheet.rows.extend(rows.iter().cloned());
        sheet.append_calls += 1;
        Ok(())
    }

    async fn batch_delete_rows(&self, title: &str, row_indices: &[usize]) -> Result<()> {
        let mut state = self.lock();
        let sheet = state.sheets.get_mut(title).ok_or_else(|| missing(title))?;
        for &index in row_indices {
            if index >= sheet.rows.len() {
                anyhow::bail!("Row {index} is out of range for '{title}'");
            }
            sheet.rows.remove(index);
        }
        sheet.delete_calls += 1;
        Ok(())
    }

    async fn set_filter_range(
        &self,
        title: &str,
        rows: Range<usize>,
        columns: Range<usize>,
    ) -> Result<()> {
        let mut state = self.lock();
        let sheet = state.sheets.get_mut(title).ok_or_else(|| missing(title))?;
        sheet.filter = Some((rows, columns));
        Ok(())
    }

    async fn set_row_height(&self, title: &str, pixels: u32) -> Result<()> {
        let mut state = self.lock();
        let sheet = state.sheets.get_mut(title).ok_or_else(|| missing(title))?;
        sheet.row_height = Some(pixels);
        Ok(())
    }
}
