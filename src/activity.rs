//! Activity log: `tracing` events mirrored to the `Log` worksheet.
//!
//! Worksheet writes are best-effort. A failed write is reported on the
//! tracing side and never reaches the caller.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::models::LOG_SHEET;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct ActivityLog {
    sink: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl ActivityLog {
    /// Log to tracing and append each entry to the store's `Log` worksheet.
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { sink: store, clock }
    }

    pub async fn info(&self, function: &str, message: impl AsRef<str>) {
        self.record(Level::Info, function, message.as_ref()).await;
    }

    pub async fn warn(&self, function: &str, message: impl AsRef<str>) {
        self.record(Level::Warn, function, message.as_ref()).await;
    }

    pub async fn error(&self, function: &str, message: impl AsRef<str>) {
        self.record(Level::Error, function, message.as_ref()).await;
    }

    pub async fn record(&self, level: Level, function: &str, message: &str) {
        match level {
            Level::Info => info!(function, "{message}"),
            Level::Warn => warn!(function, "{message}"),
            Level::Error => error!(function, "{message}"),
        }

        let row = vec![
            self.clock.now().format("%Y-%m-%d %H:%M:%S").to_string(),
            level.as_str().to_string(),
            function.to_string(),
            message.to_string(),
        ];
        if let Err(err) = self.sink.append_rows(LOG_SHEET, &[row]).await {
            warn!(error = %err, "[LOG_FAIL] {level} {function}: {message}");
        }
    }
}
