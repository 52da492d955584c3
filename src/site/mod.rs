//! Driving the merchant-offers site: detection, healing, navigation and login.

pub mod detect;
pub mod login;
pub mod navigation;
pub mod recovery;
pub mod selectors;

pub use login::{authenticate, logout};
pub use navigation::{reach_offers_page, Checkpoint, NavState, NavigationReport};
pub use recovery::RecoveryOutcome;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityLog;
use crate::browser::{Browser, BrowserError};
use crate::config::{NavigationConfig, SiteConfig, TimingConfig};

/// Everything a site operation needs: the live page, settings and the log.
#[derive(Clone, Copy)]
pub struct SiteContext<'a> {
    pub browser: &'a dyn Browser,
    pub site: &'a SiteConfig,
    pub timing: &'a TimingConfig,
    pub navigation: &'a NavigationConfig,
    pub log: &'a ActivityLog,
    /// Cancelled when the run should stop at the next safe point.
    pub shutdown: &'a CancellationToken,
}

impl SiteContext<'_> {
    pub fn check_interrupted(&self) -> Result<()> {
        check_interrupted(self.shutdown)
    }
}

/// Fails with [`BrowserError::SessionClosed`] once `shutdown` is cancelled,
/// so callers unwind through their usual closed-browser paths.
pub fn check_interrupted(shutdown: &CancellationToken) -> Result<()> {
    if shutdown.is_cancelled() {
        return Err(BrowserError::SessionClosed("interrupted".to_string()).into());
    }
    Ok(())
}
