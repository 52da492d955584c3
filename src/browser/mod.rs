//! Browser session capability.
//!
//! Everything above this module talks to the page through the [`Browser`]
//! trait: elements are addressed by a static [`Locator`] plus an index into the
//! current match set, so a scripted fake can stand in for Chrome in tests.

#[cfg(feature = "chrome")]
mod chrome;
pub mod wait;

#[cfg(feature = "chrome")]
pub use chrome::{find_chrome, ChromeBrowser, ChromeLauncher};

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// How to find elements on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(&'static str),
    XPath(&'static str),
}

impl Locator {
    pub fn kind(&self) -> &'static str {
        match self {
            Locator::Css(_) => "css",
            Locator::XPath(_) => "xpath",
        }
    }

    pub fn selector(&self) -> &'static str {
        match self {
            Locator::Css(s) | Locator::XPath(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.selector())
    }
}

/// Snapshot of one matched element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementInfo {
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
}

impl ElementInfo {
    pub fn visible(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            visible: true,
            enabled: true,
        }
    }

    pub fn clickable(&self) -> bool {
        self.visible && self.enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Enter,
}

/// Conditions callers need to tell apart from ordinary failures.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// The browser window or its DevTools connection went away.
    #[error("browser session closed: {0}")]
    SessionClosed(String),

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { timeout: Duration, what: String },

    #[error("no element matches {0}")]
    NoSuchElement(String),
}

/// True when `err` (or anything in its chain) is [`BrowserError::SessionClosed`].
pub fn is_session_closed(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<BrowserError>(),
            Some(BrowserError::SessionClosed(_))
        )
    })
}

/// One live browser window.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn refresh(&self) -> Result<()>;

    /// All elements currently matching `locator`, in document order.
    async fn elements(&self, locator: Locator) -> Result<Vec<ElementInfo>>;

    /// Scroll the `index`-th match into view and click it.
    async fn click(&self, locator: Locator, index: usize) -> Result<()>;

    async fn hover(&self, locator: Locator, index: usize) -> Result<()>;

    /// Replace the value of the `index`-th match with `text`.
    async fn type_text(&self, locator: Locator, index: usize, text: &str) -> Result<()>;

    /// Send a key press to whatever currently has focus.
    async fn press_key(&self, key: Key) -> Result<()>;

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value>;

    async fn delete_cookies(&self) -> Result<()>;

    async fn quit(&self) -> Result<()>;

    async fn count(&self, locator: Locator) -> Result<usize> {
        Ok(self.elements(locator).await?.len())
    }

    async fn exists(&self, locator: Locator) -> Result<bool> {
        Ok(self.count(locator).await? > 0)
    }

    /// Index of the first visible, enabled match.
    async fn first_clickable(&self, locator: Locator) -> Result<Option<usize>> {
        Ok(self
            .elements(locator)
            .await?
            .iter()
            .position(ElementInfo::clickable))
    }

    /// Trimmed text of the first match.
    async fn text(&self, locator: Locator) -> Result<Option<String>> {
        Ok(self
            .elements(locator)
            .await?
            .into_iter()
            .next()
            .map(|e| e.text.trim().to_string()))
    }
}

/// Creates browser sessions, so the run can tear one down and start fresh.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Browser>>;
}

/// Collapse runs of whitespace and trim, like XPath `normalize-space()`.
pub fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_closed_is_found_through_context() {
        let err = anyhow::Error::new(BrowserError::SessionClosed("ws gone".into()))
            .context("Failed to read offers");
        assert!(is_session_closed(&err));

        let other = anyhow::anyhow!("element is stale");
        assert!(!is_session_closed(&other));
    }

    #[test]
    fn normalize_space_collapses_whitespace() {
        assert_eq!(
            normalize_space("  Citi Strata\n Card -  8549 "),
            "Citi Strata Card - 8549"
        );
    }

    #[test]
    fn locator_display_includes_kind() {
        assert_eq!(Locator::Css("div.x").to_string(), "css:div.x");
    }
}
