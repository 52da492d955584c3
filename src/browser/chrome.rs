//! Chrome binding of [`Browser`] over the DevTools protocol.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, InsertTextParams,
};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Browser, BrowserError, BrowserLauncher, ElementInfo, Key, Locator};
use crate::config::BrowserSettings;

/// Resolves a locator against the document and its same-origin frames, then
/// applies one operation to the match set.
const ELEMENT_JS: &str = r#"(function (kind, selector, op, index, arg) {
  const roots = [document];
  for (const frame of document.querySelectorAll('iframe, frame')) {
    try { if (frame.contentDocument) roots.push(frame.contentDocument); } catch (e) {}
  }
  const found = [];
  for (const root of roots) {
    if (kind === 'xpath') {
      const snap = root.evaluate(selector, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      for (let i = 0; i < snap.snapshotLength; i++) found.push(snap.snapshotItem(i));
    } else {
      found.push(...root.querySelectorAll(selector));
    }
  }
  const isVisible = (el) => {
    if (!el.getClientRects || el.getClientRects().length === 0) return false;
    const style = el.ownerDocument.defaultView.getComputedStyle(el);
    return style.visibility !== 'hidden' && style.display !== 'none';
  };
  if (op === 'describe') {
    return found.map((el) => ({
      text: (el.innerText || el.textContent || '').trim(),
      visible: isVisible(el),
      enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
    }));
  }
  const el = found[index];
  if (!el) return { missing: true };
  el.scrollIntoView({ block: 'center' });
  if (op === 'click') {
    if (typeof el.click === 'function') el.click();
    else el.dispatchEvent(new MouseEvent('click', { bubbles: true }));
    return { ok: true };
  }
  if (op === 'point') {
    for (const type of ['mouseover', 'mouseenter']) {
      el.dispatchEvent(new MouseEvent(type, { bubbles: true }));
    }
    const r = el.getBoundingClientRect();
    return { ok: true, x: r.left + r.width / 2, y: r.top + r.height / 2 };
  }
  if (op === 'focus') {
    el.focus();
    el.value = '';
    return { ok: true };
  }
  if (op === 'value') {
    return { ok: true, value: el.value || '' };
  }
  if (op === 'assign') {
    el.value = arg;
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return { ok: true };
  }
  return { missing: true };
})"#;

/// Launches headful Chrome windows.
pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>> {
        let chrome_path = match &self.settings.chrome_path {
            Some(path) => path.clone(),
            None => find_chrome().map(PathBuf::from).context(
                "Chrome/Chromium not found. Install Chrome or set [browser] chrome_path.",
            )?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .with_head()
            .viewport(None)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if let Some(dir) = &self.settings.profile_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create profile dir: {}", dir.display()))?;
            builder = builder.user_data_dir(dir);
        }
        if let Some([x, y]) = self.settings.window_position {
            builder = builder.arg(format!("--window-position={x},{y}"));
        }
        for arg in &self.settings.extra_args {
            builder = builder.arg(arg.clone());
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;

        info!("Launched Chrome session");
        Ok(Box::new(ChromeBrowser {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
        }))
    }
}

/// One Chrome window driven over CDP.
pub struct ChromeBrowser {
    browser: Mutex<Option<CdpBrowser>>,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl ChromeBrowser {
    /// Map a CDP failure, recognising a window that is gone.
    fn fail(&self, err: CdpError) -> anyhow::Error {
        let message = err.to_string();
        let lower = message.to_lowercase();
        let closed = self.handler_task.is_finished()
            || [
                "websocket",
                "channel",
                "connection closed",
                "target closed",
                "no target with given id",
                "session closed",
                "not attached",
            ]
            .iter()
            .any(|marker| lower.contains(marker));
        if closed {
            BrowserError::SessionClosed(message).into()
        } else {
            anyhow::Error::new(err)
        }
    }

    async fn evaluate(&self, expression: String) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build evaluate params: {e}"))?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| self.fail(e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn element_op(
        &self,
        locator: Locator,
        op: &str,
        index: usize,
        arg: &str,
    ) -> Result<Value> {
        let expression = format!(
            "{ELEMENT_JS}({}, {}, {}, {index}, {})",
            serde_json::to_string(locator.kind())?,
            serde_json::to_string(locator.selector())?,
            serde_json::to_string(op)?,
            serde_json::to_string(arg)?,
        );
        let value = self.evaluate(expression).await?;
        if value.get("missing").and_then(Value::as_bool) == Some(true) {
            return Err(BrowserError::NoSuchElement(format!("{locator} [{index}]")).into());
        }
        Ok(value)
    }

    async fn dispatch_key(
        &self,
        kind: DispatchKeyEventType,
        name: &str,
        code: i64,
        text: Option<&str>,
    ) -> Result<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(name)
            .code(name)
            .windows_virtual_key_code(code);
        if let Some(text) = text {
            builder = builder.text(text);
        }
        let params = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build key event: {e}"))?;
        self.page.execute(params).await.map_err(|e| self.fail(e))?;
        Ok(())
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn goto(&self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        self.page.goto(url).await.map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(|e| self.fail(e))?
            .unwrap_or_default())
    }

    async fn refresh(&self) -> Result<()> {
        self.page.reload().await.map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn elements(&self, locator: Locator) -> Result<Vec<ElementInfo>> {
        let value = self.element_op(locator, "describe", 0, "").await?;
        let Value::Array(items) = value else {
            return Ok(Vec::new());
        };
        Ok(items
            .iter()
            .map(|item| ElementInfo {
                text: item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                visible: item.get("visible").and_then(Value::as_bool).unwrap_or(false),
                enabled: item.get("enabled").and_then(Value::as_bool).unwrap_or(false),
            })
            .collect())
    }

    async fn click(&self, locator: Locator, index: usize) -> Result<()> {
        self.element_op(locator, "click", index, "").await?;
        Ok(())
    }

    async fn hover(&self, locator: Locator, index: usize) -> Result<()> {
        let point = self.element_op(locator, "point", index, "").await?;
        let x = point.get("x").and_then(Value::as_f64).unwrap_or_default();
        let y = point.get("y").and_then(Value::as_f64).unwrap_or_default();
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build mouse event: {e}"))?;
        self.page.execute(params).await.map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn type_text(&self, locator: Locator, index: usize, text: &str) -> Result<()> {
        self.element_op(locator, "focus", index, "").await?;
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(|e| self.fail(e))?;

        let typed = self.element_op(locator, "value", index, "").await?;
        if typed.get("value").and_then(Value::as_str) != Some(text) {
            debug!(%locator, "Typed value did not stick; assigning directly");
            self.element_op(locator, "assign", index, text).await?;
        }
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        let (name, code, text) = match key {
            Key::Escape => ("Escape", 27, None),
            Key::Enter => ("Enter", 13, Some("\r")),
        };
        self.dispatch_key(DispatchKeyEventType::KeyDown, name, code, text)
            .await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, name, code, None)
            .await
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        self.evaluate(script.to_string()).await
    }

    async fn delete_cookies(&self) -> Result<()> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|e| self.fail(e))?;
        Ok(())
    }

    async fn quit(&self) -> Result<()> {
        if let Some(mut browser) = self.browser.lock().await.take() {
            let closed = browser.close().await;
            let _ = browser.wait().await;
            self.handler_task.abort();
            closed.context("Failed to close browser")?;
            info!("Closed Chrome session");
        }
        Ok(())
    }
}

/// Find a Chrome/Chromium executable on PATH or in the usual install locations.
pub fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "chromium"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // NixOS
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .find(|candidate| Path::new(candidate).exists())
        .map(str::to_string)
}
