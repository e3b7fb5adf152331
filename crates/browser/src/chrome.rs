//! Chrome driver. Each opened page runs in its own browser process sized to
//! the requested viewport, so concurrent pages cannot interfere with each
//! other's viewport, timezone or locale, and closing a page reclaims the
//! process. All driver calls are synchronous and run on the blocking pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::Browser as ChromeBrowser;
use headless_chrome::{LaunchOptions, Tab};
use tokio::task;
use tracing::{debug, info};

use crate::{
    BrowserError, BrowserSession, ButtonProbe, LaunchConfig, PageAction, PageHandle, PageProfile,
    WaitUntil,
};

const QUIET_POLL_INTERVAL_MS: u64 = 100;
const QUIET_POLL_ROUNDS: u32 = 20;
const QUIET_EXTRA_DELAY_MS: u64 = 500;

pub struct ChromeSession {
    launch: LaunchConfig,
}

impl ChromeSession {
    pub fn new(launch: LaunchConfig) -> Self {
        Self { launch }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn open_page(&self, profile: &PageProfile) -> Result<Box<dyn PageHandle>, BrowserError> {
        let launch = self.launch.clone();
        let prof = profile.clone();

        let (browser, tab) = task::spawn_blocking(
            move || -> Result<(ChromeBrowser, Arc<Tab>), BrowserError> {
                let options = LaunchOptions::default_builder()
                    .headless(launch.headless)
                    .window_size(Some((prof.viewport.width, prof.viewport.height)))
                    .idle_browser_timeout(launch.idle_timeout)
                    .build()
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

                let browser = ChromeBrowser::new(options)
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

                let tab = browser
                    .new_tab()
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

                if let Some(timezone) = &prof.timezone {
                    tab.call_method(Emulation::SetTimezoneOverride {
                        timezone_id: timezone.clone(),
                    })
                    .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))?;
                }

                if let Some(locale) = &prof.locale {
                    tab.call_method(Emulation::SetLocaleOverride {
                        locale: Some(locale.clone()),
                    })
                    .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))?;
                }

                Ok((browser, tab))
            },
        )
        .await
        .map_err(|e| BrowserError::LaunchFailed(e.to_string()))??;

        info!(
            "Page opened at {}x{} ({})",
            profile.viewport.width, profile.viewport.height, profile.viewport.name
        );
        Ok(Box::new(ChromePage { browser, tab }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        // Pages own their browser processes and release them individually.
        Ok(())
    }
}

struct ChromePage {
    // Owns the Chrome process; dropping it releases the process.
    #[allow(dead_code)]
    browser: ChromeBrowser,
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn evaluate_value(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        let tab = self.tab.clone();
        let script = script.to_string();
        let value = task::spawn_blocking(move || -> Result<serde_json::Value, BrowserError> {
            let result = tab
                .evaluate(&script, false)
                .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))?;
            Ok(result.value.unwrap_or(serde_json::Value::Null))
        })
        .await
        .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))??;
        Ok(value)
    }

    /// Run a script that returns `true` when it found its element.
    async fn expect_element(&self, script: &str, selector: &str) -> Result<(), BrowserError> {
        if self.evaluate_value(script).await?.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(BrowserError::Driver(anyhow::anyhow!(
                "no element matching '{}'",
                selector
            )))
        }
    }

    async fn wait_for_quiet(&self) {
        for _ in 0..QUIET_POLL_ROUNDS {
            match self.evaluate_value("document.readyState").await {
                Ok(state) if state.as_str() == Some("complete") => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Document ready probe failed: {}", e);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(QUIET_POLL_INTERVAL_MS)).await;
        }
        tokio::time::sleep(Duration::from_millis(QUIET_EXTRA_DELAY_MS)).await;
    }

    /// Full document bounds for a full-page capture, if they can be measured.
    async fn document_clip(&self) -> Option<Page::Viewport> {
        let script = r#"JSON.stringify({
            width: Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0),
            height: Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)
        })"#;

        #[derive(serde::Deserialize)]
        struct DocSize {
            width: f64,
            height: f64,
        }

        let value = self.evaluate_value(script).await.ok()?;
        let size: DocSize = serde_json::from_str(value.as_str()?).ok()?;
        if size.width <= 0.0 || size.height <= 0.0 {
            return None;
        }
        Some(Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: size.width,
            height: size.height,
            scale: 1.0,
        })
    }
}

#[async_trait]
impl PageHandle for ChromePage {
    async fn navigate(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);
        let tab = self.tab.clone();
        let target = url.to_string();

        let navigation = task::spawn_blocking(move || -> Result<(), BrowserError> {
            tab.navigate_to(&target)
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;
            tab.wait_until_navigated()
                .map_err(|e| BrowserError::Navigation(e.to_string()))?;
            Ok(())
        });

        match tokio::time::timeout(timeout, navigation).await {
            Ok(joined) => joined.map_err(|e| BrowserError::Navigation(e.to_string()))??,
            Err(_) => {
                // the blocking navigate keeps running until the driver
                // gives up; the tab may still be loading when the next
                // call touches it
                return Err(BrowserError::Timeout(format!(
                    "navigation to {} exceeded {}ms",
                    url,
                    timeout.as_millis()
                )))
            }
        }

        if wait_until == WaitUntil::NetworkIdle {
            self.wait_for_quiet().await;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        // Evaluated in the page rather than read from the driver's cached
        // tab field: the cache still answers after Chrome dies, and lags
        // behind redirects.
        let value = self.evaluate_value("window.location.href").await?;
        match value.as_str() {
            Some(url) => Ok(url.to_string()),
            None => Err(BrowserError::Driver(anyhow::anyhow!(
                "location.href did not evaluate to a string"
            ))),
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let tab = self.tab.clone();
        task::spawn_blocking(move || -> Result<String, BrowserError> {
            tab.get_content()
                .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))
        })
        .await
        .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))?
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.evaluate_value(&script).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "selector '{}' did not appear within {}ms",
                    selector,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(Duration::from_millis(QUIET_POLL_INTERVAL_MS)).await;
        }
    }

    async fn run_action(&self, action: &PageAction) -> Result<(), BrowserError> {
        match action {
            PageAction::Click { selector } => self.click(selector).await,
            PageAction::Hover { selector } => {
                let script = format!(
                    r#"(function() {{
                        const el = document.querySelector({sel});
                        if (!el) return false;
                        el.dispatchEvent(new MouseEvent('mouseover', {{ bubbles: true }}));
                        el.dispatchEvent(new MouseEvent('mouseenter', {{ bubbles: true }}));
                        return true;
                    }})()"#,
                    sel = js_string(selector)
                );
                self.expect_element(&script, selector).await
            }
            PageAction::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
            PageAction::ScrollTop => {
                self.evaluate_value("window.scrollTo(0, 0);").await?;
                Ok(())
            }
            PageAction::ScrollBottom => {
                self.evaluate_value("window.scrollTo(0, document.body.scrollHeight);")
                    .await?;
                Ok(())
            }
            PageAction::ScrollTo { selector } => {
                let script = format!(
                    r#"(function() {{
                        const el = document.querySelector({sel});
                        if (!el) return false;
                        el.scrollIntoView({{ block: 'center' }});
                        return true;
                    }})()"#,
                    sel = js_string(selector)
                );
                self.expect_element(&script, selector).await
            }
            PageAction::Type { selector, text } => self.fill_field(selector, text).await,
            PageAction::Select { selector, value } => {
                let script = format!(
                    r#"(function() {{
                        const el = document.querySelector({sel});
                        if (!el) return false;
                        el.value = {value};
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return true;
                    }})()"#,
                    sel = js_string(selector),
                    value = js_string(value)
                );
                self.expect_element(&script, selector).await
            }
        }
    }

    async fn inject_css(&self, css: &str) -> Result<(), BrowserError> {
        let script = format!(
            r#"(function() {{
                const style = document.createElement('style');
                style.textContent = {css};
                document.head.appendChild(style);
                return true;
            }})()"#,
            css = js_string(css)
        );
        self.evaluate_value(&script).await?;
        Ok(())
    }

    async fn first_visible(&self, selectors: &[String]) -> Result<Option<String>, BrowserError> {
        let script = format!(
            r#"(function() {{
                const selectors = {list};
                const visible = function(el) {{
                    if (!el) return false;
                    const style = window.getComputedStyle(el);
                    return el.offsetParent !== null && style.visibility !== 'hidden' && style.display !== 'none';
                }};
                for (const selector of selectors) {{
                    let el = null;
                    try {{ el = document.querySelector(selector); }} catch (e) {{ continue; }}
                    if (visible(el)) return selector;
                }}
                return null;
            }})()"#,
            list = serde_json::to_string(selectors).unwrap_or_else(|_| "[]".to_string())
        );
        let value = self.evaluate_value(&script).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    async fn visible_buttons(&self) -> Result<Vec<ButtonProbe>, BrowserError> {
        let script = r#"(function() {
            const out = [];
            const visible = function(el) {
                if (!el) return false;
                const style = window.getComputedStyle(el);
                return el.offsetParent !== null && style.visibility !== 'hidden' && style.display !== 'none';
            };
            const nodes = document.querySelectorAll("button, input[type='submit'], input[type='button'], [role='button']");
            let counter = 0;
            nodes.forEach(function(el) {
                if (!visible(el)) return;
                const text = (el.innerText || el.value || el.getAttribute('aria-label') || '').trim();
                let locator;
                if (el.id) {
                    locator = '#' + CSS.escape(el.id);
                } else {
                    el.setAttribute('data-vrt-probe', String(counter));
                    locator = "[data-vrt-probe='" + counter + "']";
                    counter += 1;
                }
                out.push({ locator: locator, text: text });
            });
            return JSON.stringify(out);
        })()"#;

        #[derive(serde::Deserialize)]
        struct ProbeRow {
            locator: String,
            text: String,
        }

        let value = self.evaluate_value(script).await?;
        let rows: Vec<ProbeRow> =
            serde_json::from_str(value.as_str().unwrap_or("[]")).unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|row| ButtonProbe {
                locator: row.locator,
                text: row.text,
            })
            .collect())
    }

    async fn fill_field(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                el.value = '';
                el.value = {text};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_string(selector),
            text = js_string(text)
        );
        self.expect_element(&script, selector).await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let script = format!(
            r#"(function() {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            sel = js_string(selector)
        );
        self.expect_element(&script, selector).await
    }

    async fn press_enter(&self) -> Result<(), BrowserError> {
        let tab = self.tab.clone();
        task::spawn_blocking(move || -> Result<(), BrowserError> {
            tab.press_key("Enter")
                .map(|_| ())
                .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))
        })
        .await
        .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))?
    }

    async fn settle(&self, ms: u64) {
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), BrowserError> {
        let clip = if full_page {
            self.document_clip().await
        } else {
            None
        };
        let tab = self.tab.clone();
        let target = path.to_path_buf();

        task::spawn_blocking(move || -> Result<(), BrowserError> {
            let data = tab
                .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, clip, true)
                .map_err(|e| BrowserError::Screenshot(e.to_string()))?;
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BrowserError::Screenshot(e.to_string()))?;
            }
            std::fs::write(&target, &data).map_err(|e| BrowserError::Screenshot(e.to_string()))
        })
        .await
        .map_err(|e| BrowserError::Screenshot(e.to_string()))??;

        debug!("Screenshot written to {}", path.display());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        task::spawn_blocking(move || drop(self))
            .await
            .map_err(|e| BrowserError::Driver(anyhow::anyhow!(e.to_string())))?;
        debug!("Page closed; browser process released");
        Ok(())
    }
}

/// Embed a Rust string into generated JavaScript as a quoted literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("plain"), r#""plain""#);
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
        assert_eq!(js_string("line\nbreak"), r#""line\nbreak""#);
    }
}
