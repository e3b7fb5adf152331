//! Browser driver capability: launch a browser, open pages with a fixed
//! viewport/timezone/locale, navigate, run actions, probe the DOM and take
//! screenshots. The engines talk to [`BrowserSession`] and [`PageHandle`]
//! only; the concrete Chrome driver lives in [`chrome`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod chrome;

pub use chrome::ChromeSession;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),
    #[error("Navigation error: {0}")]
    Navigation(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Screenshot error: {0}")]
    Screenshot(String),
    #[error("Browser error: {0}")]
    Driver(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub headless: bool,
    pub idle_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// A named window size, e.g. `desktop` at 1920x1080.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            name: "desktop".to_string(),
            width: 1920,
            height: 1080,
        }
    }
}

/// Everything a page is opened with. One profile maps to one isolated
/// browser process so concurrent pages never share viewport or locale state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageProfile {
    pub viewport: Viewport,
    pub timezone: Option<String>,
    pub locale: Option<String>,
}

impl Default for PageProfile {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            timezone: None,
            locale: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitUntil {
    Load,
    /// Load plus a document-ready poll and a short quiet delay. The driver
    /// exposes no true network-idle event, so this is an approximation.
    NetworkIdle,
}

/// Pre-capture page actions, best-effort and run in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PageAction {
    Click { selector: String },
    Hover { selector: String },
    Wait { ms: u64 },
    ScrollTop,
    ScrollBottom,
    ScrollTo { selector: String },
    Type { selector: String, text: String },
    Select { selector: String, value: String },
}

/// A visible clickable control found on the page, addressable again through
/// `locator`.
#[derive(Debug, Clone)]
pub struct ButtonProbe {
    pub locator: String,
    pub text: String,
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open_page(&self, profile: &PageProfile) -> Result<Box<dyn PageHandle>, BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn navigate(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String, BrowserError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), BrowserError>;

    async fn run_action(&self, action: &PageAction) -> Result<(), BrowserError>;

    /// Append a stylesheet to the current document.
    async fn inject_css(&self, css: &str) -> Result<(), BrowserError>;

    /// First selector in `selectors` that matches a visible element, in the
    /// given order.
    async fn first_visible(&self, selectors: &[String]) -> Result<Option<String>, BrowserError>;

    async fn visible_buttons(&self) -> Result<Vec<ButtonProbe>, BrowserError>;

    /// Clear a field and type `text` into it, firing input/change events.
    async fn fill_field(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    async fn press_enter(&self) -> Result<(), BrowserError>;

    async fn settle(&self, ms: u64);

    /// Write a PNG screenshot to `path`, creating parent directories.
    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), BrowserError>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}
