//! Screenshot capture: a plan per page, a fixed step sequence, and a batch
//! engine that runs plans a few pages at a time.
//!
//! A capture never panics the run. Navigation and screenshot failures are
//! fatal for that one page and recorded in its outcome; a missing wait
//! selector or a failed interaction step degrades to a warning and the
//! screenshot is still taken.

mod engine;
mod naming;

pub use engine::{prepare_auth, CaptureEngine};
pub use naming::{page_slug, sanitize_slug, screenshot_file_name};

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use browser::{BrowserError, PageAction, PageHandle, PageProfile, WaitUntil};
use session::SessionError;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Everything needed to capture one screenshot of one page.
#[derive(Debug, Clone)]
pub struct CapturePlan {
    pub name: String,
    pub url: String,
    pub profile: PageProfile,
    pub wait_until: WaitUntil,
    pub nav_timeout: Duration,
    pub wait_for: Option<String>,
    pub selector_timeout: Duration,
    pub actions: Vec<PageAction>,
    pub mask_selectors: Vec<String>,
    pub settle_ms: u64,
    pub full_page: bool,
    pub output_path: PathBuf,
}

impl CapturePlan {
    pub fn new(name: &str, url: &str, profile: PageProfile, output_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            profile,
            wait_until: WaitUntil::Load,
            nav_timeout: Duration::from_secs(30),
            wait_for: None,
            selector_timeout: Duration::from_secs(10),
            actions: Vec::new(),
            mask_selectors: Vec::new(),
            settle_ms: 0,
            full_page: false,
            output_path,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub name: String,
    pub url: String,
    pub artifact: Option<PathBuf>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CaptureOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Run one plan against an already-open page.
///
/// Step order: navigate, wait for the readiness selector, run interaction
/// steps, inject masking styles, settle, screenshot.
pub async fn capture_page(page: &dyn PageHandle, plan: &CapturePlan) -> CaptureOutcome {
    let start = Instant::now();
    let mut outcome = CaptureOutcome {
        name: plan.name.clone(),
        url: plan.url.clone(),
        artifact: None,
        warnings: Vec::new(),
        error: None,
        duration_ms: 0,
    };
    debug!("Capturing {} -> {}", plan.url, plan.output_path.display());

    if let Err(e) = page
        .navigate(&plan.url, plan.wait_until, plan.nav_timeout)
        .await
    {
        outcome.error = Some(format!("Navigation failed: {}", e));
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        return outcome;
    }

    if let Some(selector) = &plan.wait_for {
        if let Err(e) = page.wait_for_selector(selector, plan.selector_timeout).await {
            warn!("Selector '{}' did not appear on {}: {}", selector, plan.url, e);
            outcome
                .warnings
                .push(format!("Selector '{}' did not appear: {}", selector, e));
        }
    }

    for (index, action) in plan.actions.iter().enumerate() {
        if let Err(e) = page.run_action(action).await {
            warn!("Action {} failed on {}: {}", index + 1, plan.url, e);
            outcome
                .warnings
                .push(format!("Action {} failed: {}", index + 1, e));
        }
    }

    if let Err(e) = page.inject_css(&masking_css(&plan.mask_selectors)).await {
        warn!("Failed to inject masking styles on {}: {}", plan.url, e);
        outcome
            .warnings
            .push(format!("Failed to inject masking styles: {}", e));
    }

    if plan.settle_ms > 0 {
        page.settle(plan.settle_ms).await;
    }

    match page.screenshot(&plan.output_path, plan.full_page).await {
        Ok(()) => outcome.artifact = Some(plan.output_path.clone()),
        Err(e) => outcome.error = Some(format!("Screenshot failed: {}", e)),
    }

    outcome.duration_ms = start.elapsed().as_millis() as u64;
    outcome
}

/// Stylesheet that freezes animations and blacks out masked regions before
/// the screenshot is taken. The filter applies to the element's rendered
/// subtree, so descendant rules cannot punch through it the way they can
/// with `visibility`.
pub fn masking_css(selectors: &[String]) -> String {
    let mut css = String::from(
        "*, *::before, *::after { animation: none !important; transition: none !important; caret-color: transparent !important; }\n",
    );
    for selector in selectors {
        css.push_str(&format!(
            "{} {{ background-color: #000 !important; filter: brightness(0) !important; }}\n",
            selector
        ));
    }
    css
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_css_always_freezes_animations() {
        let css = masking_css(&[]);
        assert!(css.contains("animation: none !important"));
        assert!(css.contains("transition: none !important"));
    }

    #[test]
    fn test_masking_css_blacks_out_each_selector() {
        let css = masking_css(&[".ad-banner".to_string(), "#clock".to_string()]);
        assert!(css
            .contains(".ad-banner { background-color: #000 !important; filter: brightness(0) !important; }"));
        assert!(css
            .contains("#clock { background-color: #000 !important; filter: brightness(0) !important; }"));
    }

    #[test]
    fn test_plan_defaults() {
        let plan = CapturePlan::new(
            "home",
            "https://site.test/",
            PageProfile::default(),
            PathBuf::from("shots/home.png"),
        );
        assert_eq!(plan.wait_until, WaitUntil::Load);
        assert_eq!(plan.nav_timeout, Duration::from_secs(30));
        assert!(plan.actions.is_empty());
        assert!(!plan.full_page);
    }
}
