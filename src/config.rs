use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use browser::{PageAction, Viewport, WaitUntil};
use session::LoginHeuristics;

pub const DEFAULT_CONFIG_FILE: &str = "site-diff.toml";

/// The `site-diff.toml` file. Everything has a default so the explore and
/// compare commands work without any file at all; `capture` needs at least
/// `base_url` and one `[[pages]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub output_dir: PathBuf,
    pub concurrency: usize,
    /// Highest tolerated difference in percent of pixels.
    pub fail_threshold: f64,
    /// Per-channel delta a pixel must exceed to count as changed.
    pub diff_sensitivity: u8,
    pub viewports: Vec<Viewport>,
    /// Selectors blacked out on every page before the screenshot.
    pub mask_selectors: Vec<String>,
    /// Where the login form lives; defaults to `base_url` for `capture`.
    pub login_url: Option<String>,
    /// Overrides for the built-in login form detection tables.
    pub login_heuristics: Option<LoginHeuristics>,
    pub explore: ExploreSection,
    pub pages: Vec<PageEntry>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            output_dir: PathBuf::from("screenshots"),
            concurrency: 4,
            fail_threshold: 0.1,
            diff_sensitivity: 25,
            viewports: vec![Viewport::default()],
            mask_selectors: Vec::new(),
            login_url: None,
            login_heuristics: None,
            explore: ExploreSection::default(),
            pages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExploreSection {
    pub max_depth: usize,
    pub max_pages: usize,
    pub remove_query: bool,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub nav_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub full_page: bool,
}

impl Default for ExploreSection {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 50,
            remove_query: false,
            exclude: Vec::new(),
            include: Vec::new(),
            nav_timeout_ms: 30_000,
            settle_delay_ms: 500,
            full_page: false,
        }
    }
}

/// One page the `capture` command screenshots, relative to `base_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEntry {
    /// Screenshot name; derived from the path when omitted.
    pub name: Option<String>,
    pub path: String,
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub full_page: bool,
    #[serde(default)]
    pub mask: Vec<String>,
    #[serde(default)]
    pub actions: Vec<PageAction>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default = "default_wait_until")]
    pub wait_until: WaitUntil,
}

fn default_wait_until() -> WaitUntil {
    WaitUntil::Load
}

/// Load the explicit config file, or `./site-diff.toml` when present, or
/// the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => read_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                read_config(default)
            } else {
                debug!("No config file found, using defaults");
                Ok(FileConfig::default())
            }
        }
    }
}

fn read_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: FileConfig = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse a `WIDTHxHEIGHT` viewport spec like `1366x768`.
pub fn parse_viewport(spec: &str) -> Result<Viewport> {
    let lower = spec.trim().to_ascii_lowercase();
    let Some((width, height)) = lower.split_once('x') else {
        bail!("Viewport must look like 1920x1080, got '{}'", spec);
    };
    let width: u32 = width
        .trim()
        .parse()
        .with_context(|| format!("Invalid viewport width in '{}'", spec))?;
    let height: u32 = height
        .trim()
        .parse()
        .with_context(|| format!("Invalid viewport height in '{}'", spec))?;
    if width == 0 || height == 0 {
        bail!("Viewport dimensions must be non-zero, got '{}'", spec);
    }
    Ok(Viewport {
        name: format!("{}x{}", width, height),
        width,
        height,
    })
}
