//! Baseline-versus-current comparison of screenshot trees.
//!
//! Both directories are scanned for PNGs and matched by relative path.
//! Pairs are diffed pixel by pixel; unmatched files surface as `new` or
//! `missing`. A single unreadable or misshapen image marks its own
//! comparison as an error without stopping the rest.

mod diff;

pub use diff::{diff_images, PixelDiff};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    /// Difference within the failure threshold.
    Passed,
    /// Difference above the failure threshold.
    Failed,
    /// Current screenshot with no baseline counterpart.
    New,
    /// Baseline with no current counterpart.
    Missing,
    /// Comparison could not run (unreadable file, size mismatch).
    Error,
}

impl ComparisonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonStatus::Passed => "passed",
            ComparisonStatus::Failed => "failed",
            ComparisonStatus::New => "new",
            ComparisonStatus::Missing => "missing",
            ComparisonStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    pub name: String,
    pub baseline_path: Option<PathBuf>,
    pub current_path: Option<PathBuf>,
    pub status: ComparisonStatus,
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub diff_percentage: f64,
    pub diff_image_path: Option<PathBuf>,
    pub message: Option<String>,
}

impl ComparisonResult {
    fn unmatched(name: String, status: ComparisonStatus) -> Self {
        Self {
            name,
            baseline_path: None,
            current_path: None,
            status,
            diff_pixels: 0,
            total_pixels: 0,
            diff_percentage: 0.0,
            diff_image_path: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompareSettings {
    /// Highest tolerated difference, in percent of total pixels.
    pub fail_threshold: f64,
    /// Per-channel delta a pixel must exceed to count as changed.
    pub sensitivity: u8,
    /// Where diff images for changed pairs are written.
    pub diff_dir: PathBuf,
}

impl Default for CompareSettings {
    fn default() -> Self {
        Self {
            fail_threshold: 0.1,
            sensitivity: 25,
            diff_dir: PathBuf::from("screenshots/diff"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompareReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub new: usize,
    pub missing: usize,
    pub errors: usize,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<ComparisonResult>,
}

impl CompareReport {
    pub fn from_results(results: Vec<ComparisonResult>) -> Self {
        let count = |status: ComparisonStatus| {
            results.iter().filter(|r| r.status == status).count()
        };
        Self {
            total: results.len(),
            passed: count(ComparisonStatus::Passed),
            failed: count(ComparisonStatus::Failed),
            new: count(ComparisonStatus::New),
            missing: count(ComparisonStatus::Missing),
            errors: count(ComparisonStatus::Error),
            generated_at: Utc::now(),
            results,
        }
    }

    /// Whether this report should fail the run. New screenshots count as
    /// failures unless they were just promoted into the baseline; stale
    /// baselines with no current counterpart are reported but never fail
    /// the run on their own.
    pub fn has_failures(&self, new_is_ok: bool) -> bool {
        self.failed > 0 || self.errors > 0 || (!new_is_ok && self.new > 0)
    }
}

/// Compare every PNG under `baseline_dir` against its counterpart under
/// `current_dir`. Never fails as a whole; per-pair problems are folded
/// into that pair's result.
pub fn compare_trees(
    baseline_dir: &Path,
    current_dir: &Path,
    settings: &CompareSettings,
) -> CompareReport {
    let baselines = collect_pngs(baseline_dir);
    let currents = collect_pngs(current_dir);
    info!(
        "Comparing {} baseline and {} current screenshots",
        baselines.len(),
        currents.len()
    );

    let mut pairs: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for (name, path) in baselines {
        pairs.entry(name).or_default().0 = Some(path);
    }
    for (name, path) in currents {
        pairs.entry(name).or_default().1 = Some(path);
    }

    let mut results = Vec::with_capacity(pairs.len());
    for (name, pair) in pairs {
        let result = match pair {
            (Some(baseline), Some(current)) => compare_pair(name, baseline, current, settings),
            (None, Some(current)) => {
                info!("New screenshot with no baseline: {}", name);
                ComparisonResult {
                    current_path: Some(current),
                    ..ComparisonResult::unmatched(name, ComparisonStatus::New)
                }
            }
            (Some(baseline), None) => {
                warn!("Baseline with no current screenshot: {}", name);
                ComparisonResult {
                    baseline_path: Some(baseline),
                    ..ComparisonResult::unmatched(name, ComparisonStatus::Missing)
                }
            }
            (None, None) => continue,
        };
        results.push(result);
    }
    CompareReport::from_results(results)
}

fn compare_pair(
    name: String,
    baseline_path: PathBuf,
    current_path: PathBuf,
    settings: &CompareSettings,
) -> ComparisonResult {
    let mut result = ComparisonResult {
        baseline_path: Some(baseline_path.clone()),
        current_path: Some(current_path.clone()),
        ..ComparisonResult::unmatched(name, ComparisonStatus::Error)
    };

    let baseline = match image::open(&baseline_path) {
        Ok(image) => image.to_rgba8(),
        Err(e) => {
            result.message = Some(format!("Failed to read baseline: {}", e));
            result.diff_percentage = 100.0;
            return result;
        }
    };
    let current = match image::open(&current_path) {
        Ok(image) => image.to_rgba8(),
        Err(e) => {
            result.message = Some(format!("Failed to read current screenshot: {}", e));
            result.diff_percentage = 100.0;
            return result;
        }
    };

    if baseline.dimensions() != current.dimensions() {
        result.message = Some(format!(
            "Dimensions differ: baseline {}x{}, current {}x{}",
            baseline.width(),
            baseline.height(),
            current.width(),
            current.height()
        ));
        return result;
    }

    let diff = diff_images(&baseline, &current, settings.sensitivity);
    result.diff_pixels = diff.diff_pixels;
    result.total_pixels = diff.total_pixels;
    result.diff_percentage = if diff.total_pixels == 0 {
        0.0
    } else {
        diff.diff_pixels as f64 / diff.total_pixels as f64 * 100.0
    };
    result.status = if result.diff_percentage <= settings.fail_threshold {
        ComparisonStatus::Passed
    } else {
        ComparisonStatus::Failed
    };

    if diff.diff_pixels > 0 {
        let diff_path = settings.diff_dir.join(&result.name);
        match write_diff_image(&diff.image, &diff_path) {
            Ok(()) => result.diff_image_path = Some(diff_path),
            Err(e) => warn!("Failed to write diff image {}: {}", diff_path.display(), e),
        }
    }

    debug!(
        "{}: {} ({} of {} pixels, {:.3}%)",
        result.name,
        match result.status {
            ComparisonStatus::Passed => "passed",
            _ => "failed",
        },
        result.diff_pixels,
        result.total_pixels,
        result.diff_percentage
    );
    result
}

fn write_diff_image(image: &image::RgbaImage, path: &Path) -> Result<(), CompareError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Relative path (with `/` separators) to absolute path for every PNG
/// under `root`. A missing directory is just an empty tree.
fn collect_pngs(root: &Path) -> BTreeMap<String, PathBuf> {
    let mut files = BTreeMap::new();
    if !root.is_dir() {
        return files;
    }
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_png = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        if !is_png {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(name, path.to_path_buf());
    }
    files
}

/// Copy every `new` screenshot into the baseline tree. Returns how many
/// files were promoted.
pub fn update_missing(report: &CompareReport, baseline_dir: &Path) -> Result<usize, CompareError> {
    let mut promoted = 0;
    for result in &report.results {
        if result.status != ComparisonStatus::New {
            continue;
        }
        let Some(current) = &result.current_path else {
            continue;
        };
        let target = baseline_dir.join(&result.name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(current, &target)?;
        info!("Promoted {} into the baseline", result.name);
        promoted += 1;
    }
    Ok(promoted)
}
