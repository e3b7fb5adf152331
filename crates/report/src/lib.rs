//! Report writers for comparison and exploration results.
//!
//! JSON is the machine-readable form and works for any serializable
//! report. HTML, CSV and JUnit renderings are specific to comparison
//! reports: HTML for humans, CSV for spreadsheets, JUnit for CI servers.

use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use compare::{CompareReport, ComparisonResult, ComparisonStatus};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Pretty-printed JSON for any report type.
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ReportError> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    info!("Wrote JSON report to {}", path.display());
    Ok(())
}

pub fn write_csv(report: &CompareReport, path: &Path) -> Result<(), ReportError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "name",
        "status",
        "diff_pixels",
        "total_pixels",
        "diff_percentage",
        "baseline",
        "current",
        "diff_image",
        "message",
    ])?;
    for result in &report.results {
        let diff_pixels = result.diff_pixels.to_string();
        let total_pixels = result.total_pixels.to_string();
        let percentage = format!("{:.4}", result.diff_percentage);
        let baseline = path_field(&result.baseline_path);
        let current = path_field(&result.current_path);
        let diff_image = path_field(&result.diff_image_path);
        writer.write_record([
            result.name.as_str(),
            result.status.as_str(),
            diff_pixels.as_str(),
            total_pixels.as_str(),
            percentage.as_str(),
            baseline.as_str(),
            current.as_str(),
            diff_image.as_str(),
            result.message.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;
    info!("Wrote CSV report to {}", path.display());
    Ok(())
}

fn path_field(path: &Option<std::path::PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

pub fn write_html(report: &CompareReport, path: &Path) -> Result<(), ReportError> {
    ensure_parent(path)?;

    let mut html = String::new();
    html.push_str(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Visual Regression Report</title>
<style>
  body { font-family: -apple-system, 'Segoe UI', sans-serif; margin: 2rem; color: #1a1a2e; }
  h1 { font-size: 1.5rem; }
  .summary { margin: 1rem 0; }
  .summary span { display: inline-block; margin-right: 1rem; padding: 0.3rem 0.7rem; border-radius: 4px; background: #f0f0f5; }
  table { border-collapse: collapse; width: 100%; }
  th, td { text-align: left; padding: 0.5rem 0.8rem; border-bottom: 1px solid #e0e0e8; }
  .status { font-weight: 600; text-transform: uppercase; font-size: 0.8rem; }
  .status.passed { color: #1e7d32; }
  .status.failed { color: #c62828; }
  .status.new { color: #1565c0; }
  .status.missing { color: #ef6c00; }
  .status.error { color: #6a1b9a; }
  .links a { margin-right: 0.6rem; }
</style>
</head>
<body>
<h1>Visual Regression Report</h1>
"#,
    );

    html.push_str(&format!(
        "<p>Generated at {}</p>\n<div class=\"summary\">\
         <span>{} total</span><span>{} passed</span><span>{} failed</span>\
         <span>{} new</span><span>{} missing</span><span>{} errors</span></div>\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.total,
        report.passed,
        report.failed,
        report.new,
        report.missing,
        report.errors
    ));

    html.push_str("<table>\n<tr><th>Screenshot</th><th>Status</th><th>Difference</th><th>Details</th><th>Images</th></tr>\n");
    for result in &report.results {
        html.push_str(&html_row(result));
    }
    html.push_str("</table>\n</body>\n</html>\n");

    fs::write(path, html)?;
    info!("Wrote HTML report to {}", path.display());
    Ok(())
}

fn html_row(result: &ComparisonResult) -> String {
    let difference = match result.status {
        ComparisonStatus::Passed | ComparisonStatus::Failed => {
            format!("{:.3}% ({} px)", result.diff_percentage, result.diff_pixels)
        }
        _ => String::from("&ndash;"),
    };

    let mut links = String::new();
    for (label, path) in [
        ("baseline", &result.baseline_path),
        ("current", &result.current_path),
        ("diff", &result.diff_image_path),
    ] {
        if let Some(path) = path {
            links.push_str(&format!(
                "<a href=\"{}\">{}</a>",
                html_escape(&path.display().to_string()),
                label
            ));
        }
    }

    format!(
        "<tr><td>{}</td><td><span class=\"status {}\">{}</span></td><td>{}</td><td>{}</td><td class=\"links\">{}</td></tr>\n",
        html_escape(&result.name),
        result.status.as_str(),
        result.status.as_str(),
        difference,
        html_escape(result.message.as_deref().unwrap_or("")),
        links
    )
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// JUnit XML for CI servers. Every comparison becomes a test case; failed
/// screenshots surface as failures, unreadable pairs as errors and stale
/// baselines as skipped tests. New screenshots are failures too unless
/// `new_is_ok` says they were just promoted into the baseline.
pub fn write_junit(report: &CompareReport, new_is_ok: bool, path: &Path) -> Result<(), ReportError> {
    ensure_parent(path)?;

    let failures = report.failed + if new_is_ok { 0 } else { report.new };
    let skipped = report.missing + if new_is_ok { report.new } else { 0 };
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"visual-regression\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" timestamp=\"{}\">\n",
        report.total,
        failures,
        report.errors,
        skipped,
        report.generated_at.format("%Y-%m-%dT%H:%M:%S")
    ));

    for result in &report.results {
        xml.push_str(&format!(
            "  <testcase classname=\"visual-regression\" name=\"{}\">\n",
            xml_escape(&result.name)
        ));
        match result.status {
            ComparisonStatus::Passed => {}
            ComparisonStatus::Failed => {
                xml.push_str(&format!(
                    "    <failure message=\"difference {:.3}% ({} of {} pixels)\"/>\n",
                    result.diff_percentage, result.diff_pixels, result.total_pixels
                ));
            }
            ComparisonStatus::New if new_is_ok => {
                xml.push_str("    <skipped message=\"no baseline for this screenshot\"/>\n");
            }
            ComparisonStatus::New => {
                xml.push_str("    <failure message=\"no baseline for this screenshot\"/>\n");
            }
            ComparisonStatus::Missing => {
                xml.push_str("    <skipped message=\"baseline has no current screenshot\"/>\n");
            }
            ComparisonStatus::Error => {
                xml.push_str(&format!(
                    "    <error message=\"{}\"/>\n",
                    xml_escape(result.message.as_deref().unwrap_or("comparison error"))
                ));
            }
        }
        xml.push_str("  </testcase>\n");
    }
    xml.push_str("</testsuite>\n");

    fs::write(path, xml)?;
    info!("Wrote JUnit report to {}", path.display());
    Ok(())
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn ensure_parent(path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use tempfile::TempDir;

    fn sample_report() -> CompareReport {
        CompareReport::from_results(vec![
            ComparisonResult {
                name: "home_desktop.png".to_string(),
                baseline_path: Some(PathBuf::from("baselines/home_desktop.png")),
                current_path: Some(PathBuf::from("current/home_desktop.png")),
                status: ComparisonStatus::Passed,
                diff_pixels: 0,
                total_pixels: 1000,
                diff_percentage: 0.0,
                diff_image_path: None,
                message: None,
            },
            ComparisonResult {
                name: "pricing_desktop.png".to_string(),
                baseline_path: Some(PathBuf::from("baselines/pricing_desktop.png")),
                current_path: Some(PathBuf::from("current/pricing_desktop.png")),
                status: ComparisonStatus::Failed,
                diff_pixels: 42,
                total_pixels: 1000,
                diff_percentage: 4.2,
                diff_image_path: Some(PathBuf::from("diff/pricing_desktop.png")),
                message: None,
            },
            ComparisonResult {
                name: "signup & profile.png".to_string(),
                baseline_path: None,
                current_path: Some(PathBuf::from("current/signup.png")),
                status: ComparisonStatus::New,
                diff_pixels: 0,
                total_pixels: 0,
                diff_percentage: 0.0,
                diff_image_path: None,
                message: None,
            },
            ComparisonResult {
                name: "checkout_desktop.png".to_string(),
                baseline_path: Some(PathBuf::from("baselines/checkout_desktop.png")),
                current_path: None,
                status: ComparisonStatus::Missing,
                diff_pixels: 0,
                total_pixels: 0,
                diff_percentage: 0.0,
                diff_image_path: None,
                message: None,
            },
        ])
    }

    #[test]
    fn test_write_json_produces_parseable_output() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.json");
        write_json(&sample_report(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["total"], 4);
        assert_eq!(value["results"][1]["status"], "failed");
        assert_eq!(value["results"][3]["status"], "missing");
    }

    #[test]
    fn test_write_csv_has_header_and_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.csv");
        write_csv(&sample_report(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("name,status,diff_pixels"));
        assert!(lines[2].contains("failed"));
        assert!(lines[2].contains("4.2000"));
    }

    #[test]
    fn test_write_html_renders_summary_and_escapes_names() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.html");
        write_html(&sample_report(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("<span>4 total</span>"));
        assert!(content.contains("<span>1 passed</span>"));
        assert!(content.contains("<span>1 missing</span>"));
        assert!(content.contains("signup &amp; profile.png"));
        assert!(content.contains("class=\"status failed\""));
    }

    #[test]
    fn test_write_junit_counts_new_as_failure() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.xml");
        write_junit(&sample_report(), false, &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("tests=\"4\" failures=\"2\" errors=\"0\" skipped=\"1\""));
        assert!(content.contains("<failure message=\"no baseline for this screenshot\"/>"));
        assert!(content.contains("<skipped message=\"baseline has no current screenshot\"/>"));
        assert!(content.contains("name=\"signup &amp; profile.png\""));
    }

    #[test]
    fn test_write_junit_skips_promoted_screenshots() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("report.xml");
        write_junit(&sample_report(), true, &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("tests=\"4\" failures=\"1\" errors=\"0\" skipped=\"2\""));
        assert!(content.contains("<skipped message=\"no baseline for this screenshot\"/>"));
    }

    #[test]
    fn test_writers_create_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/report.json");
        write_json(&sample_report(), &path).unwrap();
        assert!(path.exists());
    }
}
