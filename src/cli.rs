use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "site-diff")]
#[command(version)]
#[command(about = "Visual regression testing with site exploration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file (default: ./site-diff.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Quiet mode (warnings and errors only, no progress bar)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl a site breadth-first and screenshot every page found
    Explore(ExploreArgs),

    /// Screenshot the pages listed in the config file
    Capture(CaptureArgs),

    /// Compare current screenshots against the baseline
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
pub struct ExploreArgs {
    /// URL to start exploring from
    #[arg(value_name = "URL")]
    pub url: String,

    /// Maximum link depth from the start URL
    #[arg(long, value_name = "N")]
    pub max_depth: Option<usize>,

    /// Maximum number of pages to capture
    #[arg(short = 'n', long, value_name = "N")]
    pub max_pages: Option<usize>,

    /// Skip URLs whose path matches this glob (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Only visit URLs whose path matches one of these globs (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub include: Vec<String>,

    /// Viewport size as WIDTHxHEIGHT, e.g. 1366x768
    #[arg(long, value_name = "SIZE")]
    pub viewport: Option<String>,

    /// Write screenshots into the baseline tree instead of current
    #[arg(long)]
    pub baseline: bool,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,

    /// Treat URLs that differ only in their query string as the same page
    #[arg(long)]
    pub remove_query: bool,

    /// Username for login walls met during exploration
    #[arg(long, env = "SITE_DIFF_USERNAME")]
    pub username: Option<String>,

    /// Password for login walls (prompted for when omitted)
    #[arg(long, env = "SITE_DIFF_PASSWORD")]
    pub password: Option<String>,

    /// Screenshot directory (default from config, then ./screenshots)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Write a JSON exploration report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Write screenshots into the baseline tree instead of current
    #[arg(long)]
    pub baseline: bool,

    /// How many pages to capture in parallel
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub headed: bool,

    /// Username for the login performed before capturing
    #[arg(long, env = "SITE_DIFF_USERNAME")]
    pub username: Option<String>,

    /// Password for the login (prompted for when omitted)
    #[arg(long, env = "SITE_DIFF_PASSWORD")]
    pub password: Option<String>,

    /// Screenshot directory (default from config, then ./screenshots)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Highest tolerated difference in percent of pixels
    #[arg(short, long, value_name = "PCT")]
    pub threshold: Option<f64>,

    /// Copy new screenshots without a baseline into the baseline tree
    #[arg(long)]
    pub update_missing: bool,

    /// Write the comparison report as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Write the comparison report as HTML to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Write the comparison report as JUnit XML to this file
    #[arg(long, value_name = "FILE")]
    pub junit: Option<PathBuf>,

    /// Write the comparison report as CSV to this file
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Screenshot directory (default from config, then ./screenshots)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explore_parsing() {
        let cli = Cli::try_parse_from([
            "site-diff",
            "explore",
            "https://example.com",
            "--max-depth",
            "2",
            "-n",
            "20",
            "--exclude",
            "/logout",
            "--exclude",
            "/admin/*",
            "--baseline",
        ])
        .unwrap();

        match cli.command {
            Commands::Explore(args) => {
                assert_eq!(args.url, "https://example.com");
                assert_eq!(args.max_depth, Some(2));
                assert_eq!(args.max_pages, Some(20));
                assert_eq!(args.exclude, ["/logout", "/admin/*"]);
                assert!(args.baseline);
                assert!(!args.headed);
            }
            _ => panic!("expected explore command"),
        }
    }

    #[test]
    fn test_explore_requires_url() {
        assert!(Cli::try_parse_from(["site-diff", "explore"]).is_err());
    }

    #[test]
    fn test_unset_flags_stay_none_for_config_merging() {
        let cli = Cli::try_parse_from(["site-diff", "explore", "https://example.com"]).unwrap();
        match cli.command {
            Commands::Explore(args) => {
                assert_eq!(args.max_depth, None);
                assert_eq!(args.max_pages, None);
                assert!(args.output.is_none());
                assert!(args.viewport.is_none());
            }
            _ => panic!("expected explore command"),
        }
    }

    #[test]
    fn test_capture_parsing() {
        let cli = Cli::try_parse_from(["site-diff", "capture", "-j", "8", "--baseline"]).unwrap();
        match cli.command {
            Commands::Capture(args) => {
                assert_eq!(args.concurrency, Some(8));
                assert!(args.baseline);
            }
            _ => panic!("expected capture command"),
        }
    }

    #[test]
    fn test_compare_parsing() {
        let cli = Cli::try_parse_from([
            "site-diff",
            "compare",
            "--threshold",
            "0.5",
            "--update-missing",
            "--junit",
            "junit.xml",
        ])
        .unwrap();
        match cli.command {
            Commands::Compare(args) => {
                assert_eq!(args.threshold, Some(0.5));
                assert!(args.update_missing);
                assert_eq!(args.junit, Some(PathBuf::from("junit.xml")));
            }
            _ => panic!("expected compare command"),
        }
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        let result = Cli::try_parse_from([
            "site-diff",
            "compare",
            "--verbose",
            "--quiet",
        ]);
        assert!(result.is_err());
    }
}
