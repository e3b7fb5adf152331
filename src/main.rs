mod cli;
mod config;
mod credentials;
mod progress;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use browser::{BrowserSession, ChromeSession, LaunchConfig, PageProfile};
use capture::{prepare_auth, CaptureEngine, CapturePlan};
use compare::{compare_trees, update_missing, CompareSettings, ComparisonStatus};
use explorer::{Explorer, ExplorerConfig, ProgressFn, RunOutcome};
use session::{CredentialProvider, Credentials, NoCredentials, StaticCredentials};

use crate::cli::{CaptureArgs, Cli, Commands, CompareArgs, ExploreArgs};
use crate::config::FileConfig;
use crate::credentials::TerminalPrompt;
use crate::progress::ExploreProgress;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose, cli.quiet);

    // 0: clean, 1: visual differences or failed pages, 2: the tool itself broke
    match run(cli).await {
        Ok(false) => {}
        Ok(true) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<bool> {
    let file_config = config::load_config(cli.config.as_deref())?;
    let quiet = cli.quiet;
    let show_progress = !cli.quiet && !cli.verbose;

    match cli.command {
        Commands::Explore(args) => run_explore(file_config, args, quiet, show_progress).await,
        Commands::Capture(args) => run_capture(file_config, args).await,
        Commands::Compare(args) => run_compare(file_config, args),
    }
}

async fn run_explore(
    config: FileConfig,
    args: ExploreArgs,
    quiet: bool,
    show_progress: bool,
) -> Result<bool> {
    let output_root = args.output.unwrap_or_else(|| config.output_dir.clone());
    let tree = if args.baseline { "baselines" } else { "current" };

    let mut explore = ExplorerConfig::new(&args.url);
    explore.max_depth = args.max_depth.unwrap_or(config.explore.max_depth);
    explore.max_pages = args.max_pages.unwrap_or(config.explore.max_pages);
    explore.remove_query = args.remove_query || config.explore.remove_query;
    explore.exclude = [config.explore.exclude.clone(), args.exclude].concat();
    explore.include = [config.explore.include.clone(), args.include].concat();
    explore.output_dir = output_root.join(tree);
    explore.nav_timeout = Duration::from_millis(config.explore.nav_timeout_ms);
    explore.settle_ms = config.explore.settle_delay_ms;
    explore.mask_selectors = config.mask_selectors.clone();
    explore.full_page = config.explore.full_page;
    if let Some(spec) = &args.viewport {
        explore.profile.viewport = config::parse_viewport(spec)?;
    } else if let Some(viewport) = config.viewports.first() {
        explore.profile.viewport = viewport.clone();
    }
    if let Some(heuristics) = config.login_heuristics {
        explore.heuristics = heuristics;
    }
    let max_pages = explore.max_pages;

    let provider: Box<dyn CredentialProvider> = match &args.username {
        Some(username) => {
            let password = resolve_password(args.password, username)?;
            Box::new(StaticCredentials(Credentials {
                username: username.clone(),
                password,
            }))
        }
        None if quiet => Box::new(NoCredentials),
        None => Box::new(TerminalPrompt),
    };

    info!("Exploring {} (depth {}, up to {} pages)", args.url, explore.max_depth, max_pages);
    let session = ChromeSession::new(LaunchConfig {
        headless: !args.headed,
        ..LaunchConfig::default()
    });
    let explorer = Explorer::new(explore)?;

    let progress = Arc::new(ExploreProgress::new(max_pages as u64, show_progress));
    let hook = progress.clone();
    let progress_fn: ProgressFn = Arc::new(move |discovered, captured, result| {
        hook.update(discovered, captured, &result.url);
    });

    let summary = explorer
        .run(&session, provider.as_ref(), Some(progress_fn))
        .await?;
    progress.finish();

    println!(
        "\nExplored {} of {} discovered pages: {} screenshots, {} failed ({:.1}s)",
        summary.captured,
        summary.discovered,
        summary.screenshots,
        summary.failed,
        summary.duration_ms as f64 / 1000.0
    );
    if summary.authenticated {
        println!("Logged in during exploration; captures include authenticated pages.");
    }
    for page in summary.pages.iter().filter(|p| p.error.is_some()) {
        println!(
            "  failed: {} ({})",
            page.url,
            page.error.as_deref().unwrap_or("unknown error")
        );
    }
    if summary.outcome == RunOutcome::Aborted {
        println!("Exploration ended early: the browser became unreachable.");
    }

    if let Some(path) = &args.report {
        report::write_json(&summary, path)?;
        println!("Exploration report written to {}", path.display());
    }

    Ok(summary.has_failures())
}

async fn run_capture(config: FileConfig, args: CaptureArgs) -> Result<bool> {
    let base_url = config
        .base_url
        .clone()
        .context("'capture' needs base_url set in the config file")?;
    let base =
        Url::parse(&base_url).with_context(|| format!("Invalid base_url '{}'", base_url))?;
    if config.pages.is_empty() {
        bail!("'capture' needs at least one [[pages]] entry in the config file");
    }
    if config.viewports.is_empty() {
        bail!("'capture' needs at least one [[viewports]] entry in the config file");
    }

    let output_root = args.output.unwrap_or_else(|| config.output_dir.clone());
    let tree = if args.baseline { "baselines" } else { "current" };
    let output_dir = output_root.join(tree);

    let mut plans = Vec::new();
    for page in &config.pages {
        let target = base
            .join(&page.path)
            .with_context(|| format!("Invalid page path '{}'", page.path))?;
        let name = page
            .name
            .clone()
            .unwrap_or_else(|| capture::page_slug(target.as_str()));
        for viewport in &config.viewports {
            let file =
                capture::screenshot_file_name(&name, &viewport.name, page.timezone.as_deref());
            let profile = PageProfile {
                viewport: viewport.clone(),
                timezone: page.timezone.clone(),
                locale: page.locale.clone(),
            };
            let mut plan =
                CapturePlan::new(&name, target.as_str(), profile, output_dir.join(file));
            plan.wait_until = page.wait_until;
            plan.wait_for = page.wait_for.clone();
            plan.actions = page.actions.clone();
            plan.mask_selectors = config
                .mask_selectors
                .iter()
                .chain(page.mask.iter())
                .cloned()
                .collect();
            plan.settle_ms = page.delay_ms;
            plan.full_page = page.full_page;
            plans.push(plan);
        }
    }
    info!(
        "Prepared {} captures ({} pages x {} viewports)",
        plans.len(),
        config.pages.len(),
        config.viewports.len()
    );

    let session = ChromeSession::new(LaunchConfig {
        headless: !args.headed,
        ..LaunchConfig::default()
    });

    let auth = match &args.username {
        Some(username) => {
            let password = resolve_password(args.password.clone(), username)?;
            let credentials = Credentials {
                username: username.clone(),
                password,
            };
            let login_url = config.login_url.clone().unwrap_or_else(|| base_url.clone());
            let profile = plans
                .first()
                .map(|plan| plan.profile.clone())
                .unwrap_or_default();
            prepare_auth(
                &session,
                &profile,
                &login_url,
                credentials,
                Duration::from_secs(30),
            )
            .await?
        }
        None => None,
    };

    let engine = CaptureEngine::new(args.concurrency.unwrap_or(config.concurrency));
    let outcomes = engine.run(&session, &plans, auth.as_ref()).await;
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session: {}", e);
    }

    let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
    println!(
        "\nCaptured {} of {} screenshots into {}",
        succeeded,
        outcomes.len(),
        output_dir.display()
    );
    for outcome in outcomes.iter().filter(|o| !o.succeeded()) {
        println!(
            "  failed: {} ({})",
            outcome.name,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(succeeded < outcomes.len())
}

fn run_compare(config: FileConfig, args: CompareArgs) -> Result<bool> {
    let output_root = args.output.unwrap_or_else(|| config.output_dir.clone());
    let baseline_dir = output_root.join("baselines");
    let current_dir = output_root.join("current");
    if !current_dir.is_dir() {
        bail!(
            "No current screenshots at {}; run 'explore' or 'capture' first",
            current_dir.display()
        );
    }

    let settings = CompareSettings {
        fail_threshold: args.threshold.unwrap_or(config.fail_threshold),
        sensitivity: config.diff_sensitivity,
        diff_dir: output_root.join("diff"),
    };

    let comparison = compare_trees(&baseline_dir, &current_dir, &settings);

    let promoted = if args.update_missing {
        update_missing(&comparison, &baseline_dir)?
    } else {
        0
    };

    println!(
        "\n{} comparisons: {} passed, {} failed, {} new, {} missing, {} errors",
        comparison.total,
        comparison.passed,
        comparison.failed,
        comparison.new,
        comparison.missing,
        comparison.errors
    );
    if promoted > 0 {
        println!("Promoted {} new screenshots into the baseline.", promoted);
    }
    for result in &comparison.results {
        match result.status {
            ComparisonStatus::Passed => {}
            ComparisonStatus::Failed => println!(
                "  failed: {} ({:.3}% difference)",
                result.name, result.diff_percentage
            ),
            ComparisonStatus::New => println!("  new: {}", result.name),
            ComparisonStatus::Missing => println!("  missing: {}", result.name),
            ComparisonStatus::Error => println!(
                "  error: {} ({})",
                result.name,
                result.message.as_deref().unwrap_or("unknown")
            ),
        }
    }

    if let Some(path) = &args.json {
        report::write_json(&comparison, path)?;
    }
    if let Some(path) = &args.report {
        report::write_html(&comparison, path)?;
    }
    if let Some(path) = &args.junit {
        report::write_junit(&comparison, args.update_missing, path)?;
    }
    if let Some(path) = &args.csv {
        report::write_csv(&comparison, path)?;
    }

    Ok(comparison.has_failures(args.update_missing))
}

fn resolve_password(password: Option<String>, username: &str) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => rpassword::prompt_password(format!("Password for {}: ", username))
            .context("Failed to read password"),
    }
}
