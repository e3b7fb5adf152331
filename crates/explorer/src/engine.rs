use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use tracing::{debug, info, warn};

use browser::{BrowserSession, PageHandle, PageProfile, WaitUntil};
use capture::{capture_page, page_slug, screenshot_file_name, CapturePlan};
use session::{AuthState, Authenticator, CredentialProvider, LoginDetector, LoginHeuristics};

use crate::extract::{extract_links, PageLink};
use crate::norm::UrlFilter;
use crate::ExplorerError;

#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub start_url: String,
    pub max_depth: usize,
    pub max_pages: usize,
    pub remove_query: bool,
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub output_dir: PathBuf,
    pub profile: PageProfile,
    pub wait_until: WaitUntil,
    pub nav_timeout: Duration,
    pub settle_ms: u64,
    pub login_settle_ms: u64,
    pub mask_selectors: Vec<String>,
    pub full_page: bool,
    pub heuristics: LoginHeuristics,
}

impl ExplorerConfig {
    pub fn new(start_url: &str) -> Self {
        Self {
            start_url: start_url.to_string(),
            max_depth: 3,
            max_pages: 50,
            remove_query: false,
            exclude: Vec::new(),
            include: Vec::new(),
            output_dir: PathBuf::from("screenshots"),
            profile: PageProfile::default(),
            wait_until: WaitUntil::Load,
            nav_timeout: Duration::from_secs(30),
            settle_ms: 500,
            login_settle_ms: 2000,
            mask_selectors: Vec::new(),
            full_page: false,
            heuristics: LoginHeuristics::default(),
        }
    }
}

/// What happened on one explored page.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub url: String,
    pub name: String,
    pub depth: usize,
    pub screenshot: Option<PathBuf>,
    pub links_found: usize,
    pub is_login_page: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// The frontier emptied or a budget was reached.
    Completed,
    /// The browser became unreachable mid-crawl.
    Aborted,
}

#[derive(Debug, Serialize)]
pub struct ExplorerReport {
    pub start_url: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: RunOutcome,
    pub discovered: usize,
    pub captured: usize,
    pub screenshots: usize,
    pub failed: usize,
    pub authenticated: bool,
    pub pages: Vec<PageResult>,
}

impl ExplorerReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.outcome == RunOutcome::Aborted
    }
}

/// Called after each page with (discovered, captured, result).
pub type ProgressFn = Arc<dyn Fn(usize, usize, &PageResult) + Send + Sync>;

struct FrontierEntry {
    url: String,
    depth: usize,
}

/// Single-page breadth-first crawler. URLs enter the frontier once, are
/// visited once, and every visit produces exactly one `PageResult`.
pub struct Explorer {
    config: ExplorerConfig,
    filter: UrlFilter,
    detector: LoginDetector,
    authenticator: Authenticator,
    frontier: VecDeque<FrontierEntry>,
    visited: HashSet<String>,
    discovered: IndexSet<String>,
}

impl Explorer {
    pub fn new(config: ExplorerConfig) -> Result<Self, ExplorerError> {
        let filter = UrlFilter::new(
            &config.start_url,
            &config.exclude,
            &config.include,
            config.remove_query,
        )?;
        let detector = LoginDetector::new(config.heuristics.clone());
        let authenticator = Authenticator::new(config.heuristics.clone(), config.login_settle_ms);
        Ok(Self {
            config,
            filter,
            detector,
            authenticator,
            frontier: VecDeque::new(),
            visited: HashSet::new(),
            discovered: IndexSet::new(),
        })
    }

    /// Crawl until the frontier is empty or the page budget is spent.
    ///
    /// The whole run shares one page, so cookies survive from a login to
    /// every page visited after it. Per-page failures are recorded and the
    /// crawl moves on; only an unreachable browser ends the run early.
    pub async fn run(
        mut self,
        session: &dyn BrowserSession,
        provider: &dyn CredentialProvider,
        progress: Option<ProgressFn>,
    ) -> Result<ExplorerReport, ExplorerError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let origin = self.filter.base().origin().ascii_serialization();

        let start_url = self.filter.normalize(&self.config.start_url);
        self.enqueue(start_url, 0);

        let page = session.open_page(&self.config.profile).await?;

        let mut auth = AuthState::new();
        let mut outcome = RunOutcome::Completed;
        let mut pages: Vec<PageResult> = Vec::new();
        let mut screenshots = 0usize;
        let mut failed = 0usize;

        while pages.len() < self.config.max_pages {
            let Some(entry) = self.frontier.pop_front() else {
                break;
            };
            if !self.visited.insert(entry.url.clone()) {
                continue;
            }

            info!(
                "[{}/{}] depth {}: {}",
                pages.len() + 1,
                self.config.max_pages,
                entry.depth,
                entry.url
            );

            let plan = self.plan_for(&entry);
            let captured = capture_page(page.as_ref(), &plan).await;

            let mut result = PageResult {
                url: entry.url.clone(),
                name: plan.name.clone(),
                depth: entry.depth,
                screenshot: captured.artifact.clone(),
                links_found: 0,
                is_login_page: false,
                warnings: captured.warnings,
                error: captured.error,
            };

            let mut abort = false;
            if let Some(error) = &result.error {
                warn!("Failed to capture {}: {}", entry.url, error);
                failed += 1;
                if page.current_url().await.is_err() {
                    warn!("Browser is unreachable; ending exploration early");
                    outcome = RunOutcome::Aborted;
                    abort = true;
                }
            } else {
                screenshots += 1;
                if entry.depth < self.config.max_depth {
                    match self
                        .harvest(page.as_ref(), &entry, &mut auth, provider, &origin)
                        .await
                    {
                        Ok((links_found, is_login)) => {
                            result.links_found = links_found;
                            result.is_login_page = is_login;
                        }
                        Err(e) => {
                            warn!("Failed to inspect {}: {}", entry.url, e);
                            result.warnings.push(format!("Inspection failed: {}", e));
                        }
                    }
                }
            }

            if let Some(callback) = &progress {
                callback(self.discovered.len(), pages.len() + 1, &result);
            }
            pages.push(result);
            if abort {
                break;
            }
        }

        if let Err(e) = page.close().await {
            warn!("Failed to close page: {}", e);
        }
        if let Err(e) = session.close().await {
            warn!("Failed to close browser session: {}", e);
        }

        let report = ExplorerReport {
            start_url: self.config.start_url.clone(),
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            outcome,
            discovered: self.discovered.len(),
            captured: pages.len(),
            screenshots,
            failed,
            authenticated: auth.is_authenticated(),
            pages,
        };
        info!(
            "Explored {} of {} discovered pages ({} screenshots, {} failed) in {:.1}s",
            report.captured,
            report.discovered,
            report.screenshots,
            report.failed,
            report.duration_ms as f64 / 1000.0
        );
        Ok(report)
    }

    /// Post-capture inspection of the live page: harvest links, spot a
    /// login wall and cross it at most once per run.
    async fn harvest(
        &mut self,
        page: &dyn PageHandle,
        entry: &FrontierEntry,
        auth: &mut AuthState,
        provider: &dyn CredentialProvider,
        origin: &str,
    ) -> Result<(usize, bool), ExplorerError> {
        let html = page.content().await?;
        let current = page
            .current_url()
            .await
            .unwrap_or_else(|_| entry.url.clone());

        let links = extract_links(&html, &current, &self.filter);
        let mut links_found = links.len();
        self.enqueue_links(&links, entry.depth + 1);

        let form = match self.detector.detect(page).await {
            Ok(form) => form,
            Err(e) => {
                warn!("Login detection failed on {}: {}", entry.url, e);
                None
            }
        };
        let is_login = form.is_some();

        if let Some(form) = form {
            if !auth.is_authenticated() {
                if let Some(credentials) = auth.resolve_credentials(provider, origin) {
                    match self.authenticator.attempt(page, &form, &credentials).await {
                        Ok(true) => {
                            auth.mark_authenticated();
                            // the page behind the wall links to more of the
                            // site, so harvest it as well
                            if let Ok(html) = page.content().await {
                                let current =
                                    page.current_url().await.unwrap_or(current);
                                let links = extract_links(&html, &current, &self.filter);
                                links_found += links.len();
                                self.enqueue_links(&links, entry.depth + 1);
                            }
                        }
                        Ok(false) => warn!(
                            "Login attempt on {} failed; continuing unauthenticated",
                            entry.url
                        ),
                        Err(e) => warn!("Login attempt on {} errored: {}", entry.url, e),
                    }
                }
            }
        }

        Ok((links_found, is_login))
    }

    fn plan_for(&self, entry: &FrontierEntry) -> CapturePlan {
        let slug = page_slug(&entry.url);
        let file = screenshot_file_name(
            &slug,
            &self.config.profile.viewport.name,
            self.config.profile.timezone.as_deref(),
        );
        let mut plan = CapturePlan::new(
            &slug,
            &entry.url,
            self.config.profile.clone(),
            self.config.output_dir.join(file),
        );
        plan.wait_until = self.config.wait_until;
        plan.nav_timeout = self.config.nav_timeout;
        plan.mask_selectors = self.config.mask_selectors.clone();
        plan.settle_ms = self.config.settle_ms;
        plan.full_page = self.config.full_page;
        plan
    }

    fn enqueue_links(&mut self, links: &[PageLink], depth: usize) {
        for link in links {
            debug!("Found link '{}' -> {}", link.text, link.url);
            self.enqueue(link.url.clone(), depth);
        }
    }

    fn enqueue(&mut self, url: String, depth: usize) {
        if self.visited.contains(&url) || !self.discovered.insert(url.clone()) {
            return;
        }
        self.frontier.push_back(FrontierEntry { url, depth });
    }
}
