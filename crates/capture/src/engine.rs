use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use browser::{BrowserSession, PageHandle, PageProfile, WaitUntil};
use session::{AuthBundle, Authenticator, Credentials, LoginDetector, SessionError};

use crate::{capture_page, CaptureError, CaptureOutcome, CapturePlan};

/// Runs capture plans in fixed-size batches, one fresh page per plan.
pub struct CaptureEngine {
    concurrency: usize,
    authenticator: Authenticator,
}

impl CaptureEngine {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            authenticator: Authenticator::default(),
        }
    }

    /// Capture every plan. Per-plan failures land in that plan's outcome;
    /// the batch itself always runs to completion. Outcomes come back in
    /// plan order.
    pub async fn run(
        &self,
        session: &dyn BrowserSession,
        plans: &[CapturePlan],
        auth: Option<&AuthBundle>,
    ) -> Vec<CaptureOutcome> {
        info!(
            "Capturing {} pages ({} at a time)",
            plans.len(),
            self.concurrency
        );
        let mut outcomes = Vec::with_capacity(plans.len());
        for batch in plans.chunks(self.concurrency) {
            let tasks = batch.iter().map(|plan| self.run_one(session, plan, auth));
            outcomes.extend(join_all(tasks).await);
        }
        outcomes
    }

    async fn run_one(
        &self,
        session: &dyn BrowserSession,
        plan: &CapturePlan,
        auth: Option<&AuthBundle>,
    ) -> CaptureOutcome {
        let page = match session.open_page(&plan.profile).await {
            Ok(page) => page,
            Err(e) => {
                return CaptureOutcome {
                    name: plan.name.clone(),
                    url: plan.url.clone(),
                    artifact: None,
                    warnings: Vec::new(),
                    error: Some(format!("Failed to open page: {}", e)),
                    duration_ms: 0,
                }
            }
        };

        // Pages start from a clean browser state, so an authenticated
        // capture has to replay the login first.
        let mut replay_warning = None;
        if let Some(auth) = auth {
            if let Err(e) = self.replay_login(page.as_ref(), auth).await {
                warn!("Login replay failed for {}: {}", plan.url, e);
                replay_warning = Some(format!("Login replay failed: {}", e));
            }
        }

        let mut outcome = capture_page(page.as_ref(), plan).await;
        if let Some(warning) = replay_warning {
            outcome.warnings.insert(0, warning);
        }

        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", plan.url, e);
        }
        outcome
    }

    async fn replay_login(
        &self,
        page: &dyn PageHandle,
        auth: &AuthBundle,
    ) -> Result<(), CaptureError> {
        page.navigate(&auth.login_url, WaitUntil::Load, Duration::from_secs(30))
            .await?;
        if self
            .authenticator
            .attempt(page, &auth.form, &auth.credentials)
            .await?
        {
            Ok(())
        } else {
            Err(SessionError::AuthFailed("login form still present after submit".to_string()).into())
        }
    }
}

/// Scout the login wall once before any batch runs: open a throwaway page,
/// detect the form, attempt the login and package what worked for replay.
///
/// `Ok(None)` means captures should proceed unauthenticated, either because
/// no form was found or because the attempt failed. An unreachable browser
/// is the only fatal case.
pub async fn prepare_auth(
    session: &dyn BrowserSession,
    profile: &PageProfile,
    login_url: &str,
    credentials: Credentials,
    nav_timeout: Duration,
) -> Result<Option<AuthBundle>, CaptureError> {
    let page = session.open_page(profile).await?;
    page.navigate(login_url, WaitUntil::Load, nav_timeout)
        .await?;

    let detector = LoginDetector::default();
    let Some(form) = detector.detect(page.as_ref()).await? else {
        info!(
            "No login form at {}; captures will run unauthenticated",
            login_url
        );
        page.close().await?;
        return Ok(None);
    };

    let authenticated = Authenticator::default()
        .attempt(page.as_ref(), &form, &credentials)
        .await?;
    page.close().await?;

    if authenticated {
        Ok(Some(AuthBundle {
            login_url: login_url.to_string(),
            form,
            credentials,
        }))
    } else {
        warn!(
            "Login attempt at {} failed; captures will run unauthenticated",
            login_url
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use browser::{BrowserError, ButtonProbe, PageAction};

    const LOGIN_SELECTORS: [&str; 3] = [
        "input[name='username']",
        "input[type='password']",
        "button[type='submit']",
    ];

    #[derive(Default)]
    struct FakeSession {
        events: Arc<Mutex<Vec<String>>>,
        visible: Vec<String>,
        fail_open: bool,
        keep_form_after_submit: bool,
        fail_navigation: bool,
        fail_wait_for: bool,
        fail_screenshot: bool,
    }

    impl FakeSession {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn with_login_form(mut self) -> Self {
            self.visible = LOGIN_SELECTORS.iter().map(|s| s.to_string()).collect();
            self
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn open_page(
            &self,
            _profile: &PageProfile,
        ) -> Result<Box<dyn PageHandle>, BrowserError> {
            if self.fail_open {
                return Err(BrowserError::LaunchFailed("no browser binary".to_string()));
            }
            self.events.lock().unwrap().push("open".to_string());
            Ok(Box::new(FakePage {
                events: self.events.clone(),
                visible: Mutex::new(self.visible.clone()),
                keep_form_after_submit: self.keep_form_after_submit,
                fail_navigation: self.fail_navigation,
                fail_wait_for: self.fail_wait_for,
                fail_screenshot: self.fail_screenshot,
            }))
        }

        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    struct FakePage {
        events: Arc<Mutex<Vec<String>>>,
        visible: Mutex<Vec<String>>,
        keep_form_after_submit: bool,
        fail_navigation: bool,
        fail_wait_for: bool,
        fail_screenshot: bool,
    }

    impl FakePage {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn submit(&self) {
            if !self.keep_form_after_submit {
                self.visible.lock().unwrap().clear();
            }
        }
    }

    #[async_trait]
    impl PageHandle for FakePage {
        async fn navigate(
            &self,
            url: &str,
            _wait_until: WaitUntil,
            _timeout: Duration,
        ) -> Result<(), BrowserError> {
            if self.fail_navigation {
                return Err(BrowserError::Navigation("connection refused".to_string()));
            }
            self.push(format!("navigate {}", url));
            Ok(())
        }

        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok("https://site.test/".to_string())
        }

        async fn content(&self) -> Result<String, BrowserError> {
            Ok(String::new())
        }

        async fn wait_for_selector(
            &self,
            selector: &str,
            _timeout: Duration,
        ) -> Result<(), BrowserError> {
            if self.fail_wait_for {
                return Err(BrowserError::Timeout(format!(
                    "selector '{}' never appeared",
                    selector
                )));
            }
            Ok(())
        }

        async fn run_action(&self, _action: &PageAction) -> Result<(), BrowserError> {
            self.push("action".to_string());
            Ok(())
        }

        async fn inject_css(&self, _css: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn first_visible(
            &self,
            selectors: &[String],
        ) -> Result<Option<String>, BrowserError> {
            let visible = self.visible.lock().unwrap();
            for selector in selectors {
                if visible.iter().any(|v| v == selector) {
                    return Ok(Some(selector.clone()));
                }
            }
            Ok(None)
        }

        async fn visible_buttons(&self) -> Result<Vec<ButtonProbe>, BrowserError> {
            Ok(Vec::new())
        }

        async fn fill_field(&self, selector: &str, _text: &str) -> Result<(), BrowserError> {
            self.push(format!("fill {}", selector));
            Ok(())
        }

        async fn click(&self, selector: &str) -> Result<(), BrowserError> {
            self.push(format!("click {}", selector));
            self.submit();
            Ok(())
        }

        async fn press_enter(&self) -> Result<(), BrowserError> {
            self.push("enter".to_string());
            self.submit();
            Ok(())
        }

        async fn settle(&self, _ms: u64) {}

        async fn screenshot(&self, path: &Path, _full_page: bool) -> Result<(), BrowserError> {
            if self.fail_screenshot {
                return Err(BrowserError::Screenshot("tab crashed".to_string()));
            }
            self.push(format!("screenshot {}", path.display()));
            Ok(())
        }

        async fn close(self: Box<Self>) -> Result<(), BrowserError> {
            self.push("close".to_string());
            Ok(())
        }
    }

    fn plan(name: &str) -> CapturePlan {
        CapturePlan::new(
            name,
            &format!("https://site.test/{}", name),
            PageProfile::default(),
            PathBuf::from(format!("shots/{}.png", name)),
        )
    }

    fn creds() -> Credentials {
        Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_captures_all_plans_in_order() {
        let session = FakeSession::default();
        let engine = CaptureEngine::new(2);
        let plans = vec![plan("home"), plan("about"), plan("pricing")];

        let outcomes = engine.run(&session, &plans, None).await;

        assert_eq!(outcomes.len(), 3);
        let names: Vec<&str> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["home", "about", "pricing"]);
        assert!(outcomes.iter().all(|o| o.succeeded()));

        let events = session.events();
        assert_eq!(events.iter().filter(|e| *e == "open").count(), 3);
        assert_eq!(events.iter().filter(|e| *e == "close").count(), 3);
    }

    #[tokio::test]
    async fn test_unopenable_page_becomes_failed_outcome() {
        let session = FakeSession {
            fail_open: true,
            ..FakeSession::default()
        };
        let engine = CaptureEngine::new(1);
        let plans = vec![plan("home")];

        let outcomes = engine.run(&session, &plans, None).await;

        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].succeeded());
        assert!(outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Failed to open page"));
    }

    #[tokio::test]
    async fn test_screenshot_failure_is_fatal_for_the_page() {
        let session = FakeSession {
            fail_screenshot: true,
            ..FakeSession::default()
        };
        let engine = CaptureEngine::new(1);
        let plans = vec![plan("home")];

        let outcomes = engine.run(&session, &plans, None).await;

        assert!(!outcomes[0].succeeded());
        assert!(outcomes[0].artifact.is_none());
        assert!(outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Screenshot failed"));
    }

    #[tokio::test]
    async fn test_missing_wait_selector_degrades_to_warning() {
        let session = FakeSession {
            fail_wait_for: true,
            ..FakeSession::default()
        };
        let engine = CaptureEngine::new(1);
        let mut p = plan("home");
        p.wait_for = Some(".app-ready".to_string());

        let outcomes = engine.run(&session, &[p], None).await;

        assert!(outcomes[0].succeeded());
        assert!(outcomes[0].artifact.is_some());
        assert_eq!(outcomes[0].warnings.len(), 1);
        assert!(outcomes[0].warnings[0].contains(".app-ready"));
    }

    #[tokio::test]
    async fn test_auth_bundle_replays_login_before_navigation() {
        let session = FakeSession::default().with_login_form();
        let engine = CaptureEngine::new(1);
        let auth = AuthBundle {
            login_url: "https://site.test/login".to_string(),
            form: session::LoginForm {
                username_selector: "input[name='username']".to_string(),
                password_selector: "input[type='password']".to_string(),
                submit_selector: Some("button[type='submit']".to_string()),
            },
            credentials: creds(),
        };

        let outcomes = engine.run(&session, &[plan("account")], Some(&auth)).await;

        assert!(outcomes[0].succeeded());
        assert!(outcomes[0].warnings.is_empty());

        let events = session.events();
        let login_pos = events
            .iter()
            .position(|e| e == "navigate https://site.test/login")
            .unwrap();
        let fill_pos = events
            .iter()
            .position(|e| e == "fill input[name='username']")
            .unwrap();
        let target_pos = events
            .iter()
            .position(|e| e == "navigate https://site.test/account")
            .unwrap();
        assert!(login_pos < fill_pos);
        assert!(fill_pos < target_pos);
    }

    #[tokio::test]
    async fn test_failed_replay_becomes_warning_not_error() {
        let session = FakeSession {
            keep_form_after_submit: true,
            ..FakeSession::default()
        }
        .with_login_form();
        let engine = CaptureEngine::new(1);
        let auth = AuthBundle {
            login_url: "https://site.test/login".to_string(),
            form: session::LoginForm {
                username_selector: "input[name='username']".to_string(),
                password_selector: "input[type='password']".to_string(),
                submit_selector: None,
            },
            credentials: creds(),
        };

        let outcomes = engine.run(&session, &[plan("account")], Some(&auth)).await;

        assert!(outcomes[0].succeeded());
        assert!(outcomes[0].warnings[0].contains("Login replay failed"));
    }

    #[tokio::test]
    async fn test_prepare_auth_without_form_returns_none() {
        let session = FakeSession::default();
        let bundle = prepare_auth(
            &session,
            &PageProfile::default(),
            "https://site.test/login",
            creds(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(bundle.is_none());
        assert!(session.events().contains(&"close".to_string()));
    }

    #[tokio::test]
    async fn test_prepare_auth_builds_bundle_on_success() {
        let session = FakeSession::default().with_login_form();
        let bundle = prepare_auth(
            &session,
            &PageProfile::default(),
            "https://site.test/login",
            creds(),
            Duration::from_secs(5),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(bundle.login_url, "https://site.test/login");
        assert_eq!(bundle.form.username_selector, "input[name='username']");
        assert_eq!(bundle.credentials.username, "alice");
    }

    #[tokio::test]
    async fn test_prepare_auth_failed_login_returns_none() {
        let session = FakeSession {
            keep_form_after_submit: true,
            ..FakeSession::default()
        }
        .with_login_form();

        let bundle = prepare_auth(
            &session,
            &PageProfile::default(),
            "https://site.test/login",
            creds(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(bundle.is_none());
    }
}
