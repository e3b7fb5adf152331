//! Login walls: detection, one-shot authentication, and per-run auth state.
//!
//! Detection is heuristic. A page counts as a login page when a visible
//! username-like field and a visible password-like field are both present;
//! the submit control is optional and Enter is the fallback. Success is
//! judged by re-running detection after the submit, which is deliberate and
//! imperfect: a page that still shows the form is treated as a failed login.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use browser::{BrowserError, PageHandle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Supplies credentials when a login wall is first met. `None` means
/// "continue without authenticating for this run".
pub trait CredentialProvider: Send + Sync {
    fn request(&self, origin: &str) -> Option<Credentials>;
}

pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn request(&self, _origin: &str) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn request(&self, _origin: &str) -> Option<Credentials> {
        None
    }
}

/// Ranked selector tables used by the detector, most specific first.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginHeuristics {
    #[serde(default = "default_username_selectors")]
    pub username_selectors: Vec<String>,
    #[serde(default = "default_password_selectors")]
    pub password_selectors: Vec<String>,
    #[serde(default = "default_submit_selectors")]
    pub submit_selectors: Vec<String>,
    /// Lowercase fragments matched against visible button text when no
    /// submit selector hits.
    #[serde(default = "default_submit_text_hints")]
    pub submit_text_hints: Vec<String>,
}

impl Default for LoginHeuristics {
    fn default() -> Self {
        Self {
            username_selectors: default_username_selectors(),
            password_selectors: default_password_selectors(),
            submit_selectors: default_submit_selectors(),
            submit_text_hints: default_submit_text_hints(),
        }
    }
}

fn default_username_selectors() -> Vec<String> {
    to_strings(&[
        "input[type='email']",
        "input[autocomplete='username']",
        "input[name='username']",
        "input[name='email']",
        "input[name='login']",
        "input[name='user']",
        "input[id*='user' i]",
        "input[id*='email' i]",
        "input[type='text'][name*='user' i]",
    ])
}

fn default_password_selectors() -> Vec<String> {
    to_strings(&[
        "input[type='password']",
        "input[autocomplete='current-password']",
        "input[name='password']",
    ])
}

fn default_submit_selectors() -> Vec<String> {
    to_strings(&[
        "button[type='submit']",
        "input[type='submit']",
        "button[name='login']",
        "form button",
    ])
}

fn default_submit_text_hints() -> Vec<String> {
    to_strings(&["sign in", "log in", "login", "submit", "continue"])
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Selectors for the parts of a detected login form.
#[derive(Debug, Clone)]
pub struct LoginForm {
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: Option<String>,
}

pub struct LoginDetector {
    heuristics: LoginHeuristics,
}

impl LoginDetector {
    pub fn new(heuristics: LoginHeuristics) -> Self {
        Self { heuristics }
    }

    /// `Some(form)` iff the page currently shows a login form.
    pub async fn detect(&self, page: &dyn PageHandle) -> Result<Option<LoginForm>, SessionError> {
        let username = page
            .first_visible(&self.heuristics.username_selectors)
            .await?;
        let Some(username_selector) = username else {
            return Ok(None);
        };

        let password = page
            .first_visible(&self.heuristics.password_selectors)
            .await?;
        let Some(password_selector) = password else {
            return Ok(None);
        };

        let mut submit_selector = page.first_visible(&self.heuristics.submit_selectors).await?;
        if submit_selector.is_none() {
            for probe in page.visible_buttons().await? {
                let text = probe.text.to_lowercase();
                if self
                    .heuristics
                    .submit_text_hints
                    .iter()
                    .any(|hint| text.contains(hint.as_str()))
                {
                    submit_selector = Some(probe.locator);
                    break;
                }
            }
        }

        debug!(
            "Login form detected (username: {}, password: {}, submit: {:?})",
            username_selector, password_selector, submit_selector
        );
        Ok(Some(LoginForm {
            username_selector,
            password_selector,
            submit_selector,
        }))
    }
}

impl Default for LoginDetector {
    fn default() -> Self {
        Self::new(LoginHeuristics::default())
    }
}

pub struct Authenticator {
    detector: LoginDetector,
    settle_ms: u64,
}

impl Authenticator {
    pub fn new(heuristics: LoginHeuristics, settle_ms: u64) -> Self {
        Self {
            detector: LoginDetector::new(heuristics),
            settle_ms,
        }
    }

    /// Fill the form, submit once and re-check. Returns `false` when the
    /// page still looks like a login page afterwards. Never retries.
    pub async fn attempt(
        &self,
        page: &dyn PageHandle,
        form: &LoginForm,
        credentials: &Credentials,
    ) -> Result<bool, SessionError> {
        info!("Attempting login as '{}'", credentials.username);

        page.fill_field(&form.username_selector, &credentials.username)
            .await?;
        page.fill_field(&form.password_selector, &credentials.password)
            .await?;

        match &form.submit_selector {
            Some(selector) => page.click(selector).await?,
            None => page.press_enter().await?,
        }
        page.settle(self.settle_ms).await;

        if self.detector.detect(page).await?.is_some() {
            warn!("Login form still present after submit; treating login as failed");
            Ok(false)
        } else {
            info!("Login succeeded");
            Ok(true)
        }
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new(LoginHeuristics::default(), 2000)
    }
}

/// Per-run authentication state. Flips to authenticated at most once and
/// never reverts; remembers a declined prompt so the user is asked at most
/// once per run.
#[derive(Debug, Default)]
pub struct AuthState {
    authenticated: bool,
    prompt_declined: bool,
    credentials: Option<Credentials>,
}

impl AuthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn mark_authenticated(&mut self) {
        if !self.authenticated {
            self.authenticated = true;
            info!("Session is now authenticated");
        }
    }

    /// Cached credentials, or a one-time ask through the provider.
    pub fn resolve_credentials(
        &mut self,
        provider: &dyn CredentialProvider,
        origin: &str,
    ) -> Option<Credentials> {
        if let Some(credentials) = &self.credentials {
            return Some(credentials.clone());
        }
        if self.prompt_declined {
            return None;
        }
        match provider.request(origin) {
            Some(credentials) if !credentials.username.is_empty() => {
                self.credentials = Some(credentials.clone());
                Some(credentials)
            }
            _ => {
                self.prompt_declined = true;
                info!("No credentials supplied; continuing without authentication");
                None
            }
        }
    }
}

/// The shared authentication artifact for batch captures: where the login
/// form lives, which selectors drive it, and the credentials to replay.
/// Computed once before any batch starts and read-only afterwards.
#[derive(Debug, Clone)]
pub struct AuthBundle {
    pub login_url: String,
    pub form: LoginForm,
    pub credentials: Credentials,
}
