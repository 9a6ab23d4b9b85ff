//! Browser-style Keycloak login and session freshness.
//!
//! The portal only issues a usable session cookie after the full OIDC dance:
//! visit the portal, fetch the IdP login page, post the login form, follow the
//! redirects back. A redirect to the portal alone is not trusted; a minimal
//! catalog search must succeed before the session is handed out.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::blocking::Client as HttpClient;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT,
};
use reqwest::{StatusCode, Url};
use scraper::{Html, Selector};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::ServiceEndpoints;
use crate::error::{Error, Result};
use crate::util::{origin_of, urljoin};

/// Sessions older than this are renewed before use, ahead of the server's own timeout.
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(25 * 60);

const PROBE_BBOX: [f64; 4] = [-9.0, 38.0, -8.0, 39.0];

const SESSION_COOKIES: [&str; 4] = ["auth_session", "connect.sid", "JSESSIONID", "KC_RESTART"];

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Portal account. Kept in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Login progress; `Failed` can follow any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    FetchingLoginForm,
    SubmittingCredentials,
    Verifying,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::FetchingLoginForm => "fetching login form",
            Self::SubmittingCredentials => "submitting credentials",
            Self::Verifying => "verifying session",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The parts of an IdP login form needed to submit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    /// `action` attribute as found in the page, possibly relative.
    pub action: String,
    /// Hidden inputs (anti-CSRF tokens and the like), in document order.
    pub hidden_fields: Vec<(String, String)>,
}

/// Extracts the login form from an IdP page.
pub trait LoginFormParser: Send + Sync {
    fn parse(&self, html: &str) -> Option<LoginForm>;
}

/// Finds a Keycloak login form by its element id.
#[derive(Debug, Clone)]
pub struct KeycloakFormParser {
    form_id: String,
}

impl KeycloakFormParser {
    pub fn new(form_id: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
        }
    }
}

impl Default for KeycloakFormParser {
    fn default() -> Self {
        Self::new("kc-form-login")
    }
}

impl LoginFormParser for KeycloakFormParser {
    fn parse(&self, html: &str) -> Option<LoginForm> {
        let doc = Html::parse_document(html);
        let forms = Selector::parse("form").ok()?;
        let inputs = Selector::parse("input").ok()?;

        let form = doc
            .select(&forms)
            .find(|f| f.value().id() == Some(self.form_id.as_str()))?;
        let action = form.value().attr("action")?.trim().to_string();

        let hidden_fields = form
            .select(&inputs)
            .filter(|i| {
                i.value()
                    .attr("type")
                    .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
            })
            .filter_map(|i| {
                let name = i.value().attr("name")?;
                let value = i.value().attr("value").unwrap_or("");
                Some((name.to_string(), value.to_string()))
            })
            .collect();

        Some(LoginForm {
            action,
            hidden_fields,
        })
    }
}

/// An authenticated HTTP client plus the moment it was authenticated.
pub struct SessionContext {
    http: HttpClient,
    authenticated_at: Instant,
    max_age: Duration,
    credentials: Credentials,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated_at", &self.authenticated_at)
            .field("max_age", &self.max_age)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn new(http: HttpClient, credentials: Credentials, authenticated_at: Instant) -> Self {
        Self {
            http,
            authenticated_at,
            max_age: SESSION_MAX_AGE,
            credentials,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn authenticated_at(&self) -> Instant {
        self.authenticated_at
    }

    pub fn age(&self) -> Duration {
        self.authenticated_at.elapsed()
    }

    /// Whether the session is older than its maximum age at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.authenticated_at) > self.max_age
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Performs the Keycloak login against a [`ServiceEndpoints`] set.
#[derive(Clone)]
pub struct SessionAuthenticator {
    endpoints: ServiceEndpoints,
    parser: Arc<dyn LoginFormParser>,
    verify: bool,
    timeout: Duration,
    max_age: Duration,
}

impl fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuthenticator")
            .field("endpoints", &self.endpoints)
            .field("verify", &self.verify)
            .field("timeout", &self.timeout)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl SessionAuthenticator {
    pub fn new(endpoints: ServiceEndpoints) -> Self {
        let parser = Arc::new(KeycloakFormParser::new(endpoints.login_form_id.clone()));
        Self {
            endpoints,
            parser,
            verify: true,
            timeout: Duration::from_secs(30),
            max_age: SESSION_MAX_AGE,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn LoginFormParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Whether to verify TLS certificates.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Timeout for login and probe requests.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    /// Logs in from scratch and returns a verified session.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<SessionContext> {
        let mut state = AuthState::Unauthenticated;
        match self.login(credentials, &mut state) {
            Ok(ctx) => {
                advance(&mut state, AuthState::Authenticated);
                info!("Authentication successful! Session is valid.");
                Ok(ctx)
            }
            Err(e) => {
                warn!(stage = %state, "Authentication failed: {}", e);
                advance(&mut state, AuthState::Failed);
                Err(e)
            }
        }
    }

    fn login(&self, credentials: &Credentials, state: &mut AuthState) -> Result<SessionContext> {
        info!(user = credentials.username(), "Starting authentication process...");
        let e = &self.endpoints;
        let jar = Arc::new(Jar::default());
        let http = self.build_http(jar.clone())?;

        advance(state, AuthState::FetchingLoginForm);
        let stage = *state;
        let net = |source: reqwest::Error| Error::AuthNetwork { stage, source };

        debug!("Visiting main site...");
        http.get(&e.main_site)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(net)?;

        let auth_url = Url::parse_with_params(
            &format!("{}/auth", e.auth_base_url),
            &[
                ("client_id", e.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", e.redirect_uri.as_str()),
                ("scope", e.scope.as_str()),
            ],
        )
        .map_err(|err| Error::InvalidEndpoint {
            url: e.auth_base_url.clone(),
            reason: err.to_string(),
        })?;

        debug!("Getting authentication page...");
        let page = http
            .get(auth_url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(net)?;
        let login_page = page.url().clone();
        debug!(status = %page.status(), "Got login page");
        let html = page.text().map_err(net)?;

        let form = self
            .parser
            .parse(&html)
            .ok_or_else(|| Error::AuthFormNotFound {
                url: login_page.to_string(),
            })?;
        let action = urljoin(&login_page, &form.action).ok_or_else(|| Error::AuthFormNotFound {
            url: login_page.to_string(),
        })?;

        advance(state, AuthState::SubmittingCredentials);
        let stage = *state;
        let net = |source: reqwest::Error| Error::AuthNetwork { stage, source };

        let mut fields = form.hidden_fields;
        fields.retain(|(k, _)| k != "username" && k != "password");
        fields.push(("username".to_string(), credentials.username.clone()));
        fields.push(("password".to_string(), credentials.password.clone()));

        debug!("Found login form, submitting credentials...");
        let mut req = http
            .post(action)
            .form(&fields)
            .header(REFERER, login_page.as_str());
        if let Some(origin) = origin_of(&e.auth_base_url) {
            req = req.header(ORIGIN, origin);
        }
        let resp = req.send().map_err(net)?;
        let status = resp.status();
        let landed = resp.url().to_string();
        debug!(status = %status, url = %landed, "Login response");

        advance(state, AuthState::Verifying);
        if !landed.starts_with(&e.main_site) {
            return Err(Error::InvalidCredentials {
                status: status.as_u16(),
                url: landed,
            });
        }
        debug!("Successfully redirected to main site");
        report_session_cookies(&jar, &e.main_site);

        debug!("Testing authentication with catalog API...");
        self.probe(&http)?;

        Ok(SessionContext {
            http,
            authenticated_at: Instant::now(),
            max_age: self.max_age,
            credentials: credentials.clone(),
        })
    }

    /// Minimal search proving the session is authorized; succeeds only on HTTP 200.
    pub fn probe(&self, http: &HttpClient) -> Result<()> {
        let resp = http
            .post(&self.endpoints.search_url)
            .json(&json!({ "bbox": PROBE_BBOX, "limit": 1 }))
            .timeout(self.timeout)
            .send()
            .map_err(|e| Error::ProbeFailed {
                reason: e.to_string(),
            })?;

        match resp.status() {
            StatusCode::OK => Ok(()),
            status => Err(Error::ProbeFailed {
                reason: format!("catalog answered HTTP {}", status),
            }),
        }
    }

    /// Runs the probe against an existing session.
    pub fn is_valid(&self, ctx: &SessionContext) -> bool {
        match self.probe(ctx.http()) {
            Ok(()) => true,
            Err(e) => {
                debug!("Session validation error: {}", e);
                false
            }
        }
    }

    fn build_http(&self, jar: Arc<Jar>) -> Result<HttpClient> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_static(BROWSER_USER_AGENT),
        );
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        default_headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-PT,pt;q=0.9,en;q=0.8"),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .cookie_provider(jar)
            .connect_timeout(self.timeout)
            .timeout(self.timeout);

        if !self.verify {
            warn!("TLS certificate verification is disabled for this session");
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build().map_err(Error::HttpClient)
    }
}

fn advance(state: &mut AuthState, next: AuthState) {
    debug!(from = %state, to = %next, "auth state");
    *state = next;
}

fn report_session_cookies(jar: &Jar, main_site: &str) {
    let Ok(url) = Url::parse(main_site) else {
        return;
    };
    let names: Vec<String> = jar
        .cookies(&url)
        .and_then(|h| h.to_str().ok().map(str::to_string))
        .map(|header| {
            header
                .split(';')
                .filter_map(|pair| pair.split('=').next())
                .map(str::trim)
                .filter(|name| SESSION_COOKIES.contains(name))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if names.is_empty() {
        debug!("No specific authentication cookies found, relying on the probe");
    } else {
        debug!("Found authentication cookies: {}", names.join(", "));
    }
}

/// Result of a freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    Fresh,
    /// Older than the maximum session age.
    Expired,
    /// The probe was refused before the session aged out.
    Rejected,
}

/// The single live session of a run, with the means to renew it.
///
/// Renewal needs `&mut self`, so only one caller can replace the context at a time.
#[derive(Debug)]
pub struct Session {
    authenticator: SessionAuthenticator,
    context: SessionContext,
}

impl Session {
    pub fn login(authenticator: SessionAuthenticator, credentials: &Credentials) -> Result<Self> {
        let context = authenticator.authenticate(credentials)?;
        Ok(Self {
            authenticator,
            context,
        })
    }

    pub fn from_parts(authenticator: SessionAuthenticator, context: SessionContext) -> Self {
        Self {
            authenticator,
            context,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn authenticator(&self) -> &SessionAuthenticator {
        &self.authenticator
    }

    /// Elapsed-time check first, then the probe.
    pub fn check(&self) -> SessionHealth {
        if self.context.is_expired() {
            SessionHealth::Expired
        } else if !self.authenticator.is_valid(&self.context) {
            SessionHealth::Rejected
        } else {
            SessionHealth::Fresh
        }
    }

    /// Logs in again with the retained credentials and swaps in the new context.
    pub fn renew(&mut self) -> Result<()> {
        let fresh = self.authenticator.authenticate(&self.context.credentials)?;
        self.context = fresh;
        Ok(())
    }

    /// Renews the session when it is expired or refused; returns whether it did.
    pub fn ensure_fresh(&mut self) -> Result<bool> {
        match self.check() {
            SessionHealth::Fresh => Ok(false),
            health => {
                info!(?health, "Session expired or invalid, re-authenticating...");
                self.renew()?;
                Ok(true)
            }
        }
    }
}
