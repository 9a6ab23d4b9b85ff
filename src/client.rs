use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::area::{Area, partition};
use crate::assets::{AssetCatalog, resolve};
use crate::cancel::CancelToken;
use crate::config::{ServiceEndpoints, load_config};
use crate::download::{DownloadExecutor, DownloadTask};
use crate::error::{Error, Result};
use crate::report::{RunReport, SearchFailure};
use crate::search::CatalogSearchClient;
use crate::session::{Credentials, SESSION_MAX_AGE, Session, SessionAuthenticator};
use crate::util::sanitize_file_stem;

/// Default sub-area budget, in km².
pub const DEFAULT_MAX_AREA_KM2: f64 = 200.0;

/// Default pause before every search and transfer request.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Portal account used for the Keycloak login.
    pub credentials: Credentials,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Pause before each request; `None` keeps the default.
    pub delay: Option<Duration>,
    /// Sub-area budget in km²; `None` keeps the default.
    pub max_area_km2: Option<f64>,
    /// Catalog collections to search; empty searches all of them.
    pub collections: Vec<String>,
}

/// Drives a whole run: partition, login, search, resolve, download.
#[derive(Debug, Clone)]
pub struct Client {
    credentials: Credentials,
    endpoints: ServiceEndpoints,
    verify: bool,

    delay: Duration,
    max_area_km2: f64,
    collections: Vec<String>,

    search_timeout: Duration,
    download_timeout: Duration,
    retry_max: usize,
    retry_delay: Duration,
    session_max_age: Duration,
    progress: bool,

    cancel: CancelToken,
}

impl Client {
    /// Creates a client using environment variables and/or `.stacdlrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `username`/`password` arguments
    /// - environment variables `STACDL_USERNAME` / `STACDL_PASSWORD`
    /// - config file from `STACDL_RC` or `.stacdlrc`
    pub fn new(
        username: Option<String>,
        password: Option<String>,
        verify: Option<bool>,
    ) -> anyhow::Result<Self> {
        let cfg = load_config(username, password, verify)?;
        Ok(Self::from_config(cfg))
    }

    pub fn from_config(cfg: ClientConfig) -> Self {
        Self {
            credentials: cfg.credentials,
            endpoints: ServiceEndpoints::default(),
            verify: cfg.verify,
            delay: cfg.delay.unwrap_or(DEFAULT_DELAY),
            max_area_km2: cfg.max_area_km2.unwrap_or(DEFAULT_MAX_AREA_KM2),
            collections: cfg.collections,
            search_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            retry_max: 3,
            retry_delay: Duration::from_secs(5),
            session_max_age: SESSION_MAX_AGE,
            progress: true,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: ServiceEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_area(mut self, max_area_km2: f64) -> Self {
        self.max_area_km2 = max_area_km2;
        self
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = collections;
        self
    }

    /// Timeout for login, probe and search requests.
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_retry_max(mut self, retry_max: usize) -> Self {
        self.retry_max = retry_max;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Uses `cancel` instead of the client's own token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token observed by [`Client::retrieve`]; cancel a clone to stop a run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Sub-areas `retrieve` would search for `area`.
    pub fn partition(&self, area: &Area) -> Result<Vec<Area>> {
        partition(area, self.max_area_km2)
    }

    fn authenticator(&self) -> SessionAuthenticator {
        SessionAuthenticator::new(self.endpoints.clone())
            .with_verify(self.verify)
            .with_timeout(self.search_timeout)
            .with_max_age(self.session_max_age)
    }

    fn searcher(&self) -> CatalogSearchClient {
        CatalogSearchClient::new(self.endpoints.search_url.clone())
            .with_collections(self.collections.clone())
            .with_delay(self.delay)
            .with_timeout(self.search_timeout)
    }

    fn executor(&self) -> DownloadExecutor {
        DownloadExecutor::new()
            .with_delay(self.delay)
            .with_retry_max(self.retry_max)
            .with_retry_delay(self.retry_delay)
            .with_timeout(self.download_timeout)
            .with_progress(self.progress)
    }

    /// Downloads every asset intersecting `area` into
    /// `<output_dir>/<collection>/<item_id><ext>`.
    ///
    /// Authentication failures abort the run. Failed searches and failed files
    /// are recorded in the report and the run carries on. A cancelled run
    /// returns what it did so far with [`RunReport::cancelled`] set.
    pub fn retrieve(&self, area: &Area, output_dir: &Path) -> Result<RunReport> {
        let sub_areas = self.partition(area)?;
        let total = sub_areas.len();
        info!(
            "Divided area into {} sub-area(s) of at most {} km²",
            total, self.max_area_km2
        );
        let mut report = RunReport::new(sub_areas.clone());

        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let mut session = Session::login(self.authenticator(), &self.credentials)?;
        let searcher = self.searcher();
        let mut catalog = AssetCatalog::new();

        for (i, sub_area) in sub_areas.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Cancelled after {}/{} sub-area(s)", i, total);
                report.cancelled = true;
                return Ok(report);
            }
            info!("Processing chunk {}/{}", i + 1, total);

            if i > 0 {
                session.ensure_fresh()?;
            }

            match searcher.try_search(session.context(), sub_area, &self.cancel) {
                Ok(raw) => {
                    let added = catalog.merge(resolve(&raw));
                    info!("{} new asset(s) from chunk {}", added, i + 1);
                }
                Err(Error::Cancelled) => {
                    report.cancelled = true;
                    return Ok(report);
                }
                Err(e) => {
                    warn!("Error processing chunk {}: {}", i + 1, e);
                    report.search_failures.push(SearchFailure {
                        index: i,
                        area: sub_area.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if catalog.is_empty() {
            warn!("No assets found for the requested area");
            return Ok(report);
        }
        info!(
            "Found {} unique asset(s) in {} collection(s)",
            catalog.len(),
            catalog.collections().count()
        );

        let mut executor = self.executor();
        for (collection, items) in catalog.into_groups() {
            let dir = output_dir.join(sanitize_file_stem(&collection));
            info!(
                "Downloading {} files from collection {}",
                items.len(),
                collection
            );
            let summary = report.collections.entry(collection).or_default();

            for item in &items {
                let task = DownloadTask::for_item(item, &dir);
                match executor.download(&task, &mut session, &self.cancel) {
                    Ok(outcome) => summary.record(outcome),
                    Err(Error::Cancelled) => {
                        warn!("Cancelled while downloading");
                        report.cancelled = true;
                        return Ok(report);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!("{}", report);
        Ok(report)
    }
}
