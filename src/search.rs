use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::area::Area;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::session::SessionContext;

/// Maximum number of features requested per search.
pub const SEARCH_LIMIT: u32 = 1000;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Link {
    #[serde(default)]
    pub rel: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AssetRef {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default, rename = "type")]
    pub media_type: Option<String>,
}

/// One search hit. Every field is optional; records are resolved leniently.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub assets: BTreeMap<String, AssetRef>,
}

impl Feature {
    pub(crate) fn self_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.as_deref() == Some("self"))
            .and_then(|l| l.href.as_deref())
    }

    pub(crate) fn id_string(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Raw body of one catalog search.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RawSearchResult {
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// Paced catalog search over the authenticated session.
#[derive(Debug, Clone)]
pub struct CatalogSearchClient {
    search_url: String,
    collections: Vec<String>,
    delay: Duration,
    timeout: Duration,
}

impl CatalogSearchClient {
    pub fn new(search_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
            collections: Vec::new(),
            delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = collections;
        self
    }

    /// Pause applied before every search request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the JSON body for one sub-area.
    pub fn payload(&self, area: &Area) -> Value {
        let mut payload = match area {
            Area::Bbox(b) => json!({
                "bbox": b.as_array(),
                "limit": SEARCH_LIMIT,
            }),
            Area::Polygon(_) => json!({
                "filter": {
                    "op": "intersects",
                    "args": [{"property": "geometry"}, area.to_geojson()],
                },
                "limit": SEARCH_LIMIT,
            }),
        };
        if !self.collections.is_empty() {
            payload["collections"] = json!(self.collections);
        }
        payload
    }

    /// Searches one sub-area; failures are logged and yield an empty result so
    /// the remaining sub-areas still get searched.
    ///
    /// Cancellation during the pacing delay also yields an empty result; callers
    /// check the token themselves.
    pub fn search(&self, session: &SessionContext, area: &Area, cancel: &CancelToken) -> RawSearchResult {
        match self.try_search(session, area, cancel) {
            Ok(result) => result,
            Err(e) => {
                warn!("{}", e);
                RawSearchResult::default()
            }
        }
    }

    pub fn try_search(
        &self,
        session: &SessionContext,
        area: &Area,
        cancel: &CancelToken,
    ) -> Result<RawSearchResult> {
        if !self.delay.is_zero() {
            debug!("Waiting {:.1}s before searching...", self.delay.as_secs_f64());
        }
        cancel.sleep(self.delay)?;

        let payload = self.payload(area);
        let wrap = |source: reqwest::Error| Error::SearchTransport {
            area: area.to_string(),
            source,
        };

        let resp = session
            .http()
            .post(&self.search_url)
            .json(&payload)
            .timeout(self.timeout)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(wrap)?;

        let result: RawSearchResult = resp.json().map_err(wrap)?;
        info!("Found {} feature(s) in {}", result.features.len(), area);
        Ok(result)
    }
}
