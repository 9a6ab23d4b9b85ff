use std::collections::{BTreeMap, HashSet};

use crate::search::RawSearchResult;
use crate::util::trailing_segment;

/// Collection name used for records that do not declare one.
pub const UNKNOWN_COLLECTION: &str = "unknown";

/// One downloadable asset discovered in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub collection: String,
    pub item_id: String,
    pub asset_url: String,
    pub mime_type: Option<String>,
}

impl CatalogItem {
    pub fn extension(&self) -> &'static str {
        extension_for(self.mime_type.as_deref())
    }
}

/// Assets grouped by collection name.
pub type ResolvedAssets = BTreeMap<String, Vec<CatalogItem>>;

/// Maps a declared media type to the file extension used on disk.
pub fn extension_for(mime_type: Option<&str>) -> &'static str {
    let Some(mime) = mime_type else {
        return ".bin";
    };
    let mime = mime.trim().to_ascii_lowercase();
    let essence = mime.split(';').next().unwrap_or("").trim();
    match essence {
        // GeoTIFF / COG variants all carry parameters after `image/tiff`
        "image/tiff" | "image/geotiff" => ".tif",
        "application/vnd.laszip" | "application/x-las" | "application/x-laz" => ".laz",
        "application/json" | "application/geo+json" => ".json",
        "text/xml" | "application/xml" => ".xml",
        _ => ".bin",
    }
}

/// Extracts unique assets from one search result.
///
/// A URL is kept once, under the collection of the first record that lists it.
pub fn resolve(raw: &RawSearchResult) -> ResolvedAssets {
    let mut out = ResolvedAssets::new();
    let mut seen = HashSet::new();

    for feature in &raw.features {
        let collection = feature
            .collection
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN_COLLECTION);

        let record_id = feature
            .self_href()
            .and_then(trailing_segment)
            .or_else(|| feature.id_string());

        for asset in feature.assets.values() {
            let Some(url) = asset.href.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
                continue;
            };
            if !seen.insert(url.to_string()) {
                continue;
            }
            let Some(item_id) = record_id.clone().or_else(|| trailing_segment(url)) else {
                continue;
            };

            out.entry(collection.to_string()).or_default().push(CatalogItem {
                collection: collection.to_string(),
                item_id,
                asset_url: url.to_string(),
                mime_type: asset.media_type.clone(),
            });
        }
    }

    out
}

/// Union of resolved assets across all searched sub-areas.
#[derive(Debug, Default, Clone)]
pub struct AssetCatalog {
    groups: ResolvedAssets,
    seen: HashSet<String>,
}

impl AssetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds assets not seen before; returns how many were new.
    pub fn merge(&mut self, resolved: ResolvedAssets) -> usize {
        let mut added = 0;
        for (collection, items) in resolved {
            for item in items {
                if self.seen.insert(item.asset_url.clone()) {
                    self.groups.entry(collection.clone()).or_default().push(item);
                    added += 1;
                }
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn items(&self, collection: &str) -> &[CatalogItem] {
        self.groups.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_groups(self) -> ResolvedAssets {
        self.groups
    }
}
