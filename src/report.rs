use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde_json::{Value, json};

use crate::area::Area;
use crate::config::is_raster_collection;
use crate::download::{DownloadOutcome, OutcomeStatus};

/// Per-collection download tally.
#[derive(Debug, Clone, Default)]
pub struct CollectionSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
    /// Files present on disk after the pass, downloaded or skipped.
    pub files: Vec<PathBuf>,
    /// `(url, error)` for every failed task.
    pub failures: Vec<(String, String)>,
}

impl CollectionSummary {
    pub fn record(&mut self, outcome: DownloadOutcome) {
        match outcome.status {
            OutcomeStatus::Downloaded => {
                self.downloaded += 1;
                self.bytes += outcome.bytes_written;
                self.files.push(outcome.task.target_path());
            }
            OutcomeStatus::Skipped => {
                self.skipped += 1;
                self.files.push(outcome.task.target_path());
            }
            OutcomeStatus::Failed => {
                self.failed += 1;
                self.failures.push((
                    outcome.task.url,
                    outcome.error.unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
        }
    }

    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }
}

/// A sub-area whose search failed; its assets are missing from the run.
#[derive(Debug, Clone)]
pub struct SearchFailure {
    /// Zero-based position in the partition.
    pub index: usize,
    pub area: Area,
    pub error: String,
}

/// What a [`crate::Client::retrieve`] run did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sub_areas: Vec<Area>,
    pub collections: BTreeMap<String, CollectionSummary>,
    pub search_failures: Vec<SearchFailure>,
    /// Set when the run stopped early on a cancellation request.
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(sub_areas: Vec<Area>) -> Self {
        Self {
            sub_areas,
            ..Self::default()
        }
    }

    pub fn downloaded(&self) -> usize {
        self.collections.values().map(|c| c.downloaded).sum()
    }

    pub fn skipped(&self) -> usize {
        self.collections.values().map(|c| c.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.collections.values().map(|c| c.failed).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.collections.values().map(|c| c.bytes).sum()
    }

    /// Files on disk for one collection.
    pub fn files(&self, collection: &str) -> &[PathBuf] {
        self.collections
            .get(collection)
            .map(|c| c.files.as_slice())
            .unwrap_or(&[])
    }

    /// Collections with files on disk that hold raster tiles.
    pub fn raster_collections(&self) -> Vec<&str> {
        self.collections
            .iter()
            .filter(|(name, summary)| is_raster_collection(name) && !summary.files.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Whether every search and every download succeeded and the run was not cancelled.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.search_failures.is_empty() && self.failed() == 0
    }

    /// The sub-areas as a GeoJSON FeatureCollection.
    pub fn boundaries_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .sub_areas
            .iter()
            .enumerate()
            .map(|(i, area)| {
                let mut properties = json!({
                    "id": i + 1,
                    "area_km2": area.approx_area_km2(),
                });
                if let Ok(b) = area.bounds() {
                    properties["min_lon"] = json!(b.min_lon);
                    properties["min_lat"] = json!(b.min_lat);
                    properties["max_lon"] = json!(b.max_lon);
                    properties["max_lat"] = json!(b.max_lat);
                }
                json!({
                    "type": "Feature",
                    "properties": properties,
                    "geometry": area.to_geojson(),
                })
            })
            .collect();

        json!({
            "type": "FeatureCollection",
            "features": features,
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} sub-area(s) searched, {} search failure(s){}",
            self.sub_areas.len(),
            self.search_failures.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        for (name, c) in &self.collections {
            writeln!(
                f,
                "  {}: {} downloaded, {} skipped, {} failed ({} bytes)",
                name, c.downloaded, c.skipped, c.failed, c.bytes
            )?;
        }
        write!(
            f,
            "Total: {} downloaded, {} skipped, {} failed",
            self.downloaded(),
            self.skipped(),
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::DownloadTask;
    use std::path::Path;

    fn task(id: &str) -> DownloadTask {
        DownloadTask {
            url: format!("https://x/{}.tif", id),
            item_id: id.to_string(),
            extension: ".tif".to_string(),
            destination_dir: Path::new("out/MDT-2m").to_path_buf(),
        }
    }

    fn outcome(id: &str, status: OutcomeStatus, bytes: u64) -> DownloadOutcome {
        DownloadOutcome {
            task: task(id),
            status,
            bytes_written: bytes,
            error: (status == OutcomeStatus::Failed).then(|| "HTTP 404".to_string()),
        }
    }

    #[test]
    fn summary_records_outcomes() {
        let mut report = RunReport::default();
        let summary = report.collections.entry("MDT-2m".into()).or_default();
        summary.record(outcome("a", OutcomeStatus::Downloaded, 100));
        summary.record(outcome("b", OutcomeStatus::Skipped, 0));
        summary.record(outcome("c", OutcomeStatus::Failed, 0));

        assert_eq!(summary.total(), 3);
        assert_eq!(report.downloaded(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.bytes(), 100);
        assert_eq!(report.files("MDT-2m").len(), 2);
        assert!(report.files("LAZ").is_empty());
        assert_eq!(report.raster_collections(), vec!["MDT-2m"]);
        assert!(!report.is_complete());
        assert_eq!(
            report.collections["MDT-2m"].failures,
            vec![("https://x/c.tif".to_string(), "HTTP 404".to_string())]
        );
    }

    #[test]
    fn boundaries_are_numbered_from_one() {
        let report = RunReport::new(vec![
            Area::bbox(-9.0, 38.0, -8.5, 38.5).unwrap(),
            Area::bbox(-8.5, 38.0, -8.0, 38.5).unwrap(),
        ]);
        let fc = report.boundaries_geojson();
        assert_eq!(fc["type"], "FeatureCollection");
        let features = fc["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["id"], 1);
        assert_eq!(features[1]["properties"]["id"], 2);
        assert_eq!(features[1]["properties"]["min_lon"], -8.5);
        assert_eq!(features[1]["properties"]["max_lat"], 38.5);
        assert!(features[0]["properties"]["area_km2"].as_f64().unwrap() > 0.0);
        assert_eq!(features[0]["geometry"]["type"], "Polygon");
    }

    #[test]
    fn summary_text() {
        let mut report = RunReport::new(vec![Area::bbox(-9.0, 38.0, -8.9, 38.1).unwrap()]);
        report
            .collections
            .entry("LAZ".into())
            .or_default()
            .record(outcome("t", OutcomeStatus::Downloaded, 7));
        report.cancelled = true;
        let text = report.to_string();
        assert!(text.contains("1 sub-area(s) searched, 0 search failure(s) (cancelled)"));
        assert!(text.contains("LAZ: 1 downloaded, 0 skipped, 0 failed (7 bytes)"));
        assert!(text.ends_with("Total: 1 downloaded, 0 skipped, 0 failed"));
    }
}
