use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stacdl::{Area, Client, KNOWN_COLLECTIONS};

#[derive(Parser, Debug)]
#[command(version, about = "Bulk download of catalog assets for an area of interest")]
struct Args {
    /// Area of interest as MIN_LON,MIN_LAT,MAX_LON,MAX_LAT (WGS84 degrees)
    #[arg(
        long,
        value_delimiter = ',',
        num_args = 4,
        allow_negative_numbers = true,
        conflicts_with = "polygon",
        required_unless_present = "polygon"
    )]
    bbox: Option<Vec<f64>>,

    /// GeoJSON file holding a Polygon, MultiPolygon, Feature or FeatureCollection
    #[arg(long, value_name = "PATH")]
    polygon: Option<PathBuf>,

    /// Output root; files go to <output>/<collection>/
    #[arg(short, long, default_value = "downloads")]
    output: PathBuf,

    /// Collections to search, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    collections: Vec<String>,

    /// Seconds to wait before each request
    #[arg(long)]
    delay: Option<f64>,

    /// Largest sub-area searched in one request, in km²
    #[arg(long)]
    max_area: Option<f64>,

    /// Portal username (overrides STACDL_USERNAME and .stacdlrc)
    #[arg(long)]
    username: Option<String>,

    /// Portal password (overrides STACDL_PASSWORD and .stacdlrc)
    #[arg(long)]
    password: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,

    /// Write the sub-area boundaries as GeoJSON to this file
    #[arg(long, value_name = "PATH")]
    boundaries: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let area = read_area(&args)?;

    let mut client = Client::new(
        args.username.clone(),
        args.password.clone(),
        args.insecure.then_some(false),
    )?
    .with_progress(!args.no_progress);

    if !args.collections.is_empty() {
        for c in &args.collections {
            if !KNOWN_COLLECTIONS.contains(&c.as_str()) {
                warn!("Unknown collection {:?}; known: {}", c, KNOWN_COLLECTIONS.join(", "));
            }
        }
        client = client.with_collections(args.collections.clone());
    }
    if let Some(delay) = args.delay {
        if !delay.is_finite() || delay < 0.0 {
            bail!("--delay must be a non-negative number of seconds, got {}", delay);
        }
        client = client.with_delay(Duration::from_secs_f64(delay));
    }
    if let Some(max_area) = args.max_area {
        client = client.with_max_area(max_area);
    }

    let cancel = client.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("Interrupt received, stopping after the current step...");
        cancel.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let report = match client.retrieve(&area, &args.output) {
        Ok(report) => report,
        Err(e) if e.is_auth() => {
            return Err(anyhow::Error::new(e).context("Authentication failed, nothing was downloaded"));
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(path) = &args.boundaries {
        let text = serde_json::to_string_pretty(&report.boundaries_geojson())?;
        fs::write(path, text)
            .with_context(|| format!("failed to write boundaries to {}", path.display()))?;
        info!("Wrote {} sub-area boundaries to {}", report.sub_areas.len(), path.display());
    }

    println!("{}", report);
    for name in report.raster_collections() {
        println!("  {} raster tile(s) in {}", report.files(name).len(), name);
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_area(args: &Args) -> Result<Area> {
    if let Some(path) = &args.polygon {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        return Area::from_geojson(&value)
            .with_context(|| format!("no usable polygon in {}", path.display()));
    }
    match args.bbox.as_deref() {
        Some(&[min_lon, min_lat, max_lon, max_lat]) => {
            Ok(Area::bbox(min_lon, min_lat, max_lon, max_lat)?)
        }
        _ => bail!("expected --bbox MIN_LON,MIN_LAT,MAX_LON,MAX_LAT or --polygon PATH"),
    }
}
