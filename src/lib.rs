//! A bulk downloader for catalogs served behind a Keycloak browser login.
//!
//! This crate implements the full flow against a STAC-like search API:
//! split the area of interest into request-sized sub-areas, sign in through the
//! identity provider, search every sub-area, then download each unique asset.
//!
//! ## Quick start
//! - Configure credentials via environment variables (`STACDL_USERNAME`, `STACDL_PASSWORD`) or a
//!   `.stacdlrc` file (supported in the current directory and in your home directory).
//! - Call [`Client::retrieve`] with an [`Area`] and an output directory.
//!
//! ```no_run
//! use anyhow::Result;
//! use stacdl::{Area, Client};
//!
//! fn main() -> Result<()> {
//!     let client = Client::from_env()?.with_collections(vec!["MDT-2m".into()]);
//!     let area = Area::bbox(-9.2, 38.6, -9.0, 38.8)?;
//!     let report = client.retrieve(&area, std::path::Path::new("downloads"))?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! Files land in `<output>/<collection>/<item_id><ext>`; files already present
//! are skipped, so an interrupted run can simply be started again.

#![forbid(unsafe_code)]

mod area;
mod assets;
mod cancel;
mod client;
mod config;
mod download;
mod error;
mod report;
mod search;
mod session;
mod util;

pub use area::{Area, BBox, KM_PER_DEGREE, partition};
pub use assets::{AssetCatalog, CatalogItem, ResolvedAssets, UNKNOWN_COLLECTION, extension_for, resolve};
pub use cancel::CancelToken;
pub use client::{Client, ClientConfig, DEFAULT_DELAY, DEFAULT_MAX_AREA_KM2};
pub use config::{KNOWN_COLLECTIONS, ServiceEndpoints, is_raster_collection};
pub use download::{
    CHUNK_SIZE, DownloadExecutor, DownloadOutcome, DownloadTask, HEALTH_CHECK_INTERVAL,
    OutcomeStatus,
};
pub use error::{Error, Result};
pub use report::{CollectionSummary, RunReport, SearchFailure};
pub use search::{AssetRef, CatalogSearchClient, Feature, Link, RawSearchResult, SEARCH_LIMIT};
pub use session::{
    AuthState, Credentials, KeycloakFormParser, LoginForm, LoginFormParser, SESSION_MAX_AGE,
    Session, SessionAuthenticator, SessionContext, SessionHealth,
};
