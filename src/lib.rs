//! # cool_routes
//!
//! `cool_routes` is a crate that builds the raster and vector layers for a region of interest:
//! a mean vegetation index (NDVI), a land surface temperature composite (LST) and mean building
//! heights per footprint. It also syncs the exported files from a Google Drive folder to disk.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use cool_routes::config::{load_pipeline_config, LstConfig, PipelineConfig};
//! use cool_routes::local::LocalService;
//! use cool_routes::pipelines::{lst, select_region};
//! use cool_routes::roi::Offline;
//!
//! let config: LstConfig = load_pipeline_config(Path::new("config/lst.yaml")).unwrap();
//! let region = select_region(config.region(), Some("caba"), Path::new("config/regions")).unwrap();
//! let service = LocalService::open(config.service()).unwrap();
//!
//! let report = lst::run(&service, &Offline, &region, &config).unwrap();
//! println!("{report}");
//! ```
//!
//! ## Usage
//! ### rust api
//! Every pipeline follows the same steps:
//!
//! - `roi::resolve_roi`: geocodes the place name, falling back to the configured polygon.
//! - `validate::validate_nonempty`: fails early when a query or a masked collection is empty.
//! - `policy`: quality-bit masks, reflectance and thermal scaling as serializable transforms.
//! - `composite::build_composite`: per-pixel mean or median, clipped to the region.
//!
//! The processing itself happens behind the `service::ProcessingService` trait.
//! `local::LocalService` implements it over a YAML scene catalog.
//!
//! ### Command line
//! the clap framework is also used to provide a command line interface for the crate.
//! the easiest way to use the CLI is to run
//!```zsh
//! cargo run --release -- -h
//!```
//! to get a list of the available commands.
//!
//! ## Installation
//! build using
//!```zsh
//! cargo build --release
//! cargo install --path .
//! ```
//! GeoTIFF scenes and GeoTIFF exports need gdal installed and the `gdal` feature:
//!```zsh
//! cargo build --release --features gdal
//! ```
//! uninstall with
//! ```zsh
//! cargo uninstall cool_routes
//! ```
//!
pub mod composite;
pub mod config;
pub mod drive;
pub mod error;
pub mod footprints;
pub mod geocode;
pub mod local;
pub mod pipelines;
pub mod policy;
pub mod raster;
pub mod roi;
pub mod service;
pub mod validate;

pub use error::{Error, Result, Stage};
pub use pipelines::{PipelineReport, Product};
