//! The three export pipelines and what they share.
//!
//! Each pipeline runs once, start to finish: resolve the region, query,
//! validate, mask, composite and export. A failure stops the run at the
//! stage it happened in, before any export is written.

pub mod buildings;
pub mod lst;
pub mod ndvi;

use crate::config::{
    load_pipeline_config, load_region, BuildingsConfig, LstConfig, NdviConfig, PipelineConfig,
    RegionConfig,
};
use crate::error::{Error, Result, Stage, StageExt};
use crate::footprints;
use crate::geocode::NominatimGeocoder;
use crate::local::LocalService;
use crate::policy::MaskMode;
use crate::roi::{resolve_roi, Geocoder, Offline, ResolvedRoi, Roi, RoiSource};
use crate::service::{Collection, ExportTask};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    Ndvi,
    Lst,
    Buildings,
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Product::Ndvi => write!(f, "ndvi"),
            Product::Lst => write!(f, "lst"),
            Product::Buildings => write!(f, "buildings"),
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub product: Product,
    pub roi_source: RoiSource,
    /// elements of the filtered query
    pub scenes: usize,
    /// `None` for products without a cloud mask
    pub mask_mode: Option<MaskMode>,
    pub task: ExportTask,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} scenes, ROI {}", self.product, self.scenes, self.roi_source)?;
        if let Some(mode) = self.mask_mode {
            write!(f, ", cloud mask {mode}")?;
        }
        write!(f, ", export {}", self.task)
    }
}

/// Where a run takes its configuration and region from.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub config: PathBuf,
    /// region file slug; overrides an inline `region` section
    pub region: Option<String>,
    pub regions_dir: PathBuf,
    /// skip geocoding and use the fallback polygon
    pub offline: bool,
}

/// the region file named by `slug`, else the config's inline region
pub fn select_region(
    inline: Option<&RegionConfig>,
    slug: Option<&str>,
    regions_dir: &Path,
) -> Result<RegionConfig> {
    match (slug, inline) {
        (Some(slug), _) => {
            let region = load_region(regions_dir, slug)?;
            region.validate()?;
            Ok(region)
        }
        (None, Some(region)) => Ok(region.clone()),
        (None, None) => Err(Error::Config(
            "no region configured: add a `region` section or pass --region <slug>".into(),
        )),
    }
}

pub(crate) fn resolve_region<G: Geocoder + ?Sized>(
    geocoder: &G,
    region: &RegionConfig,
) -> Result<ResolvedRoi> {
    info!(place = %region.place_name, slug = %region.region_slug, "resolving region of interest");
    resolve_roi(geocoder, &region.place_name, &region.fallback_polygon).stage(Stage::Region)
}

fn load<T: PipelineConfig>(options: &RunOptions) -> Result<(T, RegionConfig)> {
    let config: T = load_pipeline_config(&options.config)?;
    let region = select_region(config.region(), options.region.as_deref(), &options.regions_dir)?;
    Ok((config, region))
}

fn geocoder(offline: bool) -> Result<Box<dyn Geocoder>> {
    if offline {
        info!("geocoding disabled, the fallback polygon will be used");
        Ok(Box::new(Offline))
    } else {
        Ok(Box::new(NominatimGeocoder::new()?))
    }
}

/// loads the product's config, opens the local service and runs the pipeline
pub fn run(product: Product, options: &RunOptions) -> Result<PipelineReport> {
    match product {
        Product::Ndvi => {
            let (config, region) = load::<NdviConfig>(options).stage(Stage::Config)?;
            let service = LocalService::open(config.service()).stage(Stage::Config)?;
            let geocoder = geocoder(options.offline).stage(Stage::Config)?;
            ndvi::run(&service, geocoder.as_ref(), &region, &config)
        }
        Product::Lst => {
            let (config, region) = load::<LstConfig>(options).stage(Stage::Config)?;
            let service = LocalService::open(config.service()).stage(Stage::Config)?;
            let geocoder = geocoder(options.offline).stage(Stage::Config)?;
            lst::run(&service, geocoder.as_ref(), &region, &config)
        }
        Product::Buildings => {
            let (config, region) = load::<BuildingsConfig>(options).stage(Stage::Config)?;
            let service = LocalService::open(config.service()).stage(Stage::Config)?;
            let geocoder = geocoder(options.offline).stage(Stage::Config)?;
            let source = footprints::from_config(&config.footprints).stage(Stage::Config)?;
            buildings::run(&service, geocoder.as_ref(), source.as_ref(), &region, &config)
        }
    }
}

/// the collection a run would evaluate, built over the fallback polygon
/// without geocoding or touching the service
pub fn plan(product: Product, options: &RunOptions) -> Result<Collection> {
    let collection = match product {
        Product::Ndvi => {
            let (config, region) = load::<NdviConfig>(options)?;
            ndvi::plan(&config, &Roi::from_ring(&region.fallback_polygon)?)?
        }
        Product::Lst => {
            let (config, region) = load::<LstConfig>(options)?;
            lst::plan(&config, &Roi::from_ring(&region.fallback_polygon)?)?
        }
        Product::Buildings => {
            let (config, region) = load::<BuildingsConfig>(options)?;
            buildings::plan(&config, &Roi::from_ring(&region.fallback_polygon)?)?
        }
    };
    Ok(collection)
}
