//! Land-surface temperature: Landsat 8 thermal band scaled to degrees
//! Celsius, optionally cloud masked, reduced to one image over the region.

use super::{resolve_region, PipelineReport, Product};
use crate::composite::build_composite;
use crate::config::{LstConfig, RegionConfig};
use crate::error::{Result, Stage, StageExt};
use crate::policy::{MaskMode, LST_BAND};
use crate::roi::{Geocoder, Roi};
use crate::service::{Collection, CollectionQuery, ProcessingService};
use crate::validate::validate_nonempty;
use tracing::{info, warn};

pub fn query(config: &LstConfig, roi: &Roi) -> Collection {
    let dataset = &config.dataset;
    Collection::new(CollectionQuery::new(
        &dataset.collection_id,
        dataset.start_date,
        dataset.end_date,
        roi.clone(),
    ))
}

pub fn mask_mode(config: &LstConfig) -> MaskMode {
    MaskMode::from(config.dataset.cloud_mask.enabled)
}

/// the query with Celsius scaling and, when enabled, the cloud mask
pub fn plan(config: &LstConfig, roi: &Roi) -> Result<Collection> {
    let source = &config.dataset.source;
    let scaled = query(config, roi).map(source.thermal_to_celsius()?);
    Ok(match mask_mode(config) {
        MaskMode::Enabled => scaled.map_all(&source.cloud_mask()),
        MaskMode::Disabled => scaled,
    })
}

pub fn run<S, G>(
    service: &S,
    geocoder: &G,
    region: &RegionConfig,
    config: &LstConfig,
) -> Result<PipelineReport>
where
    S: ProcessingService + ?Sized,
    G: Geocoder + ?Sized,
{
    info!(region = %region.region_slug, "starting LST export pipeline");
    let request = config.export.request(&region.region_slug).stage(Stage::Config)?;
    let resolved = resolve_region(geocoder, region)?;
    let dataset = &config.dataset;

    let context = format!(
        "Landsat 8 scenes over {} from {} to {}",
        region.region_slug, dataset.start_date, dataset.end_date
    );
    let scenes = validate_nonempty(service, &query(config, &resolved.roi), &context)
        .stage(Stage::Validate)?;

    let mode = mask_mode(config);
    match mode {
        MaskMode::Enabled => info!("applying cloud mask to Landsat 8 collection"),
        MaskMode::Disabled => warn!("cloud mask disabled, cloudy pixels stay in the composite"),
    }
    let processed = plan(config, &resolved.roi).stage(Stage::Config)?;
    validate_nonempty(service, &processed, &format!("{context} after cloud masking"))
        .stage(Stage::Validate)?;

    let band = dataset.source.thermal_band().unwrap_or(LST_BAND);
    let image = build_composite(service, &processed, &dataset.reducer, band, &resolved.roi)
        .stage(Stage::Composite)?;

    let task = service.export_image(&image, &request).stage(Stage::Export)?;
    info!(task = %task, reducer = %dataset.reducer, "LST export task submitted");

    Ok(PipelineReport {
        product: Product::Lst,
        roi_source: resolved.source,
        scenes,
        mask_mode: Some(mode),
        task,
    })
}
