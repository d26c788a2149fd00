//! Vegetation index: cloud-masked Sentinel-2 reflectance reduced to a mean
//! NDVI image over the region.

use super::{resolve_region, PipelineReport, Product};
use crate::composite::build_composite;
use crate::config::{NdviConfig, RegionConfig};
use crate::error::{Result, Stage, StageExt};
use crate::policy::{MaskMode, NDVI_BAND};
use crate::roi::{Geocoder, Roi};
use crate::service::{Collection, CollectionQuery, ProcessingService, PropertyFilter};
use crate::validate::validate_nonempty;
use tracing::info;

/// scene-level cloud percentage the query filters on
pub const CLOUD_PROPERTY: &str = "CLOUDY_PIXEL_PERCENTAGE";

/// dated, bounded scenes under the cloud threshold
pub fn query(config: &NdviConfig, roi: &Roi) -> Collection {
    let dataset = &config.dataset;
    Collection::new(
        CollectionQuery::new(
            &dataset.collection_id,
            dataset.start_date,
            dataset.end_date,
            roi.clone(),
        )
        .filter(PropertyFilter::lt(CLOUD_PROPERTY, dataset.cloud_mask.threshold)),
    )
}

/// the query with cloud mask, reflectance scaling and NDVI mapped over it
pub fn plan(config: &NdviConfig, roi: &Roi) -> Result<Collection> {
    let source = &config.dataset.source;
    Ok(query(config, roi)
        .map_all(&source.cloud_mask())
        .map(source.ndvi()?))
}

pub fn run<S, G>(
    service: &S,
    geocoder: &G,
    region: &RegionConfig,
    config: &NdviConfig,
) -> Result<PipelineReport>
where
    S: ProcessingService + ?Sized,
    G: Geocoder + ?Sized,
{
    info!(region = %region.region_slug, "starting NDVI export pipeline");
    let request = config.export.request(&region.region_slug).stage(Stage::Config)?;
    let resolved = resolve_region(geocoder, region)?;
    let dataset = &config.dataset;

    let context = format!(
        "Sentinel-2 scenes over {} from {} to {}",
        region.region_slug, dataset.start_date, dataset.end_date
    );
    let collection = query(config, &resolved.roi);
    let scenes = validate_nonempty(service, &collection, &context).stage(Stage::Validate)?;

    let masked = collection.map_all(&dataset.source.cloud_mask());
    validate_nonempty(service, &masked, &format!("{context} after cloud masking"))
        .stage(Stage::Validate)?;

    let ndvi = masked.map(dataset.source.ndvi().stage(Stage::Config)?);
    let image = build_composite(service, &ndvi, "mean", NDVI_BAND, &resolved.roi)
        .stage(Stage::Composite)?;

    let task = service.export_image(&image, &request).stage(Stage::Export)?;
    info!(task = %task, "NDVI export task submitted");

    Ok(PipelineReport {
        product: Product::Ndvi,
        roi_source: resolved.source,
        scenes,
        mask_mode: Some(MaskMode::Enabled),
        task,
    })
}
