//! Building heights: mean height-raster value per building footprint,
//! exported as a GeoJSON table.

use super::{resolve_region, PipelineReport, Product};
use crate::config::{BuildingDataset, BuildingsConfig, RegionConfig};
use crate::error::{Error, Result, Stage, StageExt};
use crate::footprints::FootprintSource;
use crate::policy::{Transform, TransformPipeline};
use crate::roi::{Geocoder, Roi};
use crate::service::{Collection, CollectionQuery, FeatureSet, ProcessingService};
use crate::validate::{validate_nonempty, validate_required_bands};
use serde_json::Value;
use tracing::info;

/// property the zonal mean lands in, and its exported name
const MEAN_PROPERTY: &str = "mean";
pub const HEIGHT_PROPERTY: &str = "height_m";

/// height images of the configured year over the ROI
pub fn query(config: &BuildingsConfig, roi: &Roi) -> Result<Collection> {
    let dataset = &config.dataset;
    let (start, end) = dataset.date_range()?;
    Ok(Collection::new(CollectionQuery::new(
        &dataset.collection_id,
        start,
        end,
        roi.clone(),
    )))
}

pub fn plan(config: &BuildingsConfig, roi: &Roi) -> Result<Collection> {
    query(config, roi)
}

/// keeps height pixels whose confidence exceeds the threshold, then drops
/// every other band
pub fn height_mask(dataset: &BuildingDataset) -> TransformPipeline {
    TransformPipeline::new()
        .then(Transform::ThresholdMask {
            band: dataset.confidence_band.clone(),
            above: dataset.confidence_threshold,
        })
        .then(Transform::select([dataset.height_band.clone()]))
}

/// drops footprints without a mean height and renames the property to
/// `height_m`
pub fn with_heights(features: FeatureSet) -> Result<FeatureSet> {
    let kept: FeatureSet = features
        .into_iter()
        .filter_map(|mut feature| match feature.properties.remove(MEAN_PROPERTY) {
            Some(Value::Null) | None => None,
            Some(height) => {
                feature.properties.insert(HEIGHT_PROPERTY.into(), height);
                Some(feature)
            }
        })
        .collect();

    if kept.is_empty() {
        return Err(Error::EmptyDataset {
            context: "no footprint has a height value".into(),
        });
    }
    Ok(kept)
}

pub fn run<S, G, F>(
    service: &S,
    geocoder: &G,
    footprints: &F,
    region: &RegionConfig,
    config: &BuildingsConfig,
) -> Result<PipelineReport>
where
    S: ProcessingService + ?Sized,
    G: Geocoder + ?Sized,
    F: FootprintSource + ?Sized,
{
    info!(region = %region.region_slug, "starting building height export pipeline");
    let request = config.export.request(&region.region_slug).stage(Stage::Config)?;
    let resolved = resolve_region(geocoder, region)?;
    let dataset = &config.dataset;

    let collection = query(config, &resolved.roi).stage(Stage::Query)?;
    let context = format!(
        "building height images over {} for {}",
        region.region_slug, dataset.year
    );
    let scenes = validate_nonempty(service, &collection, &context).stage(Stage::Validate)?;

    let mosaic = service
        .mosaic(&collection)
        .and_then(|image| service.clip(image, &resolved.roi))
        .stage(Stage::Composite)?;
    let bands = service.band_names(&mosaic).stage(Stage::Validate)?;
    validate_required_bands(&bands, &[&dataset.height_band, &dataset.confidence_band])
        .stage(Stage::Validate)?;
    let heights = service
        .transform(mosaic, &height_mask(dataset))
        .stage(Stage::Composite)?;

    info!("loading building footprints");
    let features = footprints
        .footprints(&region.place_name, &resolved.roi)
        .stage(Stage::Footprints)?;

    info!(footprints = features.len(), "computing mean building height per footprint");
    let reduced = service
        .zonal_mean(&heights, &features, dataset.scale_meters)
        .and_then(with_heights)
        .stage(Stage::Footprints)?;

    let task = service.export_table(&reduced, &request).stage(Stage::Export)?;
    info!(task = %task, buildings = reduced.len(), "building height export task submitted");

    Ok(PipelineReport {
        product: Product::Buildings,
        roi_source: resolved.source,
        scenes,
        mask_mode: None,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Feature;
    use geo::{LineString, Polygon};
    use serde_json::{json, Map};

    fn feature(id: &str, mean: Value) -> Feature {
        let mut properties = Map::new();
        properties.insert("mean".into(), mean);
        Feature {
            id: id.into(),
            geometry: Polygon::new(
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]),
                vec![],
            ),
            properties,
        }
    }

    #[test]
    fn null_means_are_dropped_and_renamed() {
        let kept =
            with_heights(vec![feature("a", json!(12.5)), feature("b", Value::Null)]).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
        assert_eq!(kept[0].properties["height_m"], json!(12.5));
        assert!(!kept[0].properties.contains_key("mean"));
    }

    #[test]
    fn all_null_means_are_an_empty_dataset() {
        let err = with_heights(vec![feature("b", Value::Null)]).unwrap_err();
        assert!(matches!(err, Error::EmptyDataset { .. }));
    }

    #[test]
    fn height_mask_thresholds_then_selects() {
        let dataset = BuildingDataset {
            collection_id: "heights".into(),
            year: 2020,
            height_band: "building_height".into(),
            confidence_band: "building_presence".into(),
            confidence_threshold: 0.5,
            scale_meters: 4.0,
        };
        let steps: Vec<String> = height_mask(&dataset).iter().map(ToString::to_string).collect();
        assert_eq!(
            steps,
            vec![
                "threshold_mask(building_presence > 0.5)",
                "select(building_height)"
            ]
        );
    }
}
