//! In-process processing service over a scene catalog.
//!
//! Stands in for the remote service: evaluates collection handles against
//! the scenes of a [`Catalog`], runs the recorded transforms per scene and
//! writes exports below an export root.

mod catalog;
#[cfg(feature = "gdal")]
pub mod geotiff;

pub use catalog::{Catalog, Scene};

use crate::composite::{reduce_values, Reducer};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::policy::TransformPipeline;
use crate::raster::Raster;
use crate::roi::Roi;
use crate::service::{
    Collection, CollectionQuery, ExportTask, Feature, FeatureSet, ImageExport, ImageFormat,
    ProcessingService, TableExport, TableFormat,
};
use geo::{BoundingRect, Contains, Intersects};
use ndarray::Array2;
use serde_json::{json, Value};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct LocalService {
    catalog: Catalog,
    export_root: PathBuf,
    exported: Cell<u32>,
}

impl LocalService {
    pub fn new(catalog: Catalog, export_root: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            export_root: export_root.into(),
            exported: Cell::new(0),
        }
    }

    pub fn open(config: &ServiceConfig) -> Result<Self> {
        let catalog = Catalog::load(&config.catalog)?;
        info!(
            catalog = %config.catalog.display(),
            scenes = catalog.len(),
            "opened local processing service"
        );
        Ok(Self::new(catalog, &config.export_root))
    }

    pub fn export_root(&self) -> &Path {
        &self.export_root
    }

    fn matching(&self, query: &CollectionQuery) -> Result<Vec<&Scene>> {
        let scenes = self
            .catalog
            .collection(&query.collection_id)
            .ok_or_else(|| {
                Error::Service(format!("collection not found: {}", query.collection_id))
            })?;

        let mut matched: Vec<&Scene> = scenes
            .iter()
            .filter(|s| query.contains_date(s.date))
            .filter(|s| query.roi.intersects_rect(&s.raster.extent()))
            .filter(|s| {
                query.filters.iter().all(|f| {
                    s.properties
                        .get(&f.property)
                        .is_some_and(|value| f.matches(*value))
                })
            })
            .collect();
        matched.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }

    /// scenes oldest first, each with the collection's transforms applied
    fn evaluate(&self, collection: &Collection) -> Result<Vec<Raster>> {
        let scenes = self.matching(&collection.query)?;
        debug!(
            collection = %collection.query.collection_id,
            scenes = scenes.len(),
            transforms = collection.transforms.len(),
            "evaluating collection"
        );
        scenes
            .into_iter()
            .map(|scene| {
                let mut raster = scene.raster.clone();
                collection.transforms.apply(&mut raster)?;
                Ok(raster)
            })
            .collect()
    }

    fn export_dir(&self, folder: Option<&str>) -> Result<PathBuf> {
        let dir = match folder {
            Some(folder) => self.export_root.join(folder),
            None => self.export_root.clone(),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn next_task(&self, kind: &str) -> String {
        let n = self.exported.get() + 1;
        self.exported.set(n);
        format!("local-{kind}-{n:04}")
    }
}

fn same_grid(images: &[Raster]) -> Result<()> {
    if let Some(first) = images.first() {
        if images.iter().any(|r| !r.same_grid(first)) {
            return Err(Error::Service(
                "collection elements do not share one grid".into(),
            ));
        }
    }
    Ok(())
}

impl ProcessingService for LocalService {
    type Image = Raster;

    fn size(&self, collection: &Collection) -> Result<usize> {
        Ok(self.matching(&collection.query)?.len())
    }

    fn mosaic(&self, collection: &Collection) -> Result<Raster> {
        let images = self.evaluate(collection)?;
        same_grid(&images)?;
        let top = images
            .last()
            .ok_or_else(|| Error::Service("cannot mosaic an empty collection".into()))?;

        let names = top.band_names();
        let (rows, cols) = top.shape();
        let mut out = Raster::new(*top.transform(), cols, rows);
        let mut valid = Array2::from_elem((rows, cols), false);
        let mut bands: Vec<Array2<f64>> =
            vec![Array2::from_elem((rows, cols), f64::NAN); names.len()];

        for image in images.iter().rev() {
            let sources = names
                .iter()
                .map(|n| image.require_band(n))
                .collect::<Result<Vec<_>>>()?;
            for ((row, col), done) in valid.indexed_iter_mut() {
                if *done || !image.is_valid(row, col) {
                    continue;
                }
                for (band, source) in bands.iter_mut().zip(&sources) {
                    band[[row, col]] = source[[row, col]];
                }
                *done = true;
            }
        }

        for (name, data) in names.into_iter().zip(bands) {
            out.put_band(name, data)?;
        }
        out.set_valid(valid);
        Ok(out)
    }

    fn band_names(&self, image: &Raster) -> Result<Vec<String>> {
        Ok(image.band_names())
    }

    fn transform(&self, mut image: Raster, transforms: &TransformPipeline) -> Result<Raster> {
        transforms.apply(&mut image)?;
        Ok(image)
    }

    fn reduce(&self, collection: &Collection, reducer: Reducer) -> Result<Raster> {
        let images = self.evaluate(collection)?;
        same_grid(&images)?;
        let first = images
            .first()
            .ok_or_else(|| Error::Service("cannot reduce an empty collection".into()))?;

        let names = first.band_names();
        let (rows, cols) = first.shape();
        let mut out = Raster::new(*first.transform(), cols, rows);
        let mut valid = Array2::from_elem((rows, cols), false);
        let mut values = Vec::with_capacity(images.len());

        for name in &names {
            let sources = images
                .iter()
                .map(|image| image.require_band(name))
                .collect::<Result<Vec<_>>>()?;
            let mut reduced = Array2::from_elem((rows, cols), f64::NAN);

            for ((row, col), cell) in reduced.indexed_iter_mut() {
                values.clear();
                for (image, source) in images.iter().zip(&sources) {
                    if image.is_valid(row, col) {
                        values.push(source[[row, col]]);
                    }
                }
                if let Some(v) = reduce_values(&mut values, reducer) {
                    *cell = v;
                    valid[[row, col]] = true;
                }
            }
            out.put_band(name.clone(), reduced)?;
        }
        out.set_valid(valid);
        Ok(out)
    }

    fn clip(&self, mut image: Raster, roi: &Roi) -> Result<Raster> {
        let (rows, cols) = image.shape();
        let inside = Array2::from_shape_fn((rows, cols), |(row, col)| {
            let c = image.pixel_center(row, col);
            roi.contains(c.x, c.y)
        });
        image.update_mask(&inside)?;
        Ok(image)
    }

    /// samples every pixel whose centre lies in a feature at the catalog's
    /// native resolution; `scale` is logged, never used for resampling
    fn zonal_mean(&self, image: &Raster, features: &[Feature], scale: f64) -> Result<FeatureSet> {
        let band = image
            .bands()
            .first()
            .ok_or_else(|| Error::Service("zonal statistics need at least one band".into()))?;
        debug!(band = %band.name, scale, features = features.len(), "computing zonal means");

        let extent = image.extent();
        let mut out = Vec::with_capacity(features.len());
        for feature in features {
            let mut values = Vec::new();
            let overlaps = feature
                .geometry
                .bounding_rect()
                .is_some_and(|b| b.intersects(&extent));
            if overlaps {
                for ((row, col), v) in band.data.indexed_iter() {
                    if image.is_valid(row, col)
                        && feature.geometry.contains(&image.pixel_center(row, col))
                    {
                        values.push(*v);
                    }
                }
            }

            let mut reduced = feature.clone();
            let mean = reduce_values(&mut values, Reducer::Mean).map_or(Value::Null, Value::from);
            reduced.properties.insert("mean".into(), mean);
            out.push(reduced);
        }
        Ok(out)
    }

    fn export_image(&self, image: &Raster, request: &ImageExport) -> Result<ExportTask> {
        let dir = self.export_dir(request.folder.as_deref())?;
        let destination = match request.format {
            ImageFormat::Json => {
                let path = dir.join(format!("{}.json", request.file_prefix));
                fs::write(&path, serde_json::to_vec_pretty(&image_json(image, request))?)?;
                path
            }
            #[cfg(feature = "gdal")]
            ImageFormat::GeoTiff => {
                let path = dir.join(format!("{}.tif", request.file_prefix));
                geotiff::write_raster(&path, image, &request.crs)?;
                path
            }
            #[cfg(not(feature = "gdal"))]
            ImageFormat::GeoTiff => {
                return Err(Error::Service(
                    "GeoTIFF export needs the `gdal` feature; use JSON".into(),
                ))
            }
        };

        let task = ExportTask {
            id: self.next_task("image"),
            description: request.description.clone(),
            destination,
        };
        info!(task = %task, "image export written");
        Ok(task)
    }

    fn export_table(&self, features: &[Feature], request: &TableExport) -> Result<ExportTask> {
        let dir = self.export_dir(request.folder.as_deref())?;
        let destination = match request.format {
            TableFormat::GeoJSON => {
                let path = dir.join(format!("{}.geojson", request.file_prefix));
                fs::write(&path, serde_json::to_vec_pretty(&feature_collection(features))?)?;
                path
            }
        };

        let task = ExportTask {
            id: self.next_task("table"),
            description: request.description.clone(),
            destination,
        };
        info!(task = %task, features = features.len(), "table export written");
        Ok(task)
    }
}

fn image_json(image: &Raster, request: &ImageExport) -> Value {
    let (rows, cols) = image.shape();
    let bands: Vec<Value> = image
        .bands()
        .iter()
        .map(|band| {
            let values: Vec<Vec<Value>> = band
                .data
                .outer_iter()
                .enumerate()
                .map(|(row, line)| {
                    line.iter()
                        .enumerate()
                        .map(|(col, v)| {
                            if image.is_valid(row, col) {
                                json!(v)
                            } else {
                                Value::Null
                            }
                        })
                        .collect()
                })
                .collect();
            json!({ "name": band.name, "values": values })
        })
        .collect();

    json!({
        "description": request.description,
        "crs": request.crs,
        "scale": request.scale,
        "transform": image.transform(),
        "width": cols,
        "height": rows,
        "bands": bands,
    })
}

fn feature_collection(features: &[Feature]) -> Value {
    let features: Vec<Value> = features
        .iter()
        .map(|f| {
            let exterior: Vec<[f64; 2]> =
                f.geometry.exterior().coords().map(|c| [c.x, c.y]).collect();
            let mut rings = vec![exterior];
            rings.extend(
                f.geometry
                    .interiors()
                    .iter()
                    .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect::<Vec<_>>()),
            );
            let mut properties = f.properties.clone();
            properties.insert("id".into(), Value::String(f.id.clone()));
            json!({
                "type": "Feature",
                "id": f.id,
                "geometry": { "type": "Polygon", "coordinates": rings },
                "properties": properties,
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::build_composite;
    use crate::policy::{SourceProfile, Transform, LST_BAND};
    use crate::service::PropertyFilter;
    use chrono::NaiveDate;
    use geo::{LineString, Polygon};
    use std::collections::BTreeMap;

    const GT: [f64; 6] = [0.0, 1.0, 0.0, 2.0, 0.0, -1.0];

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn scene(id: &str, day: &str, value: [[f64; 2]; 2], qa: [[f64; 2]; 2], cloud: f64) -> Scene {
        let raster = Raster::new(GT, 2, 2)
            .with_band("ST_B10", Array2::from(value.to_vec()))
            .unwrap()
            .with_band("QA_PIXEL", Array2::from(qa.to_vec()))
            .unwrap();
        Scene {
            id: id.into(),
            date: date(day),
            properties: BTreeMap::from([("CLOUD_COVER".to_string(), cloud)]),
            raster,
        }
    }

    fn service() -> LocalService {
        let mut catalog = Catalog::new();
        let cloudy_corner = [[32.0, 0.0], [0.0, 0.0]];
        catalog.insert(
            "L8",
            scene("a", "2024-01-05", [[10.0, 20.0], [30.0, 40.0]], [[0.0; 2]; 2], 5.0),
        );
        catalog.insert(
            "L8",
            scene("b", "2024-01-20", [[30.0, 40.0], [50.0, 60.0]], cloudy_corner, 50.0),
        );
        catalog.insert("L8", scene("c", "2024-03-01", [[99.0; 2]; 2], [[0.0; 2]; 2], 1.0));
        LocalService::new(catalog, std::env::temp_dir())
    }

    fn whole_grid() -> Roi {
        Roi::from_ring(&[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]]).unwrap()
    }

    fn january() -> Collection {
        Collection::new(CollectionQuery::new(
            "L8",
            date("2024-01-01"),
            date("2024-02-01"),
            whole_grid(),
        ))
    }

    #[test]
    fn size_applies_date_bounds_and_property_filters() {
        let service = service();
        assert_eq!(service.size(&january()).unwrap(), 2);

        let mut clear = january();
        clear.query = clear.query.filter(PropertyFilter::lt("CLOUD_COVER", 10.0));
        assert_eq!(service.size(&clear).unwrap(), 1);

        let mut elsewhere = january();
        elsewhere.query.roi = Roi::from_ring(&[[50.0, 50.0], [51.0, 50.0], [51.0, 51.0]]).unwrap();
        assert_eq!(service.size(&elsewhere).unwrap(), 0);

        let mut unknown = january();
        unknown.query.collection_id = "nope".into();
        assert!(matches!(service.size(&unknown), Err(Error::Service(_))));
    }

    #[test]
    fn masking_keeps_element_count() {
        let service = service();
        let masked = january().map_all(&SourceProfile::landsat8_l2().cloud_mask());
        assert_eq!(service.size(&masked).unwrap(), service.size(&january()).unwrap());
    }

    #[test]
    fn median_and_mean_skip_masked_pixels() {
        let service = service();
        let masked = january().map_all(&SourceProfile::landsat8_l2().cloud_mask());

        let mean = service.reduce(&masked, Reducer::Mean).unwrap();
        let st = mean.band("ST_B10").unwrap();
        // scene b is cloudy at (0, 0)
        assert_eq!(st[[0, 0]], 10.0);
        assert_eq!(st[[1, 1]], 50.0);

        let median = service.reduce(&january(), Reducer::Median).unwrap();
        assert_eq!(median.band("ST_B10").unwrap()[[0, 0]], 20.0);
    }

    #[test]
    fn mosaic_prefers_most_recent_valid_pixel() {
        let service = service();
        let masked = january().map_all(&SourceProfile::landsat8_l2().cloud_mask());
        let mosaic = service.mosaic(&masked).unwrap();
        let st = mosaic.band("ST_B10").unwrap();
        assert_eq!(st[[0, 0]], 10.0);
        assert_eq!(st[[0, 1]], 40.0);
        assert_eq!(mosaic.valid_count(), 4);
    }

    #[test]
    fn composite_is_clipped_to_roi() {
        let service = service();
        let left_column =
            Roi::from_ring(&[[0.0, 0.0], [1.0, 0.0], [1.0, 2.0], [0.0, 2.0]]).unwrap();
        let collection = january().map(SourceProfile::landsat8_l2().thermal_to_celsius().unwrap());

        for reducer in ["mean", "median"] {
            let composite =
                build_composite(&service, &collection, reducer, LST_BAND, &left_column).unwrap();
            assert_eq!(composite.band_names(), vec![LST_BAND]);
            assert!(composite.is_valid(0, 0));
            assert!(composite.is_valid(1, 0));
            assert!(!composite.is_valid(0, 1));
            assert!(!composite.is_valid(1, 1));
        }

        let err =
            build_composite(&service, &collection, "avg", LST_BAND, &left_column).unwrap_err();
        assert!(matches!(err, Error::UnsupportedReducer(name) if name == "avg"));
    }

    #[test]
    fn zonal_mean_averages_pixels_inside_each_feature() {
        let service = service();
        let image = service
            .transform(
                service.mosaic(&january()).unwrap(),
                &TransformPipeline::new().then(Transform::select(["ST_B10"])),
            )
            .unwrap();

        let square = |x0: f64, y0: f64, x1: f64, y1: f64| {
            Polygon::new(
                LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
                vec![],
            )
        };
        let features = vec![
            Feature {
                id: "top".into(),
                geometry: square(0.0, 1.0, 2.0, 2.0),
                properties: Default::default(),
            },
            Feature {
                id: "outside".into(),
                geometry: square(10.0, 10.0, 11.0, 11.0),
                properties: Default::default(),
            },
        ];

        let reduced = service.zonal_mean(&image, &features, 30.0).unwrap();
        assert_eq!(reduced[0].properties["mean"], json!(35.0));
        assert_eq!(reduced[1].properties["mean"], Value::Null);

        // native resolution regardless of the requested scale
        let coarse = service.zonal_mean(&image, &features, 5000.0).unwrap();
        assert_eq!(coarse, reduced);
    }

    #[test]
    fn exports_land_under_folder() {
        let root = tempfile::tempdir().unwrap();
        let service = LocalService::new(service().catalog, root.path());
        let image = service.mosaic(&january()).unwrap();

        let request = ImageExport {
            description: "lst_test".into(),
            folder: Some("lst".into()),
            file_prefix: "lst_test".into(),
            crs: "EPSG:4326".into(),
            scale: 30.0,
            format: ImageFormat::Json,
        };
        let task = service.export_image(&image, &request).unwrap();
        assert_eq!(task.destination, root.path().join("lst").join("lst_test.json"));
        assert_eq!(task.id, "local-image-0001");

        let written: Value = serde_json::from_slice(&fs::read(&task.destination).unwrap()).unwrap();
        assert_eq!(written["width"], 2);
        assert_eq!(written["bands"][0]["name"], "ST_B10");
    }
}
