//! Interface of the processing service the pipelines drive.
//!
//! Collections are lazy: a [`Collection`] is a query plus the transforms
//! mapped over it, and nothing is evaluated until the service is asked for
//! a size, a mosaic or a reduction.

use crate::composite::Reducer;
use crate::error::Result;
use crate::policy::{Transform, TransformPipeline};
use crate::roi::Roi;
use chrono::NaiveDate;
use geo::Polygon;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Gt,
    Eq,
}

/// Attribute filter on element metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub op: Comparison,
    pub value: f64,
}

impl PropertyFilter {
    pub fn lt(property: impl Into<String>, value: f64) -> Self {
        Self {
            property: property.into(),
            op: Comparison::Lt,
            value,
        }
    }

    pub fn matches(&self, actual: f64) -> bool {
        match self.op {
            Comparison::Lt => actual < self.value,
            Comparison::Gt => actual > self.value,
            Comparison::Eq => actual == self.value,
        }
    }
}

/// Date range is half-open: `start <= date < end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionQuery {
    pub collection_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub roi: Roi,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<PropertyFilter>,
}

impl CollectionQuery {
    pub fn new(
        collection_id: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        roi: Roi,
    ) -> Self {
        Self {
            collection_id: collection_id.into(),
            start,
            end,
            roi,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: PropertyFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

/// A lazy collection handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub query: CollectionQuery,
    pub transforms: TransformPipeline,
}

impl Collection {
    pub fn new(query: CollectionQuery) -> Self {
        Self {
            query,
            transforms: TransformPipeline::new(),
        }
    }

    pub fn map(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn map_all(mut self, pipeline: &TransformPipeline) -> Self {
        self.transforms.extend(pipeline);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub geometry: Polygon<f64>,
    pub properties: Map<String, Value>,
}

pub type FeatureSet = Vec<Feature>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    #[default]
    #[serde(rename = "GeoTIFF")]
    GeoTiff,
    #[serde(rename = "JSON")]
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TableFormat {
    #[default]
    GeoJSON,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageExport {
    pub description: String,
    pub folder: Option<String>,
    pub file_prefix: String,
    pub crs: String,
    pub scale: f64,
    pub format: ImageFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableExport {
    pub description: String,
    pub folder: Option<String>,
    pub file_prefix: String,
    pub format: TableFormat,
}

/// Handle for a submitted export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTask {
    pub id: String,
    pub description: String,
    pub destination: PathBuf,
}

impl fmt::Display for ExportTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) -> {}", self.id, self.description, self.destination.display())
    }
}

pub trait ProcessingService {
    type Image;

    /// number of elements the collection evaluates to
    fn size(&self, collection: &Collection) -> Result<usize>;

    /// merges the collection into one image, most recent element on top
    fn mosaic(&self, collection: &Collection) -> Result<Self::Image>;

    fn band_names(&self, image: &Self::Image) -> Result<Vec<String>>;

    fn transform(&self, image: Self::Image, transforms: &TransformPipeline) -> Result<Self::Image>;

    /// per-pixel reduction across the collection
    fn reduce(&self, collection: &Collection, reducer: Reducer) -> Result<Self::Image>;

    fn clip(&self, image: Self::Image, roi: &Roi) -> Result<Self::Image>;

    /// mean of the image's first band inside each feature, stored as `mean`.
    /// `scale` is the requested sampling resolution in metres; a service
    /// without resampling samples at the image's native resolution.
    fn zonal_mean(
        &self,
        image: &Self::Image,
        features: &[Feature],
        scale: f64,
    ) -> Result<FeatureSet>;

    fn export_image(&self, image: &Self::Image, request: &ImageExport) -> Result<ExportTask>;

    fn export_table(&self, features: &[Feature], request: &TableExport) -> Result<ExportTask>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SourceProfile;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn query() -> CollectionQuery {
        let roi = Roi::from_ring(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
        CollectionQuery::new("S2", date("2024-01-01"), date("2024-02-01"), roi)
    }

    #[test]
    fn date_range_is_half_open() {
        let q = query();
        assert!(q.contains_date(date("2024-01-01")));
        assert!(q.contains_date(date("2024-01-31")));
        assert!(!q.contains_date(date("2024-02-01")));
        assert!(!q.contains_date(date("2023-12-31")));
    }

    #[test]
    fn mapping_appends_without_touching_the_query() {
        let base = Collection::new(
            query().filter(PropertyFilter::lt("CLOUDY_PIXEL_PERCENTAGE", 20.0)),
        );
        let mapped = base
            .clone()
            .map_all(&SourceProfile::sentinel2_sr().cloud_mask())
            .map(Transform::select(["NDVI"]));

        assert_eq!(mapped.query, base.query);
        assert_eq!(mapped.transforms.len(), 3);
        assert!(base.transforms.is_empty());
    }

    #[test]
    fn collection_plan_serializes() {
        let plan = Collection::new(query()).map(Transform::select(["B8"]));
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["query"]["collection_id"], "S2");
        assert_eq!(json["query"]["start"], "2024-01-01");
        assert_eq!(json["transforms"][0]["op"], "select");
        assert!(json["query"].get("filters").is_none());
    }

    #[test]
    fn filters_compare_against_threshold() {
        let f = PropertyFilter::lt("CLOUDY_PIXEL_PERCENTAGE", 20.0);
        assert!(f.matches(19.9));
        assert!(!f.matches(20.0));
    }

    #[test]
    fn image_format_names() {
        let f: ImageFormat = serde_yaml::from_str("GeoTIFF").unwrap();
        assert_eq!(f, ImageFormat::GeoTiff);
        let f: ImageFormat = serde_yaml::from_str("JSON").unwrap();
        assert_eq!(f, ImageFormat::Json);
    }
}
