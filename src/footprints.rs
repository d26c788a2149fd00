//! Building footprint sources.
//!
//! Footprints come either from the Overpass API (every `building` way inside
//! the ROI bounding box) or from a local GeoJSON file. Both only hand back
//! valid, non-empty polygons that touch the ROI.

use crate::config::FootprintConfig;
use crate::error::{Error, Result};
use crate::roi::Roi;
use crate::service::{Feature, FeatureSet};
use geo::{Area, Coord, Intersects, LineString, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
const USER_AGENT: &str = concat!("cool_routes/", env!("CARGO_PKG_VERSION"));

pub trait FootprintSource {
    /// footprints for `place_name`, restricted to `roi`.
    /// fails with `EmptyDataset` when nothing usable is found.
    fn footprints(&self, place_name: &str, roi: &Roi) -> Result<FeatureSet>;
}

/// builds the source a buildings config asks for
pub fn from_config(config: &FootprintConfig) -> Result<Box<dyn FootprintSource>> {
    match config {
        FootprintConfig::Overpass { endpoint, tag } => {
            let endpoint = endpoint.as_deref().unwrap_or(OVERPASS_URL);
            Ok(Box::new(OverpassFootprints::new(endpoint, tag)?))
        }
        FootprintConfig::Geojson { path } => Ok(Box::new(GeoJsonFootprints::new(path))),
    }
}

pub struct OverpassFootprints {
    http: reqwest::blocking::Client,
    endpoint: String,
    tag: String,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: u64,
    #[serde(default)]
    geometry: Vec<LatLon>,
    #[serde(default)]
    tags: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

impl OverpassFootprints {
    pub fn new(endpoint: impl Into<String>, tag: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            tag: tag.into(),
        })
    }

    /// `[out:json]` query for every way carrying the tag inside the ROI bounds
    pub fn query(&self, roi: &Roi) -> String {
        let b = roi.bounds();
        format!(
            "[out:json][timeout:180];way[\"{}\"]({},{},{},{});out geom;",
            self.tag,
            b.min().y,
            b.min().x,
            b.max().y,
            b.max().x
        )
    }
}

impl FootprintSource for OverpassFootprints {
    fn footprints(&self, place_name: &str, roi: &Roi) -> Result<FeatureSet> {
        let query = self.query(roi);
        debug!(endpoint = %self.endpoint, %query, "querying overpass");
        let response: OverpassResponse = self
            .http
            .post(&self.endpoint)
            .form(&[("data", query.as_str())])
            .send()?
            .error_for_status()?
            .json()?;

        let features = response
            .elements
            .into_iter()
            .filter(|e| e.kind == "way")
            .map(|e| {
                let ring: Vec<Coord<f64>> = e
                    .geometry
                    .iter()
                    .map(|p| Coord { x: p.lon, y: p.lat })
                    .collect();
                let polygon = Polygon::new(LineString::new(ring), vec![]);
                Feature {
                    id: format!("way/{}", e.id),
                    geometry: polygon,
                    properties: e.tags,
                }
            })
            .collect();
        keep_usable(features, roi, place_name)
    }
}

pub struct GeoJsonFootprints {
    path: PathBuf,
}

impl GeoJsonFootprints {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FootprintSource for GeoJsonFootprints {
    fn footprints(&self, place_name: &str, roi: &Roi) -> Result<FeatureSet> {
        if !self.path.exists() {
            return Err(Error::Config(format!(
                "footprint file not found: {}",
                self.path.display()
            )));
        }
        let document: Value = serde_json::from_str(&fs::read_to_string(&self.path)?)?;
        let features = document
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::MalformedGeometry(format!(
                    "{} is not a GeoJSON FeatureCollection",
                    self.path.display()
                ))
            })?;

        let mut out = Vec::new();
        for (index, feature) in features.iter().enumerate() {
            let id = feature_id(feature, index);
            let properties = feature
                .get("properties")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let Some(geometry) = feature.get("geometry") else {
                continue;
            };
            for (n, polygon) in polygons(geometry).into_iter().enumerate() {
                let id = if n == 0 { id.clone() } else { format!("{id}-{n}") };
                out.push(Feature {
                    id,
                    geometry: polygon,
                    properties: properties.clone(),
                });
            }
        }
        keep_usable(out, roi, place_name)
    }
}

fn feature_id(feature: &Value, index: usize) -> String {
    match feature.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => index.to_string(),
    }
}

/// polygons of a GeoJSON Polygon or MultiPolygon; anything else yields none
fn polygons(geometry: &Value) -> Vec<Polygon<f64>> {
    let kind = geometry.get("type").and_then(Value::as_str);
    let coordinates = geometry.get("coordinates");
    match (kind, coordinates) {
        (Some("Polygon"), Some(rings)) => polygon(rings).into_iter().collect(),
        (Some("MultiPolygon"), Some(Value::Array(members))) => {
            members.iter().filter_map(polygon).collect()
        }
        _ => Vec::new(),
    }
}

fn polygon(rings: &Value) -> Option<Polygon<f64>> {
    let mut rings = rings.as_array()?.iter().map(line_string);
    let exterior = rings.next()??;
    let interiors = rings.collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(exterior, interiors))
}

fn line_string(ring: &Value) -> Option<LineString<f64>> {
    ring.as_array()?
        .iter()
        .map(|p| {
            let p = p.as_array()?;
            Some(Coord {
                x: p.first()?.as_f64()?,
                y: p.get(1)?.as_f64()?,
            })
        })
        .collect::<Option<Vec<_>>>()
        .map(LineString::new)
}

fn usable(polygon: &Polygon<f64>) -> bool {
    let ring = &polygon.exterior().0;
    let finite = ring.iter().all(|c| c.x.is_finite() && c.y.is_finite());
    finite && ring.len() >= 4 && polygon.unsigned_area() > 0.0
}

fn keep_usable(features: FeatureSet, roi: &Roi, place_name: &str) -> Result<FeatureSet> {
    let found = features.len();
    let kept: FeatureSet = features
        .into_iter()
        .filter(|f| usable(&f.geometry))
        .filter(|f| f.geometry.intersects(roi.polygon()))
        .collect();

    info!(place = %place_name, found, kept = kept.len(), "loaded building footprints");
    if kept.is_empty() {
        return Err(Error::EmptyDataset {
            context: format!("building footprints for {place_name}"),
        });
    }
    Ok(kept)
}
