//! Place-name lookup against a Nominatim endpoint.

use crate::error::Result;
use crate::roi::{GeocodeFailure, GeocodeOutcome, Geocoder};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const USER_AGENT: &str = concat!("cool_routes/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Place {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    geojson: Option<Value>,
}

pub struct NominatimGeocoder {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl NominatimGeocoder {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(NOMINATIM_URL)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    fn lookup(&self, place_name: &str) -> std::result::Result<Vec<Place>, GeocodeFailure> {
        debug!(place = %place_name, endpoint = %self.endpoint, "querying geocoder");
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", place_name),
                ("format", "json"),
                ("polygon_geojson", "1"),
                ("limit", "1"),
            ])
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| GeocodeFailure::Network(e.to_string()))?;

        response
            .json::<Vec<Place>>()
            .map_err(|e| GeocodeFailure::Network(e.to_string()))
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, place_name: &str) -> GeocodeOutcome {
        match self.lookup(place_name) {
            Ok(places) => first_outline(places),
            Err(failure) => GeocodeOutcome::Failed(failure),
        }
    }
}

/// outline of the first place in a search response
fn first_outline(places: Vec<Place>) -> GeocodeOutcome {
    let Some(first) = places.into_iter().next() else {
        return GeocodeOutcome::Failed(GeocodeFailure::NoResults);
    };
    debug!(name = ?first.display_name, "geocoder match");

    let Some(geometry) = first.geojson else {
        return GeocodeOutcome::Failed(GeocodeFailure::MalformedGeometry(
            "result carries no geometry".into(),
        ));
    };
    match exterior_ring(&geometry) {
        Ok(ring) => GeocodeOutcome::Found(ring),
        Err(failure) => GeocodeOutcome::Failed(failure),
    }
}

/// exterior ring of a GeoJSON Polygon; anything else, a MultiPolygon
/// included, is malformed
pub fn exterior_ring(geometry: &Value) -> std::result::Result<Vec<[f64; 2]>, GeocodeFailure> {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| GeocodeFailure::MalformedGeometry("missing coordinates".into()))?;

    let ring = match kind {
        "Polygon" => coordinates.get(0),
        "MultiPolygon" => {
            return Err(GeocodeFailure::MalformedGeometry(
                "multipolygon has no single exterior ring".into(),
            ))
        }
        other => {
            return Err(GeocodeFailure::MalformedGeometry(format!(
                "expected a polygon, got {other:?}"
            )))
        }
    }
    .and_then(Value::as_array)
    .ok_or_else(|| GeocodeFailure::MalformedGeometry("polygon has no exterior ring".into()))?;

    ring.iter()
        .map(|pair| {
            let lon = pair.get(0).and_then(Value::as_f64);
            let lat = pair.get(1).and_then(Value::as_f64);
            match (lon, lat) {
                (Some(lon), Some(lat)) => Ok([lon, lat]),
                _ => Err(GeocodeFailure::MalformedGeometry(format!(
                    "bad coordinate pair {pair}"
                ))),
            }
        })
        .collect()
}
