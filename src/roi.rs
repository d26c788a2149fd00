//! Region of interest and the resolver that produces it.
//!
//! Every pipeline run resolves exactly one [`Roi`]: the geocoded outline of
//! the configured place name when the lookup succeeds, the configured
//! fallback polygon otherwise.

use crate::error::{Error, Result};
use geo::{BoundingRect, Contains, Coord, Intersects, LineString, Polygon, Rect};
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{info, warn};

/// An immutable lon/lat polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    polygon: Polygon<f64>,
    bounds: Rect<f64>,
}

impl Roi {
    /// builds a polygon from a lon/lat ring, closing it when the last vertex
    /// differs from the first.
    /// fails when a coordinate is not finite or fewer than three distinct
    /// vertices remain. self-intersection is not checked.
    pub fn from_ring(coords: &[[f64; 2]]) -> Result<Self> {
        if let Some(bad) = coords
            .iter()
            .find(|c| !c[0].is_finite() || !c[1].is_finite())
        {
            return Err(Error::MalformedGeometry(format!(
                "non-finite coordinate [{}, {}]",
                bad[0], bad[1]
            )));
        }

        let mut open = coords.to_vec();
        if open.len() > 1 && open.first() == open.last() {
            open.pop();
        }
        let mut distinct: Vec<[f64; 2]> = Vec::with_capacity(open.len());
        for c in &open {
            if !distinct.contains(c) {
                distinct.push(*c);
            }
        }
        if distinct.len() < 3 {
            return Err(Error::MalformedGeometry(format!(
                "a polygon ring needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        let exterior: LineString<f64> = open.iter().map(|c| (c[0], c[1])).collect();
        let polygon = Polygon::new(exterior, vec![]);
        let bounds = polygon
            .bounding_rect()
            .ok_or_else(|| Error::MalformedGeometry("polygon has no extent".into()))?;

        Ok(Self { polygon, bounds })
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// the closed exterior ring as lon/lat pairs
    pub fn ring(&self) -> Vec<[f64; 2]> {
        self.polygon
            .exterior()
            .coords()
            .map(|c| [c.x, c.y])
            .collect()
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.bounds
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.polygon.contains(&Coord { x: lon, y: lat })
    }

    pub fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
        self.polygon.intersects(&rect.to_polygon())
    }
}

impl Serialize for Roi {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.ring())
    }
}

/// Why a geocoding attempt produced no usable polygon.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeFailure {
    Disabled,
    Network(String),
    NoResults,
    MalformedGeometry(String),
}

impl fmt::Display for GeocodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeocodeFailure::Disabled => write!(f, "geocoding disabled"),
            GeocodeFailure::Network(msg) => write!(f, "network failure: {msg}"),
            GeocodeFailure::NoResults => write!(f, "no results"),
            GeocodeFailure::MalformedGeometry(msg) => write!(f, "malformed geometry: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    /// exterior ring of the first matching geometry
    Found(Vec<[f64; 2]>),
    Failed(GeocodeFailure),
}

/// Place-name lookup collaborator.
pub trait Geocoder {
    fn geocode(&self, place_name: &str) -> GeocodeOutcome;
}

/// A geocoder that never answers, forcing the fallback polygon.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

impl Geocoder for Offline {
    fn geocode(&self, _place_name: &str) -> GeocodeOutcome {
        GeocodeOutcome::Failed(GeocodeFailure::Disabled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoiSource {
    Geocoded,
    Fallback(GeocodeFailure),
}

impl fmt::Display for RoiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoiSource::Geocoded => write!(f, "geocoded"),
            RoiSource::Fallback(reason) => write!(f, "fallback polygon ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoi {
    pub roi: Roi,
    pub source: RoiSource,
}

/// resolves the region of interest for a run.
/// geocoding failures of any kind are absorbed by the fallback polygon;
/// only a malformed fallback is reported.
pub fn resolve_roi<G: Geocoder + ?Sized>(
    geocoder: &G,
    place_name: &str,
    fallback_coords: &[[f64; 2]],
) -> Result<ResolvedRoi> {
    let failure = match geocoder.geocode(place_name) {
        GeocodeOutcome::Found(ring) => match Roi::from_ring(&ring) {
            Ok(roi) => {
                info!(place = %place_name, vertices = ring.len(), "ROI resolved from place name");
                return Ok(ResolvedRoi {
                    roi,
                    source: RoiSource::Geocoded,
                });
            }
            Err(e) => GeocodeFailure::MalformedGeometry(e.to_string()),
        },
        GeocodeOutcome::Failed(reason) => reason,
    };

    warn!(place = %place_name, reason = %failure, "geocoding failed, using fallback polygon");
    let roi = Roi::from_ring(fallback_coords)?;
    Ok(ResolvedRoi {
        roi,
        source: RoiSource::Fallback(failure),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: [[f64; 2]; 5] = [
        [-58.53, -34.71],
        [-58.33, -34.71],
        [-58.33, -34.53],
        [-58.53, -34.53],
        [-58.53, -34.71],
    ];

    struct Fixed(GeocodeOutcome);

    impl Geocoder for Fixed {
        fn geocode(&self, _place_name: &str) -> GeocodeOutcome {
            self.0.clone()
        }
    }

    #[test]
    fn geocoded_polygon_wins_over_fallback() {
        let ring = vec![[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0], [1.0, 1.0]];
        let geocoder = Fixed(GeocodeOutcome::Found(ring.clone()));

        let resolved = resolve_roi(&geocoder, "Buenos Aires", &FALLBACK).unwrap();

        assert_eq!(resolved.source, RoiSource::Geocoded);
        assert_eq!(resolved.roi.ring(), ring);
    }

    #[test]
    fn every_failure_kind_falls_back_to_configured_polygon() {
        let failures = [
            GeocodeFailure::Disabled,
            GeocodeFailure::Network("timeout".into()),
            GeocodeFailure::NoResults,
            GeocodeFailure::MalformedGeometry("point".into()),
        ];
        let expected = Roi::from_ring(&FALLBACK).unwrap();

        for failure in failures {
            let geocoder = Fixed(GeocodeOutcome::Failed(failure.clone()));
            let resolved = resolve_roi(&geocoder, "Nowhere", &FALLBACK).unwrap();
            assert_eq!(resolved.roi, expected);
            assert_eq!(resolved.roi.ring(), FALLBACK.to_vec());
            assert_eq!(resolved.source, RoiSource::Fallback(failure));
        }
    }

    #[test]
    fn degenerate_geocoded_ring_falls_back() {
        let geocoder = Fixed(GeocodeOutcome::Found(vec![[1.0, 1.0], [2.0, 2.0]]));
        let resolved = resolve_roi(&geocoder, "Line", &FALLBACK).unwrap();
        assert!(matches!(
            resolved.source,
            RoiSource::Fallback(GeocodeFailure::MalformedGeometry(_))
        ));
    }

    #[test]
    fn malformed_fallback_is_reported() {
        let err = resolve_roi(&Offline, "Nowhere", &[[0.0, 0.0], [1.0, 1.0]]).unwrap_err();
        assert!(matches!(err, Error::MalformedGeometry(_)));

        let err = resolve_roi(&Offline, "Nowhere", &[[0.0, 0.0], [f64::NAN, 1.0], [1.0, 0.0]])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedGeometry(_)));
    }

    #[test]
    fn repeated_vertices_are_kept_as_given() {
        let ring = [[0.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        let resolved = resolve_roi(&Offline, "Nowhere", &ring).unwrap();
        assert_eq!(resolved.roi.ring(), ring.to_vec());

        let err = Roi::from_ring(&[[0.0, 0.0], [1.0, 1.0], [1.0, 1.0], [0.0, 0.0]]).unwrap_err();
        assert!(matches!(err, Error::MalformedGeometry(msg) if msg.contains("got 2")));
    }

    #[test]
    fn open_ring_is_closed() {
        let roi = Roi::from_ring(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
        assert_eq!(roi.ring().len(), 4);
        assert_eq!(roi.ring().first(), roi.ring().last());
    }

    #[test]
    fn containment_and_bounds() {
        let roi = Roi::from_ring(&FALLBACK).unwrap();
        assert!(roi.contains(-58.4, -34.6));
        assert!(!roi.contains(-58.0, -34.6));
        assert_eq!(roi.bounds().min(), Coord { x: -58.53, y: -34.71 });

        let far = Rect::new(Coord { x: 10.0, y: 10.0 }, Coord { x: 11.0, y: 11.0 });
        let overlapping = Rect::new(Coord { x: -58.4, y: -34.6 }, Coord { x: -58.0, y: -34.0 });
        assert!(!roi.intersects_rect(&far));
        assert!(roi.intersects_rect(&overlapping));
    }

    #[test]
    fn serializes_as_ring() {
        let roi = Roi::from_ring(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]).unwrap();
        let json = serde_json::to_string(&roi).unwrap();
        assert_eq!(json, "[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,0.0]]");
    }
}
