//! Composite builder: collapses a validated, masked collection into one
//! image with a named per-pixel reducer.

use crate::error::{Error, Result};
use crate::policy::Transform;
use crate::roi::Roi;
use crate::service::{Collection, ProcessingService};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Mean,
    Median,
}

impl FromStr for Reducer {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "mean" => Ok(Reducer::Mean),
            "median" => Ok(Reducer::Median),
            other => Err(Error::UnsupportedReducer(other.to_string())),
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Mean => write!(f, "mean"),
            Reducer::Median => write!(f, "median"),
        }
    }
}

/// reduces one pixel's valid values; `None` when there are none.
/// reorders `values`.
pub fn reduce_values(values: &mut [f64], reducer: Reducer) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    match reducer {
        Reducer::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
        Reducer::Median => {
            values.sort_unstable_by(|a, b| a.total_cmp(b));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                Some((values[mid - 1] + values[mid]) / 2.0)
            } else {
                Some(values[mid])
            }
        }
    }
}

/// selects `band`, reduces the collection per pixel with `reducer_name` and
/// clips the result to the ROI. an unknown reducer fails before the service
/// is touched.
pub fn build_composite<S: ProcessingService + ?Sized>(
    service: &S,
    collection: &Collection,
    reducer_name: &str,
    band: &str,
    roi: &Roi,
) -> Result<S::Image> {
    let reducer: Reducer = reducer_name.parse()?;
    let selected = collection.clone().map(Transform::select([band]));

    info!(%reducer, %band, "building composite");
    let image = service.reduce(&selected, reducer)?;
    service.clip(image, roi)
}
