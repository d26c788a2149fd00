//! Masking and scaling policy.
//!
//! Per-image transforms are plain data: a [`TransformPipeline`] is recorded
//! on a collection handle and applied at the service boundary, so the policy
//! can be planned, serialized and tested without a live service. The
//! constants each source needs live in a [`SourceProfile`].

use crate::error::{Error, Result};
use crate::raster::Raster;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KELVIN_TO_CELSIUS: f64 = 273.15;

pub const SENTINEL2_SR_COLLECTION: &str = "COPERNICUS/S2_SR_HARMONIZED";
pub const LANDSAT8_L2_COLLECTION: &str = "LANDSAT/LC08/C02/T1_L2";

pub const LANDSAT8_LST_SCALE: f64 = 0.00341802;
pub const LANDSAT8_LST_OFFSET: f64 = 149.0;

pub const NDVI_BAND: &str = "NDVI";
pub const LST_BAND: &str = "LST";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    /// keep a pixel only when every listed bit of the packed `band` is 0
    BitMask { band: String, bits: Vec<u8> },
    /// divide every band
    Divide { divisor: f64 },
    /// `output = band * scale + offset`, added next to the existing bands
    Affine {
        band: String,
        output: String,
        scale: f64,
        offset: f64,
    },
    /// `output = (first - second) / (first + second)`
    NormalizedDifference {
        first: String,
        second: String,
        output: String,
    },
    Select { bands: Vec<String> },
    /// keep a pixel only when `band > above`
    ThresholdMask { band: String, above: f64 },
}

impl Transform {
    pub fn select<I, S>(bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Transform::Select {
            bands: bands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn apply(&self, raster: &mut Raster) -> Result<()> {
        match self {
            Transform::BitMask { band, bits } => {
                let mut flags = 0i64;
                for bit in bits {
                    if *bit > 62 {
                        return Err(Error::Config(format!("quality bit {bit} out of range")));
                    }
                    flags |= 1i64 << *bit;
                }
                let keep = raster
                    .require_band(band)?
                    .mapv(|qa| (qa as i64) & flags == 0);
                raster.update_mask(&keep)
            }
            Transform::Divide { divisor } => {
                if *divisor == 0.0 {
                    return Err(Error::Config("divisor must not be zero".into()));
                }
                raster.map_bands(|v| v / divisor);
                Ok(())
            }
            Transform::Affine {
                band,
                output,
                scale,
                offset,
            } => {
                let scaled = raster.require_band(band)?.mapv(|v| v * scale + offset);
                raster.put_band(output.clone(), scaled)
            }
            Transform::NormalizedDifference {
                first,
                second,
                output,
            } => {
                let nd = Zip::from(raster.require_band(first)?)
                    .and(raster.require_band(second)?)
                    .map_collect(|&a, &b| {
                        let sum = a + b;
                        if sum == 0.0 {
                            0.0
                        } else {
                            (a - b) / sum
                        }
                    });
                raster.put_band(output.clone(), nd)
            }
            Transform::Select { bands } => raster.retain_bands(bands),
            Transform::ThresholdMask { band, above } => {
                let keep = raster.require_band(band)?.mapv(|v| v > *above);
                raster.update_mask(&keep)
            }
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::BitMask { band, bits } => write!(f, "bit_mask({band} bits {bits:?})"),
            Transform::Divide { divisor } => write!(f, "divide({divisor})"),
            Transform::Affine { band, output, .. } => write!(f, "affine({band} -> {output})"),
            Transform::NormalizedDifference {
                first,
                second,
                output,
            } => write!(f, "normalized_difference({first}, {second} -> {output})"),
            Transform::Select { bands } => write!(f, "select({})", bands.join(", ")),
            Transform::ThresholdMask { band, above } => {
                write!(f, "threshold_mask({band} > {above})")
            }
        }
    }
}

/// Ordered per-image transforms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformPipeline(Vec<Transform>);

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, transform: Transform) -> Self {
        self.0.push(transform);
        self
    }

    pub fn extend(&mut self, other: &TransformPipeline) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn push(&mut self, transform: Transform) {
        self.0.push(transform);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transform> {
        self.0.iter()
    }

    pub fn apply(&self, raster: &mut Raster) -> Result<()> {
        for transform in &self.0 {
            transform.apply(raster)?;
        }
        Ok(())
    }
}

impl FromIterator<Transform> for TransformPipeline {
    fn from_iter<I: IntoIterator<Item = Transform>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalScale {
    pub band: String,
    pub scale: f64,
    pub offset: f64,
    #[serde(default = "default_lst_band")]
    pub output: String,
}

fn default_lst_band() -> String {
    LST_BAND.to_string()
}

/// Per-source constants: quality band layout, radiometric scaling and the
/// bands used by derived products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub qa_band: String,
    pub mask_bits: Vec<u8>,
    #[serde(default)]
    pub reflectance_divisor: Option<f64>,
    #[serde(default)]
    pub thermal: Option<ThermalScale>,
    #[serde(default)]
    pub nir_band: Option<String>,
    #[serde(default)]
    pub red_band: Option<String>,
}

impl SourceProfile {
    /// Sentinel-2 surface reflectance: QA60 cloud (10) and cirrus (11) bits
    pub fn sentinel2_sr() -> Self {
        Self {
            qa_band: "QA60".into(),
            mask_bits: vec![10, 11],
            reflectance_divisor: Some(10000.0),
            thermal: None,
            nir_band: Some("B8".into()),
            red_band: Some("B4".into()),
        }
    }

    /// Landsat 8 collection 2 level 2: QA_PIXEL cloud shadow (3), cloud (5)
    /// and cirrus (7) bits, ST_B10 surface temperature
    pub fn landsat8_l2() -> Self {
        Self {
            qa_band: "QA_PIXEL".into(),
            mask_bits: vec![3, 5, 7],
            reflectance_divisor: None,
            thermal: Some(ThermalScale {
                band: "ST_B10".into(),
                scale: LANDSAT8_LST_SCALE,
                offset: LANDSAT8_LST_OFFSET,
                output: LST_BAND.into(),
            }),
            nir_band: Some("SR_B5".into()),
            red_band: Some("SR_B4".into()),
        }
    }

    /// quality-bit mask, followed by reflectance normalisation when the
    /// source defines a divisor
    pub fn cloud_mask(&self) -> TransformPipeline {
        let mut pipeline = TransformPipeline::new().then(Transform::BitMask {
            band: self.qa_band.clone(),
            bits: self.mask_bits.clone(),
        });
        if let Some(divisor) = self.reflectance_divisor {
            pipeline.push(Transform::Divide { divisor });
        }
        pipeline
    }

    /// raw thermal counts to degrees Celsius in a new band
    pub fn thermal_to_celsius(&self) -> Result<Transform> {
        let thermal = self
            .thermal
            .as_ref()
            .ok_or_else(|| Error::Config("source profile has no thermal band".into()))?;
        Ok(Transform::Affine {
            band: thermal.band.clone(),
            output: thermal.output.clone(),
            scale: thermal.scale,
            offset: thermal.offset - KELVIN_TO_CELSIUS,
        })
    }

    pub fn thermal_band(&self) -> Option<&str> {
        self.thermal.as_ref().map(|t| t.output.as_str())
    }

    pub fn ndvi(&self) -> Result<Transform> {
        match (&self.nir_band, &self.red_band) {
            (Some(nir), Some(red)) => Ok(Transform::NormalizedDifference {
                first: nir.clone(),
                second: red.clone(),
                output: NDVI_BAND.into(),
            }),
            _ => Err(Error::Config(
                "source profile needs nir_band and red_band for NDVI".into(),
            )),
        }
    }
}

/// Whether the thermal cloud mask runs. Disabled is a configured mode, not
/// a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    Enabled,
    Disabled,
}

impl From<bool> for MaskMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            MaskMode::Enabled
        } else {
            MaskMode::Disabled
        }
    }
}

impl fmt::Display for MaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskMode::Enabled => write!(f, "enabled"),
            MaskMode::Disabled => write!(f, "disabled"),
        }
    }
}
