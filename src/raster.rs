//! In-memory raster: named bands on a shared grid plus a validity mask.
//!
//! Masking never removes a raster, it only clears entries of `valid`.

use crate::error::{Error, Result};
use geo::{Coord, Rect};
use ndarray::{Array2, Zip};

/// GDAL ordering: `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`
pub type GeoTransform = [f64; 6];

#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub data: Array2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    transform: GeoTransform,
    bands: Vec<Band>,
    valid: Array2<bool>,
}

impl Raster {
    /// an empty raster of `height` rows by `width` columns, every pixel valid
    pub fn new(transform: GeoTransform, width: usize, height: usize) -> Self {
        Self {
            transform,
            bands: Vec::new(),
            valid: Array2::from_elem((height, width), true),
        }
    }

    pub fn with_band(mut self, name: impl Into<String>, data: Array2<f64>) -> Result<Self> {
        self.put_band(name, data)?;
        Ok(self)
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.valid.dim()
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band(&self, name: &str) -> Option<&Array2<f64>> {
        self.bands.iter().find(|b| b.name == name).map(|b| &b.data)
    }

    pub(crate) fn require_band(&self, name: &str) -> Result<&Array2<f64>> {
        self.band(name).ok_or_else(|| Error::MissingBands {
            missing: vec![name.to_string()],
        })
    }

    /// adds a band, replacing one with the same name
    pub fn put_band(&mut self, name: impl Into<String>, data: Array2<f64>) -> Result<()> {
        if data.dim() != self.shape() {
            return Err(Error::Service(format!(
                "band shape {:?} does not match raster shape {:?}",
                data.dim(),
                self.shape()
            )));
        }
        let name = name.into();
        match self.bands.iter_mut().find(|b| b.name == name) {
            Some(existing) => existing.data = data,
            None => self.bands.push(Band { name, data }),
        }
        Ok(())
    }

    /// keeps only `names`, in the order given
    pub fn retain_bands(&mut self, names: &[String]) -> Result<()> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| self.band(n).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingBands { missing });
        }
        let mut kept = Vec::with_capacity(names.len());
        for name in names {
            if let Some(pos) = self.bands.iter().position(|b| &b.name == name) {
                kept.push(self.bands.swap_remove(pos));
            }
        }
        self.bands = kept;
        Ok(())
    }

    pub fn map_bands(&mut self, f: impl Fn(f64) -> f64) {
        for band in &mut self.bands {
            band.data.mapv_inplace(&f);
        }
    }

    pub fn valid(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.valid[[row, col]]
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// clears every pixel where `keep` is false; never sets a pixel valid again
    pub fn update_mask(&mut self, keep: &Array2<bool>) -> Result<()> {
        if keep.dim() != self.shape() {
            return Err(Error::Service("mask shape does not match raster".into()));
        }
        Zip::from(&mut self.valid)
            .and(keep)
            .for_each(|valid, &keep| *valid &= keep);
        Ok(())
    }

    pub(crate) fn set_valid(&mut self, valid: Array2<bool>) {
        self.valid = valid;
    }

    /// lon/lat of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> Coord<f64> {
        let gt = &self.transform;
        let x = col as f64 + 0.5;
        let y = row as f64 + 0.5;
        Coord {
            x: gt[0] + x * gt[1] + y * gt[2],
            y: gt[3] + x * gt[4] + y * gt[5],
        }
    }

    pub fn extent(&self) -> Rect<f64> {
        let (rows, cols) = self.shape();
        let gt = &self.transform;
        Rect::new(
            Coord { x: gt[0], y: gt[3] },
            Coord {
                x: gt[0] + cols as f64 * gt[1] + rows as f64 * gt[2],
                y: gt[3] + cols as f64 * gt[4] + rows as f64 * gt[5],
            },
        )
    }

    pub fn same_grid(&self, other: &Raster) -> bool {
        self.transform == other.transform && self.shape() == other.shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const GT: GeoTransform = [10.0, 0.5, 0.0, 20.0, 0.0, -0.5];

    fn sample() -> Raster {
        Raster::new(GT, 2, 2)
            .with_band("A", array![[1.0, 2.0], [3.0, 4.0]])
            .unwrap()
            .with_band("B", array![[5.0, 6.0], [7.0, 8.0]])
            .unwrap()
    }

    #[test]
    fn pixel_centres_follow_geotransform() {
        let raster = sample();
        assert_eq!(raster.pixel_center(0, 0), Coord { x: 10.25, y: 19.75 });
        assert_eq!(raster.pixel_center(1, 1), Coord { x: 10.75, y: 19.25 });
        assert_eq!(raster.extent().min(), Coord { x: 10.0, y: 19.0 });
        assert_eq!(raster.extent().max(), Coord { x: 11.0, y: 20.0 });
    }

    #[test]
    fn mask_updates_only_clear_pixels() {
        let mut raster = sample();
        raster.update_mask(&array![[true, false], [true, true]]).unwrap();
        raster.update_mask(&array![[true, true], [false, true]]).unwrap();
        assert_eq!(raster.valid(), &array![[true, false], [false, true]]);
        assert_eq!(raster.valid_count(), 2);
    }

    #[test]
    fn retain_reports_missing_bands() {
        let mut raster = sample();
        let err = raster
            .retain_bands(&["B".to_string(), "C".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::MissingBands { missing } if missing == vec!["C".to_string()]));

        raster.retain_bands(&["B".to_string()]).unwrap();
        assert_eq!(raster.band_names(), vec!["B".to_string()]);
    }

    #[test]
    fn put_band_replaces_and_checks_shape() {
        let mut raster = sample();
        raster.put_band("A", array![[0.0, 0.0], [0.0, 0.0]]).unwrap();
        assert_eq!(raster.band_names(), vec!["A".to_string(), "B".to_string()]);
        assert!(raster.put_band("C", array![[1.0]]).is_err());
    }
}
