use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One element of a collection: a dated raster with scalar properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub date: NaiveDate,
    pub properties: BTreeMap<String, f64>,
    pub raster: Raster,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    collections: BTreeMap<String, Vec<SceneEntry>>,
}

#[derive(Debug, Deserialize)]
struct SceneEntry {
    id: String,
    date: NaiveDate,
    #[serde(default)]
    properties: BTreeMap<String, f64>,
    transform: GeoTransform,
    width: usize,
    height: usize,
    #[serde(default)]
    nodata: Option<f64>,
    bands: Vec<BandEntry>,
}

/// band pixels inline (`values`, one list per row) or in a GeoTIFF (`path`)
#[derive(Debug, Deserialize)]
struct BandEntry {
    name: String,
    #[serde(default)]
    values: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    path: Option<PathBuf>,
}

/// Scenes grouped by collection id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    collections: BTreeMap<String, Vec<Scene>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// loads a YAML manifest; band paths are relative to the manifest
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "scene catalog not found: {}",
                path.display()
            )));
        }
        let manifest: Manifest = serde_yaml::from_str(&fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut catalog = Catalog::new();
        for (collection_id, entries) in manifest.collections {
            for entry in entries {
                let scene = entry.into_scene(base)?;
                catalog.insert(&collection_id, scene);
            }
        }
        debug!(path = %path.display(), scenes = catalog.len(), "loaded scene catalog");
        Ok(catalog)
    }

    pub fn insert(&mut self, collection_id: &str, scene: Scene) {
        self.collections
            .entry(collection_id.to_string())
            .or_default()
            .push(scene);
    }

    pub fn collection(&self, collection_id: &str) -> Option<&[Scene]> {
        self.collections.get(collection_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SceneEntry {
    fn into_scene(self, base: &Path) -> Result<Scene> {
        let mut raster = Raster::new(self.transform, self.width, self.height);
        let mut valid = Array2::from_elem((self.height, self.width), true);

        for band in self.bands {
            let data = match (band.values, band.path) {
                (Some(rows), None) => {
                    inline_band(&self.id, &band.name, rows, self.width, self.height)?
                }
                (None, Some(path)) => file_band(&self.id, &band.name, &base.join(path), &raster)?,
                _ => {
                    return Err(Error::Config(format!(
                        "scene {} band {}: give exactly one of values or path",
                        self.id, band.name
                    )))
                }
            };
            for (v, ok) in data.iter().zip(valid.iter_mut()) {
                if v.is_nan() || Some(*v) == self.nodata {
                    *ok = false;
                }
            }
            raster.put_band(band.name, data)?;
        }
        raster.update_mask(&valid)?;

        Ok(Scene {
            id: self.id,
            date: self.date,
            properties: self.properties,
            raster,
        })
    }
}

fn inline_band(
    scene: &str,
    band: &str,
    rows: Vec<Vec<f64>>,
    width: usize,
    height: usize,
) -> Result<Array2<f64>> {
    if rows.len() != height || rows.iter().any(|r| r.len() != width) {
        return Err(Error::Config(format!(
            "scene {scene} band {band}: expected {height} rows of {width} values"
        )));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((height, width), flat)
        .map_err(|e| Error::Config(format!("scene {scene} band {band}: {e}")))
}

#[cfg(feature = "gdal")]
fn file_band(scene: &str, band: &str, path: &Path, grid: &Raster) -> Result<Array2<f64>> {
    let (transform, data) = super::geotiff::read_band(path)?;
    if &transform != grid.transform() || data.dim() != grid.shape() {
        return Err(Error::Config(format!(
            "scene {scene} band {band}: {} does not match the scene grid",
            path.display()
        )));
    }
    Ok(data)
}

#[cfg(not(feature = "gdal"))]
fn file_band(scene: &str, band: &str, path: &Path, _grid: &Raster) -> Result<Array2<f64>> {
    Err(Error::Config(format!(
        "scene {scene} band {band}: reading {} needs the `gdal` feature",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
collections:
  LANDSAT/LC08/C02/T1_L2:
    - id: LC08_20240110
      date: 2024-01-10
      properties: { CLOUD_COVER: 12.5 }
      transform: [-58.6, 0.1, 0.0, -34.4, 0.0, -0.1]
      width: 2
      height: 2
      nodata: -9999
      bands:
        - name: ST_B10
          values: [[40000, 41000], [-9999, 42000]]
        - name: QA_PIXEL
          values: [[0, 0], [0, .nan]]
"#;

    #[test]
    fn manifest_scenes_carry_masks_from_nodata_and_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        fs::write(&path, MANIFEST).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        let scenes = catalog.collection("LANDSAT/LC08/C02/T1_L2").unwrap();
        assert_eq!(scenes.len(), 1);

        let scene = &scenes[0];
        assert_eq!(scene.properties["CLOUD_COVER"], 12.5);
        assert_eq!(scene.raster.band_names(), vec!["ST_B10", "QA_PIXEL"]);
        assert_eq!(scene.raster.valid_count(), 2);
        assert!(!scene.raster.is_valid(1, 0));
        assert!(!scene.raster.is_valid(1, 1));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        fs::write(&path, MANIFEST.replace("[[40000, 41000]", "[[40000]")).unwrap();
        assert!(matches!(Catalog::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn missing_manifest_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Catalog::load(&dir.path().join("absent.yaml")),
            Err(Error::Config(_))
        ));
    }
}
