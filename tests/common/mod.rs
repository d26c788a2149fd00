#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 2 x 2 grid of one-degree pixels with its top-left corner at (0, 2).
/// the region's fallback polygon covers only the left column.
pub const CATALOG: &str = r#"
collections:
  COPERNICUS/S2_SR_HARMONIZED:
    - id: s2_a
      date: 2024-01-10
      properties: { CLOUDY_PIXEL_PERCENTAGE: 5 }
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: B8, values: [[6000, 6000], [6000, 6000]] }
        - { name: B4, values: [[2000, 2000], [2000, 2000]] }
        - { name: QA60, values: [[0, 1024], [0, 0]] }
    - id: s2_b
      date: 2024-01-20
      properties: { CLOUDY_PIXEL_PERCENTAGE: 50 }
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: B8, values: [[1, 1], [1, 1]] }
        - { name: B4, values: [[9, 9], [9, 9]] }
        - { name: QA60, values: [[0, 0], [0, 0]] }
    - id: s2_d
      date: 2024-01-25
      properties: { CLOUDY_PIXEL_PERCENTAGE: 10 }
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: B8, values: [[8000, 8000], [8000, 8000]] }
        - { name: B4, values: [[2000, 2000], [2000, 2000]] }
        - { name: QA60, values: [[1024, 0], [0, 0]] }
    - id: s2_c
      date: 2024-02-15
      properties: { CLOUDY_PIXEL_PERCENTAGE: 1 }
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: B8, values: [[1, 1], [1, 1]] }
        - { name: B4, values: [[9, 9], [9, 9]] }
        - { name: QA60, values: [[0, 0], [0, 0]] }
  LANDSAT/LC08/C02/T1_L2:
    - id: l8_a
      date: 2024-01-05
      properties: { CLOUD_COVER: 3 }
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: ST_B10, values: [[50000, 50000], [50000, 50000]] }
        - { name: QA_PIXEL, values: [[0, 0], [0, 0]] }
    - id: l8_b
      date: 2024-01-21
      properties: { CLOUD_COVER: 40 }
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: ST_B10, values: [[52000, 52000], [52000, 52000]] }
        - { name: QA_PIXEL, values: [[32, 0], [0, 0]] }
  LANDSAT/CLOUDY:
    - id: overcast
      date: 2024-01-05
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: ST_B10, values: [[50000, 50000], [50000, 50000]] }
        - { name: QA_PIXEL, values: [[40, 40], [136, 8]] }
  buildings/heights:
    - id: h_2020
      date: 2020-06-01
      transform: [0, 1, 0, 2, 0, -1]
      width: 2
      height: 2
      bands:
        - { name: building_height, values: [[10, 20], [30, 40]] }
        - { name: building_presence, values: [[0.9, 0.9], [0.2, 0.9]] }
"#;

pub const REGION: &str = r#"
region:
  place_name: Testville
  region_slug: testville
  fallback_polygon: [[0, 0], [1, 0], [1, 2], [0, 2]]
"#;

pub const NDVI: &str = r#"
log_level: INFO
service:
  catalog: catalog.yaml
  export_root: out
dataset:
  start_date: 2024-01-01
  end_date: 2024-02-01
  cloud_mask:
    threshold: 20
export:
  drive_folder: ndvi
  filename_pattern: "{product}_{region_slug}_{year}"
  metadata: { product: ndvi, year: 2024 }
  scale_meters: 10
  file_format: JSON
"#;

pub const LST: &str = r#"
log_level: INFO
service:
  catalog: catalog.yaml
  export_root: out
dataset:
  start_date: 2024-01-01
  end_date: 2024-02-01
  reducer: median
  cloud_mask:
    enabled: true
export:
  drive_folder: lst
  filename_pattern: "{product}_{region_slug}_{year}"
  metadata: { product: lst, year: 2024 }
  scale_meters: 30
  file_format: JSON
"#;

pub const BUILDINGS: &str = r#"
log_level: INFO
service:
  catalog: catalog.yaml
  export_root: out
dataset:
  collection_id: buildings/heights
  year: 2020
  height_band: building_height
  confidence_band: building_presence
  confidence_threshold: 0.5
  scale_meters: 4
footprints:
  source: geojson
  path: footprints.geojson
export:
  drive_folder: buildings
  filename_pattern: "buildings_{region_slug}"
  file_format: GeoJSON
"#;

pub const FOOTPRINTS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "id": "top", "properties": {"building": "yes"},
     "geometry": {"type": "Polygon", "coordinates": [[[0, 1], [1, 1], [1, 2], [0, 2], [0, 1]]]}},
    {"type": "Feature", "id": "low-confidence", "properties": {},
     "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}},
    {"type": "Feature", "id": "outside-clip", "properties": {},
     "geometry": {"type": "Polygon", "coordinates": [[[1, 1], [2, 1], [2, 2], [1, 2], [1, 1]]]}}
  ]
}"#;

/// a temporary project directory with the catalog and footprints written
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("catalog.yaml"), CATALOG).expect("catalog");
        fs::write(dir.path().join("footprints.geojson"), FOOTPRINTS).expect("footprints");
        fs::create_dir_all(dir.path().join("regions")).expect("regions dir");
        fs::write(dir.path().join("regions").join("testville.yaml"), REGION).expect("region");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// writes a pipeline config with the region inlined
    pub fn config(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, format!("{body}{REGION}")).expect("config");
        path
    }

    /// writes a pipeline config that relies on a region file
    pub fn config_without_region(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, body).expect("config");
        path
    }

    pub fn read_json(&self, relative: &str) -> Value {
        let text = fs::read_to_string(self.path().join(relative)).expect("export written");
        serde_json::from_str(&text).expect("export is json")
    }
}

pub fn close(value: &Value, expected: f64) -> bool {
    value.as_f64().is_some_and(|v| (v - expected).abs() < 1e-6)
}
