//! YAML configuration for the pipelines and the Drive sync.
//!
//! Every pipeline file carries `log_level`, a `service` section, an optional
//! inline `region`, a `dataset` section and an `export` section. Regions can
//! also live in their own files (`<regions_dir>/<slug>.yaml`).

use crate::composite::Reducer;
use crate::error::{Error, Result};
use crate::policy::{SourceProfile, LANDSAT8_L2_COLLECTION, SENTINEL2_SR_COLLECTION};
use crate::roi::Roi;
use crate::service::{ImageExport, ImageFormat, TableExport, TableFormat};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CRS: &str = "EPSG:4326";

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_crs() -> String {
    DEFAULT_CRS.to_string()
}

fn default_export_root() -> PathBuf {
    PathBuf::from("exports")
}

fn default_reducer() -> String {
    "median".to_string()
}

fn default_s2_collection() -> String {
    SENTINEL2_SR_COLLECTION.to_string()
}

fn default_landsat_collection() -> String {
    LANDSAT8_L2_COLLECTION.to_string()
}

fn default_building_tag() -> String {
    "building".to_string()
}

/// reads and deserializes a YAML file
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&text)?)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegionConfig {
    pub place_name: String,
    pub region_slug: String,
    pub fallback_polygon: Vec<[f64; 2]>,
}

impl RegionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.region_slug.trim().is_empty() {
            return Err(Error::Config("region_slug must not be empty".into()));
        }
        Roi::from_ring(&self.fallback_polygon).map(|_| ())
    }
}

#[derive(Deserialize)]
struct RegionFile {
    region: RegionConfig,
}

/// loads `<regions_dir>/<slug>.yaml`
pub fn load_region(regions_dir: &Path, slug: &str) -> Result<RegionConfig> {
    let file_name = format!("{slug}.yaml");
    let path = regions_dir.join(&file_name);
    if !path.exists() {
        return Err(Error::Config(format!(
            "Region '{slug}' not found. Expected file: {file_name}"
        )));
    }
    let file: RegionFile = load_yaml(&path)?;
    Ok(file.region)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceConfig {
    /// scene catalog manifest for the local processing service
    pub catalog: PathBuf,
    #[serde(default = "default_export_root")]
    pub export_root: PathBuf,
}

impl ServiceConfig {
    fn rebase(&mut self, base: &Path) {
        self.catalog = rebase_path(base, &self.catalog);
        self.export_root = rebase_path(base, &self.export_root);
    }
}

fn rebase_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// fills `{key}` placeholders from `metadata` plus `region_slug`.
/// `{{` and `}}` produce literal braces.
pub fn export_name(
    pattern: &str,
    metadata: &BTreeMap<String, Value>,
    region_slug: &str,
) -> Result<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) => key.push(k),
                        None => {
                            return Err(Error::Config(format!(
                                "unterminated placeholder in filename pattern '{pattern}'"
                            )))
                        }
                    }
                }
                if key == "region_slug" {
                    out.push_str(region_slug);
                    continue;
                }
                let value = metadata.get(&key).ok_or_else(|| {
                    Error::Config(format!(
                        "unknown placeholder {{{key}}} in filename pattern '{pattern}'"
                    ))
                })?;
                out.push_str(&scalar_to_string(&key, value)?);
            }
            '}' => {
                return Err(Error::Config(format!(
                    "single '}}' in filename pattern '{pattern}'"
                )))
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// placeholder check for a pattern whose region is not known yet
fn check_pattern(pattern: &str, metadata: &BTreeMap<String, Value>) -> Result<()> {
    export_name(pattern, metadata, "region").map(|_| ())
}

fn scalar_to_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::Config(format!(
            "metadata '{key}' must be a string, number or boolean"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageExportConfig {
    #[serde(default)]
    pub drive_folder: Option<String>,
    pub filename_pattern: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub scale_meters: f64,
    #[serde(default = "default_crs")]
    pub crs: String,
    #[serde(default)]
    pub file_format: ImageFormat,
}

impl ImageExportConfig {
    pub fn request(&self, region_slug: &str) -> Result<ImageExport> {
        let name = export_name(&self.filename_pattern, &self.metadata, region_slug)?;
        Ok(ImageExport {
            description: name.clone(),
            folder: self.drive_folder.clone(),
            file_prefix: name,
            crs: self.crs.clone(),
            scale: self.scale_meters,
            format: self.file_format,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.scale_meters <= 0.0 {
            return Err(Error::Config("export.scale_meters must be positive".into()));
        }
        #[cfg(not(feature = "gdal"))]
        if self.file_format == ImageFormat::GeoTiff {
            return Err(Error::Config(
                "export.file_format GeoTIFF needs the `gdal` feature; set it to JSON".into(),
            ));
        }
        check_pattern(&self.filename_pattern, &self.metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableExportConfig {
    #[serde(default)]
    pub drive_folder: Option<String>,
    pub filename_pattern: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub file_format: TableFormat,
}

impl TableExportConfig {
    pub fn request(&self, region_slug: &str) -> Result<TableExport> {
        let name = export_name(&self.filename_pattern, &self.metadata, region_slug)?;
        Ok(TableExport {
            description: name.clone(),
            folder: self.drive_folder.clone(),
            file_prefix: name,
            format: self.file_format,
        })
    }

    fn validate(&self) -> Result<()> {
        check_pattern(&self.filename_pattern, &self.metadata)
    }
}

fn validate_dates(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start >= end {
        return Err(Error::Config(format!(
            "dataset.start_date ({start}) must be before dataset.end_date ({end})"
        )));
    }
    Ok(())
}

/// What `main` needs from any pipeline file.
pub trait PipelineConfig: DeserializeOwned {
    fn log_level(&self) -> &str;
    fn service(&self) -> &ServiceConfig;
    fn region(&self) -> Option<&RegionConfig>;
    /// checks that need no network: dates, reducer names, scales, polygons
    fn validate(&self) -> Result<()>;
    /// makes relative paths relative to the config file's directory
    fn rebase(&mut self, base: &Path);
}

/// loads, rebases and validates a pipeline file
pub fn load_pipeline_config<T: PipelineConfig>(path: &Path) -> Result<T> {
    let mut config: T = load_yaml(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.rebase(base);
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudThreshold {
    /// maximum scene cloud percentage
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NdviDataset {
    #[serde(default = "default_s2_collection")]
    pub collection_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cloud_mask: CloudThreshold,
    #[serde(default = "SourceProfile::sentinel2_sr")]
    pub source: SourceProfile,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NdviConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub service: ServiceConfig,
    #[serde(default)]
    pub region: Option<RegionConfig>,
    pub dataset: NdviDataset,
    pub export: ImageExportConfig,
}

impl PipelineConfig for NdviConfig {
    fn log_level(&self) -> &str {
        &self.log_level
    }

    fn service(&self) -> &ServiceConfig {
        &self.service
    }

    fn region(&self) -> Option<&RegionConfig> {
        self.region.as_ref()
    }

    fn validate(&self) -> Result<()> {
        validate_dates(self.dataset.start_date, self.dataset.end_date)?;
        self.dataset.source.ndvi()?;
        if let Some(region) = &self.region {
            region.validate()?;
        }
        self.export.validate()
    }

    fn rebase(&mut self, base: &Path) {
        self.service.rebase(base);
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CloudMaskToggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LstDataset {
    #[serde(default = "default_landsat_collection")]
    pub collection_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_reducer")]
    pub reducer: String,
    pub cloud_mask: CloudMaskToggle,
    #[serde(default = "SourceProfile::landsat8_l2")]
    pub source: SourceProfile,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LstConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub service: ServiceConfig,
    #[serde(default)]
    pub region: Option<RegionConfig>,
    pub dataset: LstDataset,
    pub export: ImageExportConfig,
}

impl PipelineConfig for LstConfig {
    fn log_level(&self) -> &str {
        &self.log_level
    }

    fn service(&self) -> &ServiceConfig {
        &self.service
    }

    fn region(&self) -> Option<&RegionConfig> {
        self.region.as_ref()
    }

    fn validate(&self) -> Result<()> {
        validate_dates(self.dataset.start_date, self.dataset.end_date)?;
        self.dataset.reducer.parse::<Reducer>()?;
        self.dataset.source.thermal_to_celsius()?;
        if let Some(region) = &self.region {
            region.validate()?;
        }
        self.export.validate()
    }

    fn rebase(&mut self, base: &Path) {
        self.service.rebase(base);
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuildingDataset {
    pub collection_id: String,
    pub year: i32,
    pub height_band: String,
    pub confidence_band: String,
    pub confidence_threshold: f64,
    pub scale_meters: f64,
}

impl BuildingDataset {
    /// the whole calendar year as a half-open range
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = NaiveDate::from_ymd_opt(self.year, 1, 1);
        let end = NaiveDate::from_ymd_opt(self.year + 1, 1, 1);
        match (start, end) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(Error::Config(format!("dataset.year {} is out of range", self.year))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FootprintConfig {
    Overpass {
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_building_tag")]
        tag: String,
    },
    Geojson {
        path: PathBuf,
    },
}

impl Default for FootprintConfig {
    fn default() -> Self {
        FootprintConfig::Overpass {
            endpoint: None,
            tag: default_building_tag(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuildingsConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub service: ServiceConfig,
    #[serde(default)]
    pub region: Option<RegionConfig>,
    pub dataset: BuildingDataset,
    #[serde(default)]
    pub footprints: FootprintConfig,
    pub export: TableExportConfig,
}

impl PipelineConfig for BuildingsConfig {
    fn log_level(&self) -> &str {
        &self.log_level
    }

    fn service(&self) -> &ServiceConfig {
        &self.service
    }

    fn region(&self) -> Option<&RegionConfig> {
        self.region.as_ref()
    }

    fn validate(&self) -> Result<()> {
        self.dataset.date_range()?;
        if self.dataset.scale_meters <= 0.0 {
            return Err(Error::Config("dataset.scale_meters must be positive".into()));
        }
        if let Some(region) = &self.region {
            region.validate()?;
        }
        self.export.validate()
    }

    fn rebase(&mut self, base: &Path) {
        self.service.rebase(base);
        if let FootprintConfig::Geojson { path } = &mut self.footprints {
            *path = rebase_path(base, path);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthConfig {
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DriveFolderConfig {
    pub folder_name: String,
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub name_contains: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocalConfig {
    pub target_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncConfig {
    pub auth: AuthConfig,
    pub google_drive: DriveFolderConfig,
    pub local: LocalConfig,
    pub sync: SyncOptions,
}

impl SyncConfig {
    /// loads a sync file; relative paths are taken from the file's directory
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: SyncConfig = load_yaml(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.auth.credentials_path = rebase_path(base, &config.auth.credentials_path);
        config.auth.token_path = rebase_path(base, &config.auth.token_path);
        config.local.target_dir = rebase_path(base, &config.local.target_dir);

        if config.google_drive.folder_name.trim().is_empty() {
            return Err(Error::Config("google_drive.folder_name must not be empty".into()));
        }
        Ok(config)
    }
}

/// `log_level` of a pipeline file, or `sync.log_level` of a sync file.
/// `None` when the file cannot be read; loading it properly reports why.
pub fn peek_log_level(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let doc: Value = serde_yaml::from_str(&text).ok()?;
    doc.get("log_level")
        .or_else(|| doc.get("sync").and_then(|s| s.get("log_level")))
        .and_then(Value::as_str)
        .map(str::to_string)
}
