//! Error kinds shared by every pipeline stage.

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// a filtered query or a masked collection has no elements
    #[error("no elements found in collection ({context})")]
    EmptyDataset { context: String },

    /// required bands are not present in the image
    #[error("expected bands not found in dataset: {}", .missing.join(", "))]
    MissingBands { missing: Vec<String> },

    #[error("unsupported reducer: {0}")]
    UnsupportedReducer(String),

    #[error("malformed geometry: {0}")]
    MalformedGeometry(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// failure reported by the processing service
    #[error("processing service error: {0}")]
    Service(String),

    /// failure reported by the file-storage collaborator
    #[error("storage error: {0}")]
    Storage(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[cfg(feature = "gdal")]
    #[error("gdal error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl Error {
    /// the error underneath any stage wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// The pipeline step a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Region,
    Query,
    Validate,
    Composite,
    Footprints,
    Export,
    Sync,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Region => "region",
            Stage::Query => "query",
            Stage::Validate => "validate",
            Stage::Composite => "composite",
            Stage::Footprints => "footprints",
            Stage::Export => "export",
            Stage::Sync => "sync",
        };
        f.write_str(name)
    }
}

pub trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| match e {
            already @ Error::Stage { .. } => already,
            source => Error::Stage {
                stage,
                source: Box::new(source),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapper_names_stage_and_context() {
        let err: Result<()> = Err(Error::EmptyDataset {
            context: "Landsat 8 LST after cloud masking".into(),
        });
        let err = err.stage(Stage::Validate).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Validate));
        assert_eq!(
            err.to_string(),
            "validate failed: no elements found in collection (Landsat 8 LST after cloud masking)"
        );
        assert!(matches!(err.root(), Error::EmptyDataset { .. }));
    }

    #[test]
    fn stage_is_not_wrapped_twice() {
        let err: Result<()> = Err(Error::UnsupportedReducer("avg".into()));
        let err = err.stage(Stage::Config).stage(Stage::Composite).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Config));
    }

    #[test]
    fn missing_bands_lists_every_band() {
        let err = Error::MissingBands {
            missing: vec!["C".into(), "D".into()],
        };
        assert_eq!(err.to_string(), "expected bands not found in dataset: C, D");
    }
}
