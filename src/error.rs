//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Converts underlying I/O, GDAL and catalog errors, and provides semantic variants
//! for configuration validation, grid preconditions and processing failures.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] crate::io::GdalError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] crate::io::stac::CatalogError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {arg}={value}")]
    InvalidArgument { arg: &'static str, value: String },

    #[error("Missing required argument: {arg}")]
    MissingArgument { arg: String },

    #[error("Band `{band}` not found in scene {scene}")]
    BandNotFound { scene: String, band: String },

    #[error("Grid mismatch: expected {expected}, got {actual}")]
    GridMismatch { expected: String, actual: String },

    #[error("No spatial reference attached to `{product}`")]
    MissingSpatialRef { product: String },

    #[error("Unsupported configuration version {found} (expected {expected})")]
    UnsupportedConfigVersion { found: u32, expected: u32 },

    #[error("Invalid color operation `{op}`: {reason}")]
    ColorOperation { op: String, reason: String },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("External error: {0}")]
    External(String),
}

impl Error {
    pub fn external<E: std::fmt::Display>(e: E) -> Self {
        Error::External(e.to_string())
    }

    /// True for errors that must abort a run before any compute is submitted.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument { .. }
                | Error::MissingArgument { .. }
                | Error::BandNotFound { .. }
                | Error::UnsupportedConfigVersion { .. }
                | Error::ColorOperation { .. }
        )
    }
}
