use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid CRS: {crs}. Expected EPSG:<code> or a numeric code")]
    InvalidCrs { crs: String },

    #[error("{failed} artifact(s) failed to write")]
    ArtifactsFailed { failed: usize },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] cloudmosaic::Error),
}
