//! I/O layer: STAC catalog search, GDAL-backed raster reading and warping,
//! and `writers` for GeoTIFF artifacts and the output STAC catalog.
pub mod gdal;
pub use gdal::{GdalError, GdalMetadata, GdalRasterReader};

pub mod stac;
pub mod warp;
pub mod writers;
