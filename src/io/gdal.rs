use gdal::{Dataset, Metadata, errors::GdalError as GdalCrateError};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::core::processing::chunks::Window;
use crate::types::GridSpec;

/// Errors encountered when using the GDAL reader and writers
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
    #[error("gdalwarp failed for {source_path}: {message}")]
    Warp { source_path: String, message: String },
}

/// Metadata extracted from a GDAL-supported dataset
#[derive(Debug, Clone)]
pub struct GdalMetadata {
    /// Width (pixels) of the raster
    pub size_x: usize,
    /// Height (lines) of the raster
    pub size_y: usize,
    /// Number of raster bands
    pub bands: usize,
    /// Affine geotransform coefficients ([origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height])
    pub geotransform: [f64; 6],
    /// EPSG code parsed from the projection, if any
    pub epsg: Option<u32>,
    /// Nodata value of band 1
    pub nodata: Option<f64>,
    /// Additional metadata key-value pairs
    pub metadata: HashMap<String, String>,
}

impl GdalMetadata {
    /// Grid of this dataset, when it carries a recognizable EPSG code
    pub fn grid(&self) -> Option<GridSpec> {
        self.epsg.map(|epsg| GridSpec {
            epsg,
            geotransform: self.geotransform,
            width: self.size_x,
            height: self.size_y,
        })
    }
}

/// Extract an EPSG code from a projection string (WKT1 authority, WKT2 id or `EPSG:n`)
pub fn parse_epsg(wkt: &str) -> Option<u32> {
    if let Some(code) = wkt.strip_prefix("EPSG:") {
        return code.trim().parse().ok();
    }
    for key in ["AUTHORITY[\"EPSG\",\"", "ID[\"EPSG\","] {
        if let Some(idx) = wkt.rfind(key) {
            let start = idx + key.len();
            let code: String = wkt[start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(v) = code.parse() {
                return Some(v);
            }
        }
    }
    None
}

/// Reader for GDAL-supported rasters (GeoTIFF, COG, VRT, `/vsicurl/` URLs)
pub struct GdalRasterReader {
    pub dataset: Dataset,
    pub metadata: GdalMetadata,
}

impl GdalRasterReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GdalError> {
        let dataset = Dataset::open(path.as_ref())?;
        let (size_x, size_y) = dataset.raster_size();
        let bands = dataset.raster_count() as usize;
        if bands == 0 {
            return Err(GdalError::UnsupportedFormat("No raster bands found".into()));
        }
        let geotransform = match dataset.geo_transform() {
            Ok(gt) => gt,
            Err(_) => [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        };
        let epsg = parse_epsg(&dataset.projection());
        let nodata = dataset.rasterband(1)?.no_data_value();
        // Collect metadata entries (domain "")
        let mut metadata_map = HashMap::new();
        if let Some(entries) = dataset.metadata_domain("") {
            for entry in entries {
                if let Some((key, val)) = entry.split_once('=') {
                    metadata_map.insert(key.to_string(), val.to_string());
                }
            }
        }
        Ok(GdalRasterReader {
            dataset,
            metadata: GdalMetadata {
                size_x,
                size_y,
                bands,
                geotransform,
                epsg,
                nodata,
                metadata: metadata_map,
            },
        })
    }

    fn check_band(&self, index: usize) -> Result<(), GdalError> {
        if index == 0 || index > self.metadata.bands {
            return Err(GdalError::UnsupportedFormat(format!(
                "Band index {} out of range",
                index
            )));
        }
        Ok(())
    }

    /// Read a window of a single band (1-based index) as f32, shaped (rows, cols)
    pub fn read_window_f32(&self, index: usize, w: Window) -> Result<Array2<f32>, GdalError> {
        self.check_band(index)?;
        if w.col + w.cols > self.metadata.size_x || w.row + w.rows > self.metadata.size_y {
            return Err(GdalError::DimensionMismatch(
                self.metadata.size_x,
                self.metadata.size_y,
                w.col + w.cols,
                w.row + w.rows,
            ));
        }
        let band = self.dataset.rasterband(index)?;
        let buf = band.read_as::<f32>(
            (w.col as isize, w.row as isize),
            (w.cols, w.rows),
            (w.cols, w.rows),
            None,
        )?;
        Array2::from_shape_vec((w.rows, w.cols), buf.data().to_vec())
            .map_err(|_| GdalError::DimensionMismatch(w.cols, w.rows, w.cols, w.rows))
    }

    /// Read a full band as f32
    pub fn read_band_f32(&self, index: usize) -> Result<Array2<f32>, GdalError> {
        self.read_window_f32(
            index,
            Window {
                row: 0,
                col: 0,
                rows: self.metadata.size_y,
                cols: self.metadata.size_x,
            },
        )
    }

    /// Read a full band as u8
    pub fn read_band_u8(&self, index: usize) -> Result<Array2<u8>, GdalError> {
        self.check_band(index)?;
        let (cols, rows) = (self.metadata.size_x, self.metadata.size_y);
        let band = self.dataset.rasterband(index)?;
        let buf = band.read_as::<u8>((0, 0), (cols, rows), (cols, rows), None)?;
        Array2::from_shape_vec((rows, cols), buf.data().to_vec())
            .map_err(|_| GdalError::DimensionMismatch(cols, rows, cols, rows))
    }
}
