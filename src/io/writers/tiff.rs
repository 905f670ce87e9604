use std::path::Path;

use gdal::raster::{Buffer, ColorInterpretation, GdalType, RasterCreationOptions};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::processing::pipeline::{DerivedProduct, ProductPixels};
use crate::error::{Error, Result};
use crate::io::gdal::GdalError;
use crate::types::{GridSpec, OverviewResampling};

/// Raster encoding options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub driver: String,
    pub compress: String,
    pub tiled: bool,
    pub block_size: usize,
    pub overview_levels: Vec<u32>,
    /// Extra `KEY=VALUE` creation options passed to the driver
    pub creation_options: Vec<String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            driver: "GTiff".into(),
            compress: "DEFLATE".into(),
            tiled: true,
            block_size: 256,
            overview_levels: vec![2, 4, 8, 16],
            creation_options: Vec::new(),
        }
    }
}

impl WriteOptions {
    fn driver_options(&self) -> Result<RasterCreationOptions> {
        let mut opts = RasterCreationOptions::new();
        let set = |opts: &mut RasterCreationOptions, k: &str, v: &str| -> Result<()> {
            opts.set_name_value(k, v).map_err(GdalError::from)?;
            Ok(())
        };
        set(&mut opts, "COMPRESS", &self.compress)?;
        if self.tiled {
            set(&mut opts, "TILED", "YES")?;
            set(&mut opts, "BLOCKXSIZE", &self.block_size.to_string())?;
            set(&mut opts, "BLOCKYSIZE", &self.block_size.to_string())?;
        }
        for extra in &self.creation_options {
            let (k, v) = extra.split_once('=').ok_or_else(|| Error::InvalidArgument {
                arg: "creation_options",
                value: extra.clone(),
            })?;
            set(&mut opts, k.trim(), v.trim())?;
        }
        Ok(opts)
    }

    /// Overview levels that keep at least one pixel on the shorter axis
    pub fn effective_overviews(&self, width: usize, height: usize) -> Vec<i32> {
        let min_dim = width.min(height);
        self.overview_levels
            .iter()
            .filter(|&&l| l > 1 && (l as usize) <= min_dim)
            .map(|&l| l as i32)
            .collect()
    }
}

fn create<T: GdalType + Copy>(
    path: &Path,
    grid: &GridSpec,
    bands: usize,
    options: &WriteOptions,
) -> Result<Dataset> {
    let driver = DriverManager::get_driver_by_name(&options.driver).map_err(GdalError::from)?;
    let opts = options.driver_options()?;
    let mut ds = driver
        .create_with_band_type_with_options::<T, _>(path, grid.width, grid.height, bands, &opts)
        .map_err(GdalError::from)?;
    ds.set_geo_transform(&grid.geotransform).map_err(GdalError::from)?;
    let srs = SpatialRef::from_epsg(grid.epsg).map_err(GdalError::from)?;
    ds.set_spatial_ref(&srs).map_err(GdalError::from)?;
    Ok(ds)
}

fn write_plane<T: GdalType + Copy>(
    ds: &Dataset,
    index: usize,
    plane: ndarray::ArrayView2<'_, T>,
) -> Result<()> {
    let (rows, cols) = plane.dim();
    let mut band = ds.rasterband(index).map_err(GdalError::from)?;
    let mut buf = Buffer::new((cols, rows), plane.iter().copied().collect::<Vec<T>>());
    band.write((0, 0), (cols, rows), &mut buf).map_err(GdalError::from)?;
    Ok(())
}

fn set_tags(ds: &mut Dataset, product: &DerivedProduct, resampling: OverviewResampling) -> Result<()> {
    let tags = [
        ("PERIOD", product.period.clone()),
        ("START_DATETIME", product.start.to_rfc3339()),
        ("END_DATETIME", product.end.to_rfc3339()),
        ("PRODUCT", product.name.clone()),
        ("PRODUCT_KIND", product.kind().to_string()),
        ("SOURCE_SCENES", product.scene_ids.join(",")),
    ];
    for (k, v) in tags {
        ds.set_metadata_item(k, &v, "").map_err(GdalError::from)?;
    }
    ds.set_metadata_item("resampling", resampling.gdal_name(), "rio_overview")
        .map_err(GdalError::from)?;
    Ok(())
}

fn write_index(path: &Path, product: &DerivedProduct, data: &Array2<f32>, options: &WriteOptions) -> Result<Dataset> {
    let ds = create::<f32>(path, &product.grid, 1, options)?;
    {
        let mut band = ds.rasterband(1).map_err(GdalError::from)?;
        band.set_no_data_value(Some(f64::NAN)).map_err(GdalError::from)?;
    }
    write_plane(&ds, 1, data.view())?;
    Ok(ds)
}

fn write_composite(path: &Path, product: &DerivedProduct, data: &Array3<u8>, options: &WriteOptions) -> Result<Dataset> {
    let ds = create::<u8>(path, &product.grid, 3, options)?;
    let colors = [
        ColorInterpretation::RedBand,
        ColorInterpretation::GreenBand,
        ColorInterpretation::BlueBand,
    ];
    for (i, plane) in data.axis_iter(Axis(0)).enumerate() {
        {
            let mut band = ds.rasterband(i + 1).map_err(GdalError::from)?;
            band.set_color_interpretation(colors[i]).map_err(GdalError::from)?;
        }
        write_plane(&ds, i + 1, plane)?;
    }
    Ok(ds)
}

/// Write one derived product as a georeferenced raster with overviews.
///
/// The raster is written to a temporary sibling and renamed into place only
/// once pixels, tags and overviews are complete.
pub fn write_product(product: &DerivedProduct, path: &Path, options: &WriteOptions) -> Result<()> {
    if !product.grid.is_georeferenced() {
        return Err(Error::MissingSpatialRef {
            product: product.name.clone(),
        });
    }
    let (rows, cols) = product.pixels.shape();
    product.grid.ensure_shape(rows, cols)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp = tempfile::Builder::new()
        .prefix(".cloudmosaic_")
        .suffix(".tif.partial")
        .tempfile_in(parent)?;

    let resampling = product.kind().overview_resampling();
    {
        let mut ds = match &product.pixels {
            ProductPixels::Index(data) => write_index(tmp.path(), product, data, options)?,
            ProductPixels::Composite(data) => write_composite(tmp.path(), product, data, options)?,
        };
        set_tags(&mut ds, product, resampling)?;
        let levels = options.effective_overviews(cols, rows);
        if !levels.is_empty() {
            debug!("Building overviews {:?} ({})", levels, resampling.gdal_name());
            ds.build_overviews(resampling.gdal_name(), &levels, &[])
                .map_err(GdalError::from)?;
        }
        ds.flush_cache().map_err(GdalError::from)?;
    }

    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    info!("Saved {} to {:?}", product.name, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overview_levels_skip_subpixel() {
        let opts = WriteOptions::default();
        assert_eq!(opts.effective_overviews(1000, 1000), vec![2, 4, 8, 16]);
        assert_eq!(opts.effective_overviews(10, 5), vec![2, 4]);
        assert!(opts.effective_overviews(1, 1).is_empty());
    }

    #[test]
    fn malformed_creation_option_is_rejected() {
        let opts = WriteOptions {
            creation_options: vec!["PREDICTOR".into()],
            ..Default::default()
        };
        assert!(opts.driver_options().is_err());
    }
}
