//! On-the-fly reprojection of scene assets onto the run's common grid.
//!
//! Each (scene, band) asset is described by a warped VRT produced by `gdalwarp`;
//! pixels are only fetched and resampled when a chunk window is read.
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use ndarray::Array2;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::core::processing::bands::ResolvedBand;
use crate::core::processing::chunks::Window;
use crate::core::processing::stack::{RasterSource, SourceProvider};
use crate::error::{Error, Result};
use crate::io::gdal::{GdalError, GdalRasterReader};
use crate::types::{ensure_resolution_units, BoundingBox, GridSpec, Scene, WarpResampling, WGS84_EPSG};

/// Target grid definition: AOI in WGS84, output CRS and pixel size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetGrid {
    pub aoi: BoundingBox,
    pub epsg: u32,
    pub resolution: f64,
}

impl TargetGrid {
    /// Fails when `resolution` cannot be meant in the units of `epsg`.
    pub fn new(aoi: BoundingBox, epsg: u32, resolution: f64) -> Result<Self> {
        ensure_resolution_units(epsg, resolution)?;
        Ok(Self {
            aoi,
            epsg,
            resolution,
        })
    }
}

/// Map an asset href to a GDAL-readable path
pub fn gdal_path(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else if let Some(rest) = href.strip_prefix("s3://") {
        format!("/vsis3/{}", rest)
    } else if let Some(rest) = href.strip_prefix("gs://") {
        format!("/vsigs/{}", rest)
    } else {
        href.to_string()
    }
}

/// `gdalwarp` arguments producing a target-aligned warped VRT
pub fn warp_args(src: &str, dst: &Path, target: &TargetGrid, resampling: WarpResampling) -> Vec<String> {
    let res = target.resolution.to_string();
    let aoi = target.aoi;
    vec![
        "-q".into(),
        "-of".into(),
        "VRT".into(),
        "-overwrite".into(),
        "-r".into(),
        resampling.gdalwarp_name().into(),
        "-t_srs".into(),
        format!("EPSG:{}", target.epsg),
        "-tr".into(),
        res.clone(),
        res,
        "-tap".into(),
        "-te".into(),
        aoi.west.to_string(),
        aoi.south.to_string(),
        aoi.east.to_string(),
        aoi.north.to_string(),
        "-te_srs".into(),
        format!("EPSG:{}", WGS84_EPSG),
        src.to_string(),
        dst.to_string_lossy().into_owned(),
    ]
}

/// One band of a warped asset, read lazily window by window
pub struct WarpedSource {
    path: PathBuf,
    /// 1-based band number in the VRT
    band: usize,
    grid: GridSpec,
    // Keeps the VRT directory alive for as long as any source exists
    _workdir: Arc<TempDir>,
}

impl RasterSource for WarpedSource {
    fn grid(&self) -> &GridSpec {
        &self.grid
    }

    fn read_window(&self, window: Window) -> Result<Array2<f32>> {
        let reader = GdalRasterReader::open(&self.path)?;
        Ok(reader.read_window_f32(self.band, window)?)
    }

    fn describe(&self) -> String {
        format!("{} band {}", self.path.display(), self.band)
    }
}

/// Opens every asset through `gdalwarp` onto one target grid
pub struct GdalWarpProvider {
    target: TargetGrid,
    resampling: WarpResampling,
    workdir: Arc<TempDir>,
}

impl GdalWarpProvider {
    pub fn new(target: TargetGrid, resampling: WarpResampling) -> Result<Self> {
        let workdir = tempfile::Builder::new().prefix("cloudmosaic_").tempdir()?;
        info!(
            "Warping assets to EPSG:{} at {} units/pixel over {}",
            target.epsg, target.resolution, target.aoi
        );
        Ok(Self {
            target,
            resampling,
            workdir: Arc::new(workdir),
        })
    }

    fn warp(&self, src: &str, dst: &Path) -> Result<()> {
        let args = warp_args(src, dst, &self.target, self.resampling);
        debug!("gdalwarp {}", args.join(" "));
        let output = Command::new("gdalwarp")
            .args(&args)
            .output()
            .map_err(|e| GdalError::Warp {
                source_path: src.to_string(),
                message: format!("exec error: {}", e),
            })?;
        if !output.status.success() {
            return Err(GdalError::Warp {
                source_path: src.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl SourceProvider for GdalWarpProvider {
    fn open(&self, scene: &Scene, band: &ResolvedBand) -> Result<Arc<dyn RasterSource>> {
        let asset = scene.assets.get(&band.asset_key).ok_or_else(|| Error::BandNotFound {
            scene: scene.id.clone(),
            band: band.logical.clone(),
        })?;
        let src = gdal_path(&asset.href);
        // One VRT per asset, shared by every band read from it
        let dst = self
            .workdir
            .path()
            .join(format!("{}_{}.vrt", scene.id, band.asset_key));
        if !dst.exists() {
            self.warp(&src, &dst)?;
        }
        let reader = GdalRasterReader::open(&dst)?;
        if band.band_index == 0 || band.band_index > reader.metadata.bands {
            return Err(Error::BandNotFound {
                scene: scene.id.clone(),
                band: format!("{} (band {} of {})", band.logical, band.band_index, band.asset_key),
            });
        }
        let mut grid = GridSpec {
            epsg: self.target.epsg,
            geotransform: reader.metadata.geotransform,
            width: reader.metadata.size_x,
            height: reader.metadata.size_y,
        };
        if let Some(epsg) = reader.metadata.epsg {
            grid.epsg = epsg;
        }
        Ok(Arc::new(WarpedSource {
            path: dst,
            band: band.band_index,
            grid,
            _workdir: Arc::clone(&self.workdir),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hrefs_map_to_vsi_paths() {
        assert_eq!(gdal_path("https://x.org/a.tif"), "/vsicurl/https://x.org/a.tif");
        assert_eq!(gdal_path("s3://bucket/a.tif"), "/vsis3/bucket/a.tif");
        assert_eq!(gdal_path("/data/a.tif"), "/data/a.tif");
    }

    #[test]
    fn geographic_fallback_rejects_metric_resolution() {
        let aoi = BoundingBox::new(10.0, 45.0, 10.5, 45.5).unwrap();
        assert!(TargetGrid::new(aoi, WGS84_EPSG, 10.0).is_err());
        assert!(TargetGrid::new(aoi, WGS84_EPSG, 0.0001).is_ok());
        assert!(TargetGrid::new(aoi, 32632, 10.0).is_ok());
    }

    #[test]
    fn warp_args_align_to_target() {
        let target = TargetGrid {
            aoi: BoundingBox::new(10.0, 45.0, 10.5, 45.5).unwrap(),
            epsg: 32632,
            resolution: 20.0,
        };
        let args = warp_args("in.tif", Path::new("out.vrt"), &target, WarpResampling::Nearest);
        let joined = args.join(" ");
        assert!(joined.contains("-of VRT"));
        assert!(joined.contains("-t_srs EPSG:32632"));
        assert!(joined.contains("-tr 20 20 -tap"));
        assert!(joined.contains("-te 10 45 10.5 45.5 -te_srs EPSG:4326"));
        assert!(joined.ends_with("in.tif out.vrt"));
    }
}
