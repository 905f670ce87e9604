//! Shared types used across cloudmosaic.
//! Includes the scene model (`Scene`, `AssetLocator`, `BandInfo`), the spatial
//! model (`BoundingBox`, `GridSpec`) and product classification (`ProductKind`,
//! `OverviewResampling`).
use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const WGS84_EPSG: u32 = 4326;

/// Geographic CRSs whose units are degrees
pub fn is_geographic(epsg: u32) -> bool {
    matches!(epsg, 4326 | 4258 | 4269)
}

/// Resolution is in CRS units: reject pixels larger than a degree in a geographic CRS.
pub fn ensure_resolution_units(epsg: u32, resolution: f64) -> Result<()> {
    if is_geographic(epsg) && resolution > 1.0 {
        return Err(Error::InvalidArgument {
            arg: "resolution",
            value: format!("{} degrees per pixel in EPSG:{}", resolution, epsg),
        });
    }
    Ok(())
}

/// Band metadata declared for one band of an asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    /// Sensor band name, e.g. "B04"
    pub name: Option<String>,
    /// Canonical common name, e.g. "red"
    pub common_name: Option<String>,
    pub nodata: Option<f64>,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    /// Ground sample distance in CRS units
    pub resolution: Option<f64>,
}

/// Where an asset lives and which bands it carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetLocator {
    pub href: String,
    pub media_type: Option<String>,
    #[serde(default)]
    pub bands: Vec<BandInfo>,
}

impl AssetLocator {
    /// First band declaring the given common name (case-insensitive), with its
    /// 1-based position in the asset
    pub fn band(&self, common_name: &str) -> Option<(usize, &BandInfo)> {
        self.bands
            .iter()
            .enumerate()
            .find(|(_, b)| {
                b.common_name
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(common_name))
            })
            .map(|(i, b)| (i + 1, b))
    }
}

/// One satellite acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub datetime: DateTime<Utc>,
    pub cloud_cover: Option<f64>,
    pub bbox: Option<BoundingBox>,
    pub geometry: Option<serde_json::Value>,
    pub epsg: Option<u32>,
    pub assets: BTreeMap<String, AssetLocator>,
}

/// Geographic bounding box `[west, south, east, north]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        let bbox = Self {
            west,
            south,
            east,
            north,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.west, self.south, self.east, self.north]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.west >= self.east || self.south >= self.north {
            return Err(Error::InvalidArgument {
                arg: "aoi",
                value: self.to_string(),
            });
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.west, self.south, self.east, self.north]
    }

    /// GeoJSON polygon ring covering the box
    pub fn to_geometry(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [self.west, self.south],
                [self.east, self.south],
                [self.east, self.north],
                [self.west, self.north],
                [self.west, self.south],
            ]]
        })
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

/// Parses `minx,miny,maxx,maxy`; brackets and spaces are tolerated.
impl FromStr for BoundingBox {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument {
            arg: "aoi",
            value: s.to_string(),
        };
        let values = s
            .trim()
            .trim_start_matches(['[', '('])
            .trim_end_matches([']', ')'])
            .split(',')
            .map(|v| v.trim().parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<Vec<f64>>>()?;
        match values.as_slice() {
            [w, s_, e, n] => BoundingBox::new(*w, *s_, *e, *n).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Pixel grid shared by every band array in a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub epsg: u32,
    /// GDAL affine geotransform `[origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height]`
    pub geotransform: [f64; 6],
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    /// `(rows, cols)` as used by ndarray
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Extent `[xmin, ymin, xmax, ymax]` in grid CRS units (north-up grids)
    pub fn extent(&self) -> [f64; 4] {
        let gt = self.geotransform;
        let x0 = gt[0];
        let x1 = gt[0] + gt[1] * self.width as f64;
        let y0 = gt[3];
        let y1 = gt[3] + gt[5] * self.height as f64;
        [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
    }

    /// A grid is attachable to a raster when it has a CRS and a non-degenerate transform.
    pub fn is_georeferenced(&self) -> bool {
        self.epsg > 0
            && self.geotransform.iter().all(|v| v.is_finite())
            && self.geotransform[1] != 0.0
            && self.geotransform[5] != 0.0
    }

    pub fn ensure_matches(&self, other: &GridSpec) -> Result<()> {
        const TOL: f64 = 1e-9;
        let same_transform = self
            .geotransform
            .iter()
            .zip(other.geotransform.iter())
            .all(|(a, b)| (a - b).abs() <= TOL * a.abs().max(1.0));
        if self.epsg != other.epsg
            || self.width != other.width
            || self.height != other.height
            || !same_transform
        {
            return Err(Error::GridMismatch {
                expected: self.to_string(),
                actual: other.to_string(),
            });
        }
        Ok(())
    }

    pub fn ensure_shape(&self, rows: usize, cols: usize) -> Result<()> {
        if (rows, cols) != self.shape() {
            return Err(Error::GridMismatch {
                expected: self.to_string(),
                actual: format!("{}x{} pixels", cols, rows),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for GridSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EPSG:{} {}x{} @ {:?}",
            self.epsg, self.width, self.height, self.geotransform
        )
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    /// Single-band float spectral index
    Index,
    /// Three-band 8-bit color composite
    Composite,
}

impl ProductKind {
    pub fn roles(&self) -> &'static [&'static str] {
        match self {
            ProductKind::Index => &["data"],
            ProductKind::Composite => &["visual"],
        }
    }

    pub fn overview_resampling(&self) -> OverviewResampling {
        match self {
            ProductKind::Index => OverviewResampling::Average,
            ProductKind::Composite => OverviewResampling::Nearest,
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductKind::Index => write!(f, "index"),
            ProductKind::Composite => write!(f, "composite"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverviewResampling {
    Average,
    Nearest,
}

impl OverviewResampling {
    /// Name understood by GDAL's overview builder
    pub fn gdal_name(&self) -> &'static str {
        match self {
            OverviewResampling::Average => "AVERAGE",
            OverviewResampling::Nearest => "NEAREST",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarpResampling {
    Nearest,
    Bilinear,
    Cubic,
}

impl WarpResampling {
    /// Name understood by `gdalwarp -r`
    pub fn gdalwarp_name(&self) -> &'static str {
        match self {
            WarpResampling::Nearest => "near",
            WarpResampling::Bilinear => "bilinear",
            WarpResampling::Cubic => "cubic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_parses_plain_and_bracketed() {
        let a: BoundingBox = "10.1, 45.0, 10.5, 45.3".parse().unwrap();
        let b: BoundingBox = "[10.1,45.0,10.5,45.3]".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.west, 10.1);
        assert_eq!(a.north, 45.3);
    }

    #[test]
    fn bbox_rejects_malformed() {
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
        assert!("10,10,5,20".parse::<BoundingBox>().is_err());
        let err = "10,10,5,20".parse::<BoundingBox>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn grid_mismatch_is_reported() {
        let a = GridSpec {
            epsg: 32633,
            geotransform: [500000.0, 10.0, 0.0, 5000000.0, 0.0, -10.0],
            width: 100,
            height: 80,
        };
        let mut b = a;
        assert!(a.ensure_matches(&b).is_ok());
        b.width = 101;
        assert!(matches!(a.ensure_matches(&b), Err(Error::GridMismatch { .. })));
        let mut c = a;
        c.epsg = 4326;
        assert!(a.ensure_matches(&c).is_err());
    }

    #[test]
    fn grid_extent_for_north_up() {
        let g = GridSpec {
            epsg: 32633,
            geotransform: [100.0, 10.0, 0.0, 1000.0, 0.0, -10.0],
            width: 5,
            height: 4,
        };
        assert_eq!(g.extent(), [100.0, 960.0, 150.0, 1000.0]);
        assert!(g.is_georeferenced());
    }

    #[test]
    fn resolution_units_follow_crs() {
        assert!(ensure_resolution_units(32633, 10.0).is_ok());
        assert!(ensure_resolution_units(4326, 0.0001).is_ok());
        assert!(ensure_resolution_units(4326, 10.0).unwrap_err().is_configuration());
    }

    #[test]
    fn asset_band_lookup_is_case_insensitive() {
        let asset = AssetLocator {
            href: "x.tif".into(),
            media_type: None,
            bands: vec![
                BandInfo {
                    common_name: Some("Red".into()),
                    ..Default::default()
                },
                BandInfo {
                    common_name: Some("green".into()),
                    ..Default::default()
                },
            ],
        };
        assert_eq!(asset.band("red").map(|(i, _)| i), Some(1));
        assert_eq!(asset.band("GREEN").map(|(i, _)| i), Some(2));
        assert!(asset.band("nir").is_none());
    }
}
