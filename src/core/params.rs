use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::processing::chunks::ChunkPolicy;
use crate::core::processing::color::{parse_operations, DEFAULT_COLOR_OPS};
use crate::core::processing::composite::PeriodKey;
use crate::error::{Error, Result};
use crate::io::stac::{PagingOptions, RetryPolicy, SearchQuery};
use crate::io::writers::tiff::WriteOptions;
use crate::types::{ensure_resolution_units, BoundingBox, WarpResampling};

pub const CONFIG_VERSION: u32 = 1;

/// Normalized-difference product `(a - b) / (a + b)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub a: String,
    pub b: String,
}

/// 8-bit color composite from three bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSpec {
    pub name: String,
    pub channels: [String; 3],
    /// Tone operators; the pipeline-wide `color_ops` when absent
    #[serde(default)]
    pub color_ops: Option<String>,
}

impl IndexSpec {
    pub fn new(name: &str, a: &str, b: &str) -> Self {
        Self {
            name: name.into(),
            a: a.into(),
            b: b.into(),
        }
    }
}

impl CompositeSpec {
    pub fn new(name: &str, channels: [&str; 3]) -> Self {
        Self {
            name: name.into(),
            channels: channels.map(String::from),
            color_ops: None,
        }
    }
}

pub fn default_indices() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new("ndvi", "nir", "red"),
        IndexSpec::new("ndwi", "green", "nir"),
    ]
}

pub fn default_composites() -> Vec<CompositeSpec> {
    vec![
        CompositeSpec::new("overview-rgb", ["red", "green", "blue"]),
        CompositeSpec::new("overview-civ", ["nir", "red", "green"]),
    ]
}

/// STAC endpoint and request behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// `pc`, `es` or a STAC API URL
    pub endpoint: String,
    pub page_size: u32,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub page_delay_ms: u64,
    pub timeout_secs: u64,
    pub sign_assets: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: "pc".into(),
            page_size: 100,
            max_retries: 3,
            backoff_ms: 500,
            page_delay_ms: 200,
            timeout_secs: 60,
            sign_assets: true,
        }
    }
}

impl CatalogConfig {
    pub fn paging(&self) -> PagingOptions {
        PagingOptions {
            page_size: self.page_size,
            page_delay: Duration::from_millis(self.page_delay_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_ms),
            },
            sign_assets: self.sign_assets,
        }
    }
}

/// Full description of one mosaic run, suitable for config files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub version: u32,
    pub collection: String,
    pub aoi: Option<BoundingBox>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Process this one STAC item instead of searching; the date window and
    /// AOI become optional (the item's footprint is the default AOI)
    pub item_url: Option<String>,
    /// Logical band names to stack, e.g. `["red", "green", "blue", "nir"]`
    pub bands: Vec<String>,
    /// Output EPSG code; first scene's projection when absent
    pub crs: Option<u32>,
    /// Pixel size in output CRS units
    pub resolution: f64,
    pub max_items: Option<usize>,
    pub max_cloud_cover: Option<f64>,
    /// Reflectance scale for bands without declared scale
    pub default_scale: f64,
    pub resampling: WarpResampling,
    pub period: PeriodKey,
    pub color_ops: String,
    pub indices: Vec<IndexSpec>,
    pub composites: Vec<CompositeSpec>,
    pub catalog: CatalogConfig,
    pub chunks: ChunkPolicy,
    pub write: WriteOptions,
    pub output_dir: PathBuf,
    /// Id of the root STAC catalog
    pub catalog_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            collection: "sentinel-2-l2a".into(),
            aoi: None,
            start_date: None,
            end_date: None,
            item_url: None,
            bands: ["red", "green", "blue", "nir"].map(String::from).to_vec(),
            crs: None,
            resolution: 10.0,
            max_items: None,
            max_cloud_cover: Some(25.0),
            default_scale: 0.0001,
            resampling: WarpResampling::Nearest,
            period: PeriodKey::Monthly,
            color_ops: DEFAULT_COLOR_OPS.into(),
            indices: default_indices(),
            composites: default_composites(),
            catalog: CatalogConfig::default(),
            chunks: ChunkPolicy::default(),
            write: WriteOptions::default(),
            output_dir: PathBuf::from("output"),
            catalog_id: "cloudmosaic".into(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config; unknown versions are rejected before any field is used.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(text)?;
        let found = match raw.get("version").and_then(|v| v.as_u64()) {
            Some(v) => u32::try_from(v).map_err(|_| Error::InvalidArgument {
                arg: "version",
                value: v.to_string(),
            })?,
            None => CONFIG_VERSION,
        };
        if found != CONFIG_VERSION {
            return Err(Error::UnsupportedConfigVersion {
                found,
                expected: CONFIG_VERSION,
            });
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// Reject anything that would fail only after compute has started.
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(Error::UnsupportedConfigVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }
        match (&self.aoi, &self.item_url) {
            (Some(aoi), _) => aoi.validate()?,
            (None, Some(_)) => {}
            (None, None) => return Err(Error::MissingArgument { arg: "aoi".into() }),
        }
        if let Some(url) = &self.item_url {
            if url.trim().is_empty() {
                return Err(Error::InvalidArgument {
                    arg: "item_url",
                    value: url.clone(),
                });
            }
        } else {
            let (start, end) = self.date_range()?;
            if start > end {
                return Err(Error::InvalidArgument {
                    arg: "start_date",
                    value: format!("{} is after end date", start.date_naive()),
                });
            }
        }
        if self.bands.is_empty() {
            return Err(Error::MissingArgument { arg: "bands".into() });
        }
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(Error::InvalidArgument {
                arg: "resolution",
                value: self.resolution.to_string(),
            });
        }
        if let Some(cc) = self.max_cloud_cover {
            if !(0.0..=100.0).contains(&cc) {
                return Err(Error::InvalidArgument {
                    arg: "max_cloud_cover",
                    value: cc.to_string(),
                });
            }
        }
        if self.crs == Some(0) {
            return Err(Error::InvalidArgument {
                arg: "crs",
                value: "0".into(),
            });
        }
        if let Some(epsg) = self.crs {
            ensure_resolution_units(epsg, self.resolution)?;
        }
        if self.catalog.page_size == 0 {
            return Err(Error::InvalidArgument {
                arg: "page_size",
                value: "0".into(),
            });
        }
        parse_operations(&self.color_ops)?;
        for c in &self.composites {
            if let Some(ops) = &c.color_ops {
                parse_operations(ops)?;
            }
        }
        Ok(())
    }

    /// Inclusive acquisition window: start-of-day to end-of-day, UTC
    pub fn date_range(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.start_date.ok_or_else(|| Error::MissingArgument {
            arg: "start_date".into(),
        })?;
        let end = self.end_date.ok_or_else(|| Error::MissingArgument {
            arg: "end_date".into(),
        })?;
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Ok((
            start.and_time(NaiveTime::MIN).and_utc(),
            end.and_time(end_of_day).and_utc(),
        ))
    }

    pub fn search_query(&self) -> Result<SearchQuery> {
        let (start, end) = self.date_range()?;
        Ok(SearchQuery {
            aoi: self
                .aoi
                .ok_or_else(|| Error::MissingArgument { arg: "aoi".into() })?,
            start,
            end,
            collection: self.collection.clone(),
            max_cloud_cover: self.max_cloud_cover,
            max_items: self.max_items,
        })
    }
}
