//! STAC (SpatioTemporal Asset Catalog) data types.
//!
//! Serde models for STAC Item Search (`POST /search`) requests and responses,
//! plus the conversion of an item into the crate's `Scene` model.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CatalogError;
use crate::types::{AssetLocator, BandInfo, BoundingBox, Scene};

/// Body for `POST /search` (STAC API Item Search).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    /// Datetime or interval, e.g. `"2024-01-01T00:00:00Z/2024-02-29T23:59:59Z"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Query extension filter, e.g. `{"eo:cloud_cover": {"lt": 25}}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
}

impl StacSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bbox(mut self, bbox: &BoundingBox) -> Self {
        self.bbox = Some(bbox.to_vec());
        self
    }

    pub fn datetime(mut self, start: &DateTime<Utc>, end: &DateTime<Utc>) -> Self {
        self.datetime = Some(format!(
            "{}/{}",
            start.format("%Y-%m-%dT%H:%M:%SZ"),
            end.format("%Y-%m-%dT%H:%M:%SZ")
        ));
        self
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.collections = Some(vec![collection.to_string()]);
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn max_cloud_cover(mut self, max: f64) -> Self {
        self.query = Some(serde_json::json!({ "eo:cloud_cover": { "lt": max } }));
        self
    }
}

/// A STAC Item Collection (GeoJSON FeatureCollection).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StacItemCollection {
    #[serde(rename = "type", default)]
    pub type_: String,

    #[serde(default)]
    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,

    #[serde(rename = "numberMatched", skip_serializing_if = "Option::is_none")]
    pub number_matched: Option<u64>,
}

impl StacItemCollection {
    /// The `"next"` pagination link, if any.
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

/// A single STAC Item (GeoJSON Feature).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItem {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    pub properties: StacItemProperties,

    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

/// STAC Item properties.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_datetime: Option<String>,

    #[serde(rename = "eo:cloud_cover", skip_serializing_if = "Option::is_none")]
    pub eo_cloud_cover: Option<f64>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A single STAC Asset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacAsset {
    pub href: String,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    #[serde(rename = "eo:bands", default, skip_serializing_if = "Vec::is_empty")]
    pub eo_bands: Vec<EoBand>,

    #[serde(rename = "raster:bands", default, skip_serializing_if = "Vec::is_empty")]
    pub raster_bands: Vec<RasterBand>,
}

/// Entry of the `eo:bands` extension array
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EoBand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
}

/// Entry of the `raster:bands` extension array
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RasterBand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodata: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spatial_resolution: Option<f64>,
}

/// A STAC Link (pagination and related resources).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,

    /// HTTP method; `"next"` links often use POST
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Merge `body` into the previous request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

impl StacAsset {
    /// Merge `eo:bands` and `raster:bands` by position
    pub fn band_info(&self) -> Vec<BandInfo> {
        let n = self.eo_bands.len().max(self.raster_bands.len());
        (0..n)
            .map(|i| {
                let eo = self.eo_bands.get(i).cloned().unwrap_or_default();
                let raster = self.raster_bands.get(i).cloned().unwrap_or_default();
                BandInfo {
                    name: eo.name,
                    common_name: eo.common_name,
                    nodata: raster.nodata,
                    scale: raster.scale,
                    offset: raster.offset,
                    resolution: raster.spatial_resolution,
                }
            })
            .collect()
    }
}

impl StacItem {
    /// EPSG code from `proj:epsg` (or `proj:code` of the form `EPSG:n`)
    pub fn epsg(&self) -> Option<u32> {
        let extra = &self.properties.extra;
        extra
            .get("proj:epsg")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .or_else(|| {
                extra
                    .get("proj:code")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.strip_prefix("EPSG:"))
                    .and_then(|s| s.parse().ok())
            })
    }

    /// Convert into a `Scene`; an item without a parseable acquisition time is rejected.
    pub fn to_scene(&self) -> Result<Scene, CatalogError> {
        let props = &self.properties;
        let datetime = props
            .datetime
            .as_deref()
            .or(props.start_datetime.as_deref())
            .and_then(parse_datetime)
            .ok_or_else(|| CatalogError::Parse(format!("item {} has no valid datetime", self.id)))?;
        let bbox = match self.bbox.as_deref() {
            Some([w, s, e, n]) => BoundingBox::new(*w, *s, *e, *n).ok(),
            _ => None,
        };
        let assets: BTreeMap<String, AssetLocator> = self
            .assets
            .iter()
            .map(|(key, asset)| {
                (
                    key.clone(),
                    AssetLocator {
                        href: asset.href.clone(),
                        media_type: asset.type_.clone(),
                        bands: asset.band_info(),
                    },
                )
            })
            .collect();
        Ok(Scene {
            id: self.id.clone(),
            datetime,
            cloud_cover: props.eo_cloud_cover,
            bbox,
            geometry: self.geometry.clone(),
            epsg: self.epsg(),
            assets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "id": "S2B_MSIL2A_20240105T101409_R022_T32TQM",
      "bbox": [10.1, 45.0, 11.5, 46.0],
      "geometry": {"type": "Point", "coordinates": [10.8, 45.5]},
      "properties": {
        "datetime": "2024-01-05T10:14:09.024000Z",
        "eo:cloud_cover": 3.5,
        "proj:epsg": 32632
      },
      "assets": {
        "red": {
          "href": "https://example.com/B04.tif",
          "type": "image/tiff; application=geotiff; profile=cloud-optimized",
          "roles": ["data"],
          "eo:bands": [{"name": "B04", "common_name": "red"}],
          "raster:bands": [{"nodata": 0, "scale": 0.0001, "offset": -0.1, "spatial_resolution": 10}]
        },
        "thumbnail": {
          "href": "https://example.com/thumb.png",
          "type": "image/png",
          "roles": ["thumbnail"]
        }
      }
    }
  ],
  "links": [
    {"rel": "next", "href": "https://example.com/search", "method": "POST", "body": {"token": "abc"}, "merge": true},
    {"rel": "self", "href": "https://example.com/search"}
  ]
}"#;

    #[test]
    fn search_params_body() {
        let bbox = BoundingBox::new(10.0, 45.0, 11.0, 46.0).unwrap();
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2024-02-29T23:59:59Z").unwrap().with_timezone(&Utc);
        let params = StacSearchParams::new()
            .bbox(&bbox)
            .datetime(&start, &end)
            .collection("sentinel-2-l2a")
            .limit(100)
            .max_cloud_cover(25.0);
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["datetime"], "2024-01-01T00:00:00Z/2024-02-29T23:59:59Z");
        assert_eq!(json["query"]["eo:cloud_cover"]["lt"], 25.0);
        assert_eq!(json["collections"][0], "sentinel-2-l2a");
    }

    #[test]
    fn item_to_scene_merges_band_metadata() {
        let col: StacItemCollection = serde_json::from_str(FIXTURE).unwrap();
        assert!(col.next_link().is_some());
        let scene = col.features[0].to_scene().unwrap();
        assert_eq!(scene.epsg, Some(32632));
        assert_eq!(scene.cloud_cover, Some(3.5));
        assert_eq!(scene.bbox.unwrap().west, 10.1);
        let red = &scene.assets["red"].bands[0];
        assert_eq!(red.common_name.as_deref(), Some("red"));
        assert_eq!(red.scale, Some(0.0001));
        assert_eq!(red.nodata, Some(0.0));
        assert!(scene.assets["thumbnail"].bands.is_empty());
    }

    #[test]
    fn item_without_datetime_is_rejected() {
        let item: StacItem = serde_json::from_str(
            r#"{"id": "x", "properties": {"datetime": null}, "assets": {}}"#,
        )
        .unwrap();
        assert!(matches!(item.to_scene(), Err(CatalogError::Parse(_))));
    }
}
