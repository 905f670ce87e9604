//! Self-contained STAC catalog describing the written artifacts.
//!
//! The tree is built in memory as relative path → JSON document and saved under
//! the output root: `catalog.json` plus one `<item-id>/<item-id>.json` per artifact.
//! Every link and asset href is relative, so the tree can be moved as a unit.
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::types::{BoundingBox, GridSpec, ProductKind};

pub const STAC_VERSION: &str = "1.0.0";
pub const GEOTIFF_MEDIA_TYPE: &str = "image/tiff; application=geotiff";
const JSON_MEDIA_TYPE: &str = "application/json";
const GEOJSON_MEDIA_TYPE: &str = "application/geo+json";
const PROJECTION_EXTENSION: &str = "https://stac-extensions.github.io/projection/v1.1.0/schema.json";

/// Catalog entry for one successfully written artifact
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: String,
    pub product: String,
    pub kind: ProductKind,
    pub period: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Raster path relative to the output root
    pub asset_path: PathBuf,
    pub grid: GridSpec,
    /// Footprint in WGS84
    pub bbox: Option<BoundingBox>,
    pub scene_ids: Vec<String>,
}

/// Relative href from a directory to a file, both relative to the same root
pub fn relative_href(from_dir: &Path, target: &Path) -> String {
    let depth = from_dir
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    let mut parts: Vec<String> = vec!["..".to_string(); depth];
    parts.extend(
        target
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            }),
    );
    if depth == 0 {
        format!("./{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}

/// Link object shared by the catalog root and its items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogLink {
    pub rel: String,
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: String,
}

impl CatalogLink {
    fn new(rel: &str, href: String, media_type: &str) -> Self {
        Self {
            rel: rel.into(),
            href,
            media_type: media_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAsset {
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub title: String,
    pub roles: Vec<String>,
}

/// Item properties: the composite's time range, projection and provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicProperties {
    /// Always null; the range lives in start/end
    pub datetime: Option<String>,
    pub start_datetime: String,
    pub end_datetime: String,
    #[serde(rename = "proj:epsg")]
    pub epsg: u32,
    #[serde(rename = "proj:shape")]
    pub shape: [usize; 2],
    #[serde(rename = "proj:transform")]
    pub transform: [f64; 6],
    #[serde(rename = "proj:bbox")]
    pub proj_bbox: [f64; 4],
    #[serde(rename = "mosaic:period")]
    pub period: String,
    #[serde(rename = "mosaic:product")]
    pub product: String,
    #[serde(rename = "mosaic:scenes")]
    pub scenes: Vec<String>,
}

/// STAC Item (GeoJSON Feature) for one artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MosaicItem {
    #[serde(rename = "type")]
    pub type_: String,
    pub stac_version: String,
    pub stac_extensions: Vec<String>,
    pub id: String,
    pub geometry: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    pub properties: MosaicProperties,
    pub links: Vec<CatalogLink>,
    pub assets: BTreeMap<String, ItemAsset>,
}

impl MosaicItem {
    pub fn from_record(record: &CatalogRecord, item_dir: &Path) -> Self {
        let gt = record.grid.geotransform;
        let root = relative_href(item_dir, Path::new("catalog.json"));
        let asset = ItemAsset {
            href: relative_href(item_dir, &record.asset_path),
            media_type: GEOTIFF_MEDIA_TYPE.into(),
            title: format!("{} {}", record.product, record.period),
            roles: record.kind.roles().iter().map(|r| r.to_string()).collect(),
        };
        Self {
            type_: "Feature".into(),
            stac_version: STAC_VERSION.into(),
            stac_extensions: vec![PROJECTION_EXTENSION.into()],
            id: record.id.clone(),
            geometry: record.bbox.map(|b| b.to_geometry()),
            bbox: record.bbox.map(|b| b.to_vec()),
            properties: MosaicProperties {
                datetime: None,
                start_datetime: record.start.to_rfc3339(),
                end_datetime: record.end.to_rfc3339(),
                epsg: record.grid.epsg,
                shape: [record.grid.height, record.grid.width],
                // STAC order: [a, b, c, d, e, f] from GDAL's [c, a, b, f, d, e]
                transform: [gt[1], gt[2], gt[0], gt[4], gt[5], gt[3]],
                proj_bbox: record.grid.extent(),
                period: record.period.clone(),
                product: record.product.clone(),
                scenes: record.scene_ids.clone(),
            },
            links: vec![
                CatalogLink::new("root", root.clone(), JSON_MEDIA_TYPE),
                CatalogLink::new("parent", root, JSON_MEDIA_TYPE),
            ],
            assets: BTreeMap::from([(record.product.clone(), asset)]),
        }
    }
}

/// Root catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCatalog {
    #[serde(rename = "type")]
    pub type_: String,
    pub stac_version: String,
    pub id: String,
    pub description: String,
    pub links: Vec<CatalogLink>,
}

/// In-memory catalog tree: relative path → JSON document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogTree {
    pub files: BTreeMap<PathBuf, Value>,
}

impl CatalogTree {
    pub fn root(&self) -> Option<&Value> {
        self.files.get(Path::new("catalog.json"))
    }

    /// Item documents in path order
    pub fn items(&self) -> impl Iterator<Item = &Value> {
        self.files
            .iter()
            .filter(|(p, _)| p.as_path() != Path::new("catalog.json"))
            .map(|(_, v)| v)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        for (rel, doc) in &self.files {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, serde_json::to_string_pretty(doc)?)?;
        }
        info!("Saved STAC catalog with {} item(s) to {:?}", self.files.len().saturating_sub(1), root);
        Ok(())
    }
}

/// Build a self-contained catalog over `records`.
pub fn build_catalog(id: &str, description: &str, records: &[CatalogRecord]) -> Result<CatalogTree> {
    let mut tree = CatalogTree::default();
    let mut links = vec![CatalogLink::new("root", "./catalog.json".into(), JSON_MEDIA_TYPE)];
    for record in records {
        let item_dir = PathBuf::from(&record.id);
        let item_path = item_dir.join(format!("{}.json", record.id));
        links.push(CatalogLink::new(
            "item",
            relative_href(Path::new(""), &item_path),
            GEOJSON_MEDIA_TYPE,
        ));
        let item = MosaicItem::from_record(record, &item_dir);
        tree.files.insert(item_path, serde_json::to_value(item)?);
    }
    let root = RootCatalog {
        type_: "Catalog".into(),
        stac_version: STAC_VERSION.into(),
        id: id.into(),
        description: description.into(),
        links,
    };
    tree.files.insert(PathBuf::from("catalog.json"), serde_json::to_value(root)?);
    Ok(tree)
}
