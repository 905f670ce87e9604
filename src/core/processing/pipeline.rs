use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use tracing::{debug, info};

use crate::core::params::{CompositeSpec, IndexSpec, PipelineConfig};
use crate::core::processing::color::{color_composite, parse_operations, ToneOperator};
use crate::core::processing::composite::Composite;
use crate::core::processing::indices::normalized_difference;
use crate::error::{Error, Result};
use crate::types::{GridSpec, ProductKind};

/// Pixels of a derived product
#[derive(Debug, Clone, PartialEq)]
pub enum ProductPixels {
    /// `(y, x)` float index, NaN where undefined
    Index(Array2<f32>),
    /// `(3, y, x)` 8-bit RGB
    Composite(Array3<u8>),
}

impl ProductPixels {
    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        match self {
            ProductPixels::Index(a) => a.dim(),
            ProductPixels::Composite(a) => (a.dim().1, a.dim().2),
        }
    }
}

/// One artifact derived from a temporal composite
#[derive(Debug, Clone)]
pub struct DerivedProduct {
    pub name: String,
    pub pixels: ProductPixels,
    pub grid: GridSpec,
    pub period: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub scene_ids: Vec<String>,
}

impl DerivedProduct {
    pub fn kind(&self) -> ProductKind {
        match self.pixels {
            ProductPixels::Index(_) => ProductKind::Index,
            ProductPixels::Composite(_) => ProductKind::Composite,
        }
    }
}

/// Products to derive from every composite, with parsed tone operators
#[derive(Debug, Clone, Default)]
pub struct ProductSet {
    pub indices: Vec<IndexSpec>,
    pub composites: Vec<(CompositeSpec, Vec<ToneOperator>)>,
}

impl ProductSet {
    /// Keep only products whose bands were all requested.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let requested = |b: &str| config.bands.iter().any(|r| r.eq_ignore_ascii_case(b));
        let mut set = ProductSet::default();
        for spec in &config.indices {
            if requested(&spec.a) && requested(&spec.b) {
                set.indices.push(spec.clone());
            } else {
                info!("Skipping index {}: bands {}/{} not requested", spec.name, spec.a, spec.b);
            }
        }
        for spec in &config.composites {
            if spec.channels.iter().all(|c| requested(c)) {
                let ops = parse_operations(spec.color_ops.as_deref().unwrap_or(&config.color_ops))?;
                set.composites.push((spec.clone(), ops));
            } else {
                info!("Skipping composite {}: bands {:?} not requested", spec.name, spec.channels);
            }
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.composites.is_empty()
    }
}

/// Compute every product of `products` from one composite.
pub fn derive_products(composite: &Composite, products: &ProductSet) -> Result<Vec<DerivedProduct>> {
    let (start, end) = composite
        .start()
        .zip(composite.end())
        .ok_or_else(|| Error::Processing(format!("composite {} has no acquisitions", composite.key)))?;
    let product = |name: &str, pixels: ProductPixels| DerivedProduct {
        name: name.to_string(),
        pixels,
        grid: composite.grid,
        period: composite.key.clone(),
        start,
        end,
        scene_ids: composite.scene_ids.clone(),
    };

    let mut out = Vec::with_capacity(products.indices.len() + products.composites.len());
    for spec in &products.indices {
        let nd = normalized_difference(composite.band(&spec.a)?, composite.band(&spec.b)?)?;
        debug!("{} {}: normalized difference of {} and {}", composite.key, spec.name, spec.a, spec.b);
        out.push(product(&spec.name, ProductPixels::Index(nd)));
    }
    for (spec, ops) in &products.composites {
        let [r, g, b] = &spec.channels;
        let rgb = color_composite(
            [composite.band(r)?, composite.band(g)?, composite.band(b)?],
            ops,
        )?;
        debug!("{} {}: {} tone operator(s)", composite.key, spec.name, ops.len());
        out.push(product(&spec.name, ProductPixels::Composite(rgb)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::Array3;

    fn composite() -> Composite {
        let mut data = Array3::<f32>::from_elem((4, 2, 2), 0.5);
        data.index_axis_mut(ndarray::Axis(0), 3).fill(0.7);
        Composite {
            key: "2024-01".into(),
            bands: ["red", "green", "blue", "nir"].map(String::from).to_vec(),
            data,
            timestamps: vec![
                Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            ],
            scene_ids: vec!["b".into(), "a".into()],
            grid: GridSpec {
                epsg: 32633,
                geotransform: [0.0, 10.0, 0.0, 20.0, 0.0, -10.0],
                width: 2,
                height: 2,
            },
        }
    }

    #[test]
    fn default_products_follow_requested_bands() {
        let config = PipelineConfig {
            bands: vec!["red".into(), "green".into(), "blue".into()],
            ..Default::default()
        };
        let set = ProductSet::from_config(&config).unwrap();
        assert!(set.indices.is_empty());
        assert_eq!(set.composites.len(), 1);
        assert_eq!(set.composites[0].0.name, "overview-rgb");
    }

    #[test]
    fn derives_indices_and_composites_with_extent() {
        let set = ProductSet::from_config(&PipelineConfig::default()).unwrap();
        let products = derive_products(&composite(), &set).unwrap();
        let names: Vec<_> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ndvi", "ndwi", "overview-rgb", "overview-civ"]);

        let ndvi = &products[0];
        assert_eq!(ndvi.kind(), ProductKind::Index);
        assert_eq!(ndvi.start, Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
        assert_eq!(ndvi.end, Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap());
        match &ndvi.pixels {
            ProductPixels::Index(a) => assert!((a[[0, 0]] - 1.0 / 6.0).abs() < 1e-6),
            other => panic!("unexpected pixels {:?}", other),
        }
        assert_eq!(products[2].pixels.shape(), (2, 2));
        assert_eq!(products[2].kind(), ProductKind::Composite);
    }
}
