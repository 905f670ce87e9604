use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::core::processing::pipeline::DerivedProduct;
use crate::error::Result;
use crate::io::writers::catalog::CatalogRecord;
use crate::io::writers::tiff::{write_product, WriteOptions};
use crate::types::BoundingBox;

/// Where artifacts land, relative to the output root
pub trait NamingPolicy: Send + Sync {
    /// Directory holding every artifact of one temporal bucket
    fn bucket_dir(&self, key: &str) -> PathBuf;

    fn product_path(&self, key: &str, product: &str) -> PathBuf {
        self.bucket_dir(key).join(format!("{}.tif", product))
    }

    fn item_id(&self, key: &str, product: &str) -> String {
        format!("{}-{}", product, key)
    }
}

/// `<period-key>/<product>.tif`
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodDirectories;

impl NamingPolicy for PeriodDirectories {
    fn bucket_dir(&self, key: &str) -> PathBuf {
        PathBuf::from(key)
    }
}

impl<F> NamingPolicy for F
where
    F: Fn(&str) -> PathBuf + Send + Sync,
{
    fn bucket_dir(&self, key: &str) -> PathBuf {
        self(key)
    }
}

/// Persists one derived product at a path
pub trait ArtifactWriter: Send + Sync {
    fn write(&self, product: &DerivedProduct, path: &Path) -> Result<()>;
}

/// Tiled, compressed GeoTIFF with overviews
#[derive(Debug, Clone, Default)]
pub struct GeoTiffWriter {
    pub options: WriteOptions,
}

impl ArtifactWriter for GeoTiffWriter {
    fn write(&self, product: &DerivedProduct, path: &Path) -> Result<()> {
        write_product(product, path, &self.options)
    }
}

/// An artifact that could not be written
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactFailure {
    pub product: String,
    pub period: String,
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of saving one bucket's products
#[derive(Debug, Clone, Default)]
pub struct SaveOutcome {
    pub records: Vec<CatalogRecord>,
    pub failures: Vec<ArtifactFailure>,
}

/// Write every product; a failed artifact is logged and reported but does not
/// stop the remaining ones, and gets no catalog record.
pub fn save_products(
    products: &[DerivedProduct],
    root: &Path,
    naming: &dyn NamingPolicy,
    writer: &dyn ArtifactWriter,
    footprint: Option<BoundingBox>,
) -> SaveOutcome {
    let mut outcome = SaveOutcome::default();
    for product in products {
        let rel = naming.product_path(&product.period, &product.name);
        let path = root.join(&rel);
        match writer.write(product, &path) {
            Ok(()) => {
                info!("Wrote {} {} -> {:?}", product.period, product.name, path);
                outcome.records.push(CatalogRecord {
                    id: naming.item_id(&product.period, &product.name),
                    product: product.name.clone(),
                    kind: product.kind(),
                    period: product.period.clone(),
                    start: product.start,
                    end: product.end,
                    asset_path: rel,
                    grid: product.grid,
                    bbox: footprint,
                    scene_ids: product.scene_ids.clone(),
                });
            }
            Err(e) => {
                error!("Failed to write {} {}: {}", product.period, product.name, e);
                outcome.failures.push(ArtifactFailure {
                    product: product.name.clone(),
                    period: product.period.clone(),
                    path,
                    error: e.to_string(),
                });
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::processing::pipeline::ProductPixels;
    use crate::error::Error;
    use crate::types::GridSpec;
    use chrono::{TimeZone, Utc};
    use ndarray::Array2;
    use std::sync::Mutex;

    struct Recording {
        written: Mutex<Vec<PathBuf>>,
        fail_on: &'static str,
    }

    impl ArtifactWriter for Recording {
        fn write(&self, product: &DerivedProduct, path: &Path) -> Result<()> {
            if product.name == self.fail_on {
                return Err(Error::Processing("disk full".into()));
            }
            self.written.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    fn product(name: &str) -> DerivedProduct {
        DerivedProduct {
            name: name.into(),
            pixels: ProductPixels::Index(Array2::zeros((1, 1))),
            grid: GridSpec {
                epsg: 32633,
                geotransform: [0.0, 10.0, 0.0, 0.0, 0.0, -10.0],
                width: 1,
                height: 1,
            },
            period: "2024-01".into(),
            start: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
            scene_ids: vec![],
        }
    }

    #[test]
    fn default_naming() {
        let n = PeriodDirectories;
        assert_eq!(n.product_path("2024-01", "ndvi"), PathBuf::from("2024-01/ndvi.tif"));
        assert_eq!(n.item_id("2024-01", "ndvi"), "ndvi-2024-01");
        let custom = |key: &str| PathBuf::from("mosaics").join(key.replace('-', "/"));
        assert_eq!(custom.product_path("2024-01", "ndvi"), PathBuf::from("mosaics/2024/01/ndvi.tif"));
    }

    #[test]
    fn failed_artifact_is_reported_and_run_continues() {
        let writer = Recording {
            written: Mutex::new(Vec::new()),
            fail_on: "ndvi",
        };
        let products = vec![product("ndvi"), product("ndwi")];
        let out = save_products(&products, Path::new("/out"), &PeriodDirectories, &writer, None);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].product, "ndvi");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].asset_path, PathBuf::from("2024-01/ndwi.tif"));
        assert_eq!(writer.written.lock().unwrap()[0], PathBuf::from("/out/2024-01/ndwi.tif"));
    }
}
