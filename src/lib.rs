#![doc = r#"
cloudmosaic — cloud-free periodic mosaics from optical satellite archives.

Given an area of interest, a date window and a list of band common names, the
pipeline queries a STAC API for scenes, stacks every requested band lazily on a
common grid, reduces each calendar month (or any other period key) to a
per-pixel NaN-aware median and derives spectral indices and 8-bit color
composites from it. Every artifact is written as a tiled, compressed GeoTIFF
with overviews and described by a self-contained STAC catalog.

Requirements
------------
- GDAL development headers, runtime and the `gdalwarp` utility on `PATH`.
- Rust 2024 edition toolchain.

Quick start
-----------
```rust,no_run
use chrono::NaiveDate;
use cloudmosaic::{BoundingBox, PipelineConfig};

fn main() -> cloudmosaic::Result<()> {
    let config = PipelineConfig {
        aoi: Some(BoundingBox::new(10.1, 45.0, 10.5, 45.3)?),
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1),
        end_date: NaiveDate::from_ymd_opt(2024, 3, 31),
        bands: vec!["red".into(), "green".into(), "blue".into(), "nir".into()],
        crs: Some(32632),
        ..Default::default()
    };
    let report = cloudmosaic::run_pipeline(&config)?;
    println!("periods={:?} written={}", report.buckets, report.written);
    Ok(())
}
```

Bring your own rasters
----------------------
`api::run_with` takes already-fetched scenes and any `SourceProvider`, e.g.
in-memory arrays via `MemorySource`, and any `ArtifactWriter`.

Error handling
--------------
All public functions return `cloudmosaic::Result<T>`. `Error::is_configuration`
separates bad input (rejected before any compute) from runtime failures.

Useful modules
--------------
- [`api`] — high-level entry points.
- [`core`] — configuration, pool sizing and processing stages.
- [`io`] — STAC client, GDAL reading/warping and writers.
- [`types`] — scene, grid and product types.
- [`error`] — crate-level `Error` and `Result`.
"#]

pub mod api;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Types
pub use core::params::{CompositeSpec, IndexSpec, PipelineConfig};
pub use error::{Error, Result};
pub use types::{BoundingBox, GridSpec, ProductKind, Scene};

// Processing building blocks
pub use core::processing::composite::{Composite, PeriodKey};
pub use core::processing::stack::{BandStack, LazyStack, MemorySource, RasterSource, SourceProvider};
pub use core::processing::save::{ArtifactWriter, GeoTiffWriter, NamingPolicy, PeriodDirectories};

// Readers
pub use io::gdal::{GdalError, GdalMetadata, GdalRasterReader};

// High-level API re-exports
pub use api::{process_stack, run_pipeline, run_with, RunOutput, RunReport};
