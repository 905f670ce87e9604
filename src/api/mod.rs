//! High-level library API: search a collection window, build the lazy stack,
//! reduce it into per-period composites and write every derived product plus a
//! STAC catalog. Prefer these entrypoints over the low-level processing modules
//! when embedding cloudmosaic.
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::core::params::PipelineConfig;
use crate::core::processing::bands::resolve_window;
use crate::core::processing::composite::composite;
use crate::core::processing::pipeline::{derive_products, ProductSet};
use crate::core::processing::save::{
    save_products, ArtifactFailure, ArtifactWriter, GeoTiffWriter, NamingPolicy, PeriodDirectories,
};
use crate::core::processing::stack::{resolve_crs, stack, LazyStack, SourceProvider};
use crate::error::{Error, Result};
use crate::io::stac::{
    collect_scenes, fetch_scene, CatalogService, PagingOptions, StacCatalog, StacClient,
};
use crate::io::warp::{GdalWarpProvider, TargetGrid};
use crate::io::writers::catalog::{build_catalog, CatalogRecord, CatalogTree};
use crate::types::Scene;

/// Summary of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Period keys processed, in order
    pub buckets: Vec<String>,
    pub written: usize,
    pub failed: Vec<ArtifactFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Report plus the catalog describing every written artifact
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub report: RunReport,
    pub records: Vec<CatalogRecord>,
    pub catalog: CatalogTree,
}

/// Query the configured STAC endpoint for the run's scenes, or fetch the single
/// configured item.
pub fn search_scenes(config: &PipelineConfig) -> Result<Vec<Scene>> {
    let catalog = StacCatalog::from_str_or_url(&config.catalog.endpoint);
    let mut paging = config.catalog.paging();
    paging.sign_assets &= catalog.needs_signing();
    let client = StacClient::new(catalog, Duration::from_secs(config.catalog.timeout_secs))?;
    search_with(&client, config, &paging)
}

fn search_with(
    service: &dyn CatalogService,
    config: &PipelineConfig,
    paging: &PagingOptions,
) -> Result<Vec<Scene>> {
    if let Some(url) = &config.item_url {
        return Ok(vec![fetch_scene(service, url, paging)?]);
    }
    let query = config.search_query()?;
    let scenes = collect_scenes(service, &query, paging)?;
    info!(
        "Found {} scene(s) in {} between {} and {}",
        scenes.len(),
        query.collection,
        query.start.date_naive(),
        query.end.date_naive()
    );
    Ok(scenes)
}

/// Resolve bands and build the lazy stack over `scenes` with `provider`.
///
/// Returns `None` for an empty collection window.
pub fn build_stack_with(
    scenes: Vec<Scene>,
    config: &PipelineConfig,
    provider: &dyn SourceProvider,
) -> Result<Option<LazyStack>> {
    let resolved = resolve_window(scenes, &config.bands)?;
    if resolved.is_empty() {
        return Ok(None);
    }
    let lazy = stack(
        &resolved,
        &config.bands,
        config.default_scale,
        &config.chunks,
        provider,
    )?;
    info!(
        "Stacked {} scene(s) x bands {:?} on {}",
        resolved.len(),
        lazy.bands(),
        lazy.grid()
    );
    Ok(Some(lazy))
}

/// Build the lazy stack with every asset warped onto the run's target grid.
pub fn build_stack(scenes: Vec<Scene>, config: &PipelineConfig) -> Result<Option<LazyStack>> {
    if scenes.is_empty() {
        return Ok(None);
    }
    // A single-item run without an AOI covers the item's footprint
    let aoi = config
        .aoi
        .or_else(|| scenes.iter().find_map(|s| s.bbox))
        .ok_or_else(|| Error::MissingArgument { arg: "aoi".into() })?;
    let target = TargetGrid::new(aoi, resolve_crs(config.crs, &scenes), config.resolution)?;
    let provider = GdalWarpProvider::new(target, config.resampling)?;
    build_stack_with(scenes, config, &provider)
}

/// Materialize the stack, composite it per period and write every product under `root`.
///
/// A failed artifact is recorded in the report and left out of the catalog; the
/// remaining products and buckets are still written.
pub fn process_stack(
    lazy: &LazyStack,
    config: &PipelineConfig,
    root: &Path,
    naming: &dyn NamingPolicy,
    writer: &dyn ArtifactWriter,
) -> Result<RunOutput> {
    let products = ProductSet::from_config(config)?;
    if products.is_empty() {
        warn!("No product can be derived from bands {:?}", config.bands);
    }
    let materialized = lazy.materialize()?;
    let composites = composite(&materialized, |t| config.period.key(t));
    info!("Reduced {} scene(s) into {} period(s)", materialized.times.len(), composites.len());

    let mut output = RunOutput::default();
    for (key, bucket) in &composites {
        let derived = derive_products(bucket, &products)?;
        let saved = save_products(&derived, root, naming, writer, config.aoi);
        output.report.buckets.push(key.clone());
        output.report.written += saved.records.len();
        output.report.failed.extend(saved.failures);
        output.records.extend(saved.records);
    }
    output.catalog = build_catalog(
        &config.catalog_id,
        &format!("{} mosaics of {}", config.collection, config.bands.join(", ")),
        &output.records,
    )?;
    Ok(output)
}

/// Run the whole pipeline described by `config`, writing into `config.output_dir`.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunReport> {
    config.validate()?;
    let scenes = search_scenes(config)?;
    let writer = GeoTiffWriter {
        options: config.write.clone(),
    };
    run_scenes(scenes, config, &writer, |scenes| build_stack(scenes, config))
}

fn run_scenes<B>(
    scenes: Vec<Scene>,
    config: &PipelineConfig,
    writer: &dyn ArtifactWriter,
    build: B,
) -> Result<RunReport>
where
    B: FnOnce(Vec<Scene>) -> Result<Option<LazyStack>>,
{
    std::fs::create_dir_all(&config.output_dir)?;
    let output = match build(scenes)? {
        Some(lazy) => process_stack(&lazy, config, &config.output_dir, &PeriodDirectories, writer)?,
        None => {
            warn!("Collection window is empty; nothing to composite");
            RunOutput {
                catalog: build_catalog(&config.catalog_id, "empty collection window", &[])?,
                ..Default::default()
            }
        }
    };
    output.catalog.save(&config.output_dir)?;
    info!(
        "Run finished: {} period(s), {} artifact(s) written, {} failed",
        output.report.buckets.len(),
        output.report.written,
        output.report.failed.len()
    );
    Ok(output.report)
}

/// Run against pre-fetched scenes with a caller-supplied source provider and writer.
pub fn run_with(
    scenes: Vec<Scene>,
    config: &PipelineConfig,
    provider: &dyn SourceProvider,
    writer: &dyn ArtifactWriter,
) -> Result<RunReport> {
    config.validate()?;
    run_scenes(scenes, config, writer, |scenes| build_stack_with(scenes, config, provider))
}
