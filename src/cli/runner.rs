use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cloudmosaic::api::{run_pipeline, RunReport};
use cloudmosaic::core::cluster::pool_from_env;
use cloudmosaic::PipelineConfig;

use super::args::CliArgs;
use super::errors::AppError;

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Start from `--config` (or defaults) and apply every flag given on the command line.
pub fn build_config(args: &CliArgs) -> Result<PipelineConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading pipeline config from {:?}", path);
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };
    if args.start_date.is_some() {
        config.start_date = args.start_date;
    }
    if args.end_date.is_some() {
        config.end_date = args.end_date;
    }
    if args.item_url.is_some() {
        config.item_url = args.item_url.clone();
    }
    if args.aoi.is_some() {
        config.aoi = args.aoi;
    }
    if !args.bands.is_empty() {
        config.bands = args.bands.iter().map(|b| b.trim().to_ascii_lowercase()).collect();
    }
    if let Some(c) = &args.collection {
        config.collection = c.clone();
    }
    if let Some(r) = args.resolution {
        config.resolution = r;
    }
    if args.max_items.is_some() {
        config.max_items = args.max_items;
    }
    if args.max_cloud_cover.is_some() {
        config.max_cloud_cover = args.max_cloud_cover;
    }
    if let Some(endpoint) = &args.catalog {
        config.catalog.endpoint = endpoint.clone();
    }
    if args.crs.is_some() {
        config.crs = args.crs;
    }
    if let Some(r) = args.resampling {
        config.resampling = r;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(ops) = &args.color_ops {
        config.color_ops = ops.clone();
    }
    config.validate()?;
    Ok(config)
}

fn log_report(report: &RunReport) {
    info!("Periods processed: {}", report.buckets.join(", "));
    info!("Artifacts written: {}", report.written);
    for f in &report.failed {
        warn!("Failed: {} {} -> {:?}: {}", f.period, f.product, f.path, f.error);
    }
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.log);

    let config = build_config(&args)?;
    info!(
        "Compositing {} [{}] over {} from {:?} to {:?}",
        config.collection,
        config.bands.join(", "),
        config.aoi.map(|a| a.to_string()).unwrap_or_default(),
        config.start_date,
        config.end_date
    );

    let report = match pool_from_env()? {
        Some(pool) => pool.install(|| run_pipeline(&config)),
        None => run_pipeline(&config),
    }
    .map_err(AppError::from)?;

    log_report(&report);
    if !report.is_success() {
        error!("{} artifact(s) failed", report.failed.len());
        return Err(AppError::ArtifactsFailed {
            failed: report.failed.len(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"version": 1, "aoi": {"west": 10, "south": 45, "east": 11, "north": 46},
                "start_date": "2024-01-01", "end_date": "2024-03-31",
                "bands": ["red", "green", "blue"], "resolution": 20}"#,
        )
        .unwrap();
        let args = CliArgs::try_parse_from([
            "cloudmosaic",
            "--config",
            path.to_str().unwrap(),
            "--end-date",
            "2024-01-31",
            "--bands",
            "NIR",
            "--bands",
            "red",
        ])
        .unwrap();
        let config = build_config(&args).unwrap();
        assert_eq!(config.resolution, 20.0);
        assert_eq!(config.end_date, chrono::NaiveDate::from_ymd_opt(2024, 1, 31));
        assert_eq!(config.bands, vec!["nir", "red"]);
    }

    #[test]
    fn single_item_config_needs_no_window() {
        let args = CliArgs::try_parse_from([
            "cloudmosaic",
            "--item-url",
            "https://example.com/items/S2B_32TNR_20240105",
            "--bands",
            "red,nir",
        ])
        .unwrap();
        let config = build_config(&args).unwrap();
        assert_eq!(config.item_url.as_deref(), Some("https://example.com/items/S2B_32TNR_20240105"));
        assert!(config.start_date.is_none());
    }

    #[test]
    fn invalid_window_is_rejected_before_running() {
        let args = CliArgs::try_parse_from([
            "cloudmosaic",
            "--aoi",
            "10,45,11,46",
            "--start-date",
            "2024-02-01",
            "--end-date",
            "2024-01-01",
        ])
        .unwrap();
        assert!(matches!(build_config(&args), Err(AppError::Pipeline(e)) if e.is_configuration()));
    }
}
