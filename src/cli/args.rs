use clap::Parser;
use std::path::PathBuf;

use chrono::NaiveDate;
use cloudmosaic::types::{BoundingBox, WarpResampling};

use super::errors::AppError;

#[derive(Parser)]
#[command(name = "cloudmosaic", version, about = "Cloud-free periodic mosaics from STAC imagery")]
pub struct CliArgs {
    /// First acquisition day (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last acquisition day (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Process one STAC item by URL instead of searching a date window
    #[arg(long, conflicts_with_all = ["start_date", "end_date"])]
    pub item_url: Option<String>,

    /// Area of interest as minx,miny,maxx,maxy in WGS84
    #[arg(long, allow_hyphen_values = true)]
    pub aoi: Option<BoundingBox>,

    /// Band common name to stack; repeat for several (e.g. --bands red --bands nir)
    #[arg(long = "bands", value_delimiter = ',')]
    pub bands: Vec<String>,

    /// STAC collection id
    #[arg(long)]
    pub collection: Option<String>,

    /// Output pixel size in CRS units
    #[arg(long)]
    pub resolution: Option<f64>,

    /// Stop after this many scenes
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Maximum scene cloud cover in percent
    #[arg(long)]
    pub max_cloud_cover: Option<f64>,

    /// STAC endpoint: "pc" (Planetary Computer), "es" (Earth Search) or a URL
    #[arg(long)]
    pub catalog: Option<String>,

    /// Output CRS (e.g. EPSG:32633 or 32633); first scene's projection by default
    #[arg(long, value_parser = parse_epsg_arg)]
    pub crs: Option<u32>,

    /// Reprojection resampling
    #[arg(long, value_enum)]
    pub resampling: Option<WarpResampling>,

    /// Root directory for rasters and the STAC catalog
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// JSON pipeline config; flags given on the command line override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Tone operators for color composites (e.g. "gamma b 1.85, gamma rg 1.95")
    #[arg(long)]
    pub color_ops: Option<String>,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}

/// Accepts `EPSG:<code>` (any case) or a bare code.
pub fn parse_epsg_arg(s: &str) -> Result<u32, AppError> {
    let code = s.trim();
    let code = code
        .get(..5)
        .filter(|p| p.eq_ignore_ascii_case("epsg:"))
        .map_or(code, |_| &code[5..]);
    match code.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(AppError::InvalidCrs { crs: s.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crs_forms() {
        assert_eq!(parse_epsg_arg("EPSG:32633").unwrap(), 32633);
        assert_eq!(parse_epsg_arg("epsg:4326").unwrap(), 4326);
        assert_eq!(parse_epsg_arg("3857").unwrap(), 3857);
        assert!(parse_epsg_arg("EPSG:").is_err());
        assert!(parse_epsg_arg("utm33").is_err());
    }

    #[test]
    fn item_url_excludes_date_window() {
        let args = CliArgs::try_parse_from([
            "cloudmosaic",
            "--item-url",
            "https://example.com/items/S2B_32TNR_20240105",
        ])
        .unwrap();
        assert!(args.item_url.is_some());
        assert!(CliArgs::try_parse_from([
            "cloudmosaic",
            "--item-url",
            "https://example.com/items/x",
            "--start-date",
            "2024-01-01",
        ])
        .is_err());
    }

    #[test]
    fn parses_full_command_line() {
        let args = CliArgs::try_parse_from([
            "cloudmosaic",
            "--start-date",
            "2024-01-01",
            "--end-date",
            "2024-02-29",
            "--aoi",
            "-0.5,51.2,0.3,51.7",
            "--bands",
            "red",
            "--bands",
            "nir",
            "--crs",
            "EPSG:32630",
            "--max-cloud-cover",
            "20",
        ])
        .unwrap();
        assert_eq!(args.bands, vec!["red", "nir"]);
        assert_eq!(args.crs, Some(32630));
        assert_eq!(args.aoi.unwrap().west, -0.5);
        assert_eq!(args.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn rejects_malformed_bbox() {
        assert!(CliArgs::try_parse_from(["cloudmosaic", "--aoi", "1,2,3"]).is_err());
    }
}
