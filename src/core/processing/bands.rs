//! Band resolution: logical band names ("red", "nir") to the asset key that
//! carries the band in a given scene, driven purely by declared band metadata.
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{BandInfo, Scene};

/// Asset key, band position and declared metadata for one resolved band
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBand {
    pub logical: String,
    pub asset_key: String,
    /// 1-based band number inside the asset
    pub band_index: usize,
    pub info: BandInfo,
}

/// Find the asset declaring `logical_name` as a common name.
///
/// When several assets carry the band (e.g. `B03` and a 3-band `visual`), the one
/// with the fewest bands wins. Assets whose manifest carries no band metadata
/// never match: band names are never guessed from asset keys or pixel data.
pub fn resolve(scene: &Scene, logical_name: &str) -> Result<ResolvedBand> {
    let found = scene
        .assets
        .iter()
        .filter_map(|(key, asset)| {
            asset
                .band(logical_name)
                .map(|(index, info)| (key, asset.bands.len(), index, info))
        })
        .min_by_key(|(_, count, _, _)| *count);
    match found {
        Some((key, _, band_index, info)) => {
            debug!("{}: band {} -> asset {} band {}", scene.id, logical_name, key, band_index);
            Ok(ResolvedBand {
                logical: logical_name.to_ascii_lowercase(),
                asset_key: key.clone(),
                band_index,
                info: info.clone(),
            })
        }
        None => Err(Error::BandNotFound {
            scene: scene.id.clone(),
            band: logical_name.to_string(),
        }),
    }
}

/// Resolve every requested band for one scene, in request order
pub fn resolve_all(scene: &Scene, bands: &[String]) -> Result<Vec<ResolvedBand>> {
    bands.iter().map(|b| resolve(scene, b)).collect()
}

/// Resolve bands across a collection window.
///
/// A miss on the first scene is fatal (the requested band names are wrong for the
/// collection). Later scenes that cannot provide every band are dropped with a
/// warning so they cannot corrupt the per-band stacks.
pub fn resolve_window(
    scenes: Vec<Scene>,
    bands: &[String],
) -> Result<Vec<(Scene, Vec<ResolvedBand>)>> {
    let mut resolved = Vec::with_capacity(scenes.len());
    for (idx, scene) in scenes.into_iter().enumerate() {
        match resolve_all(&scene, bands) {
            Ok(r) => resolved.push((scene, r)),
            Err(e) if idx == 0 => return Err(e),
            Err(e) => warn!("Dropping scene {}: {}", scene.id, e),
        }
    }
    Ok(resolved)
}
