//! Lazy time × band × y × x stack over all scenes of a collection window.
//!
//! A `LazyStack` only describes where each (scene, band) plane comes from and how
//! its raw values are masked and scaled. Nothing is read until `materialize()`,
//! the single forced-evaluation boundary, which reads every chunk window in
//! parallel and pins the result as a read-only `BandStack`.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, Array4, ArrayViewMut2, Axis};
use tracing::{debug, info};

use crate::core::processing::bands::ResolvedBand;
use crate::core::processing::chunks::{ChunkPolicy, ChunkShape, Window};
use crate::error::{Error, Result};
use crate::types::{GridSpec, Scene, WGS84_EPSG};

/// Anything that can serve pixel windows on a known grid
pub trait RasterSource: Send + Sync {
    fn grid(&self) -> &GridSpec;

    /// Raw (unmasked, unscaled) values for `window`, shaped `(rows, cols)`
    fn read_window(&self, window: Window) -> Result<Array2<f32>>;

    fn describe(&self) -> String;
}

/// Opens per-(scene, band) sources on the run's common grid
pub trait SourceProvider {
    fn open(&self, scene: &Scene, band: &ResolvedBand) -> Result<Arc<dyn RasterSource>>;
}

/// A fully in-memory source
#[derive(Debug, Clone)]
pub struct MemorySource {
    pub name: String,
    pub grid: GridSpec,
    pub data: Array2<f32>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, grid: GridSpec, data: Array2<f32>) -> Result<Self> {
        grid.ensure_shape(data.nrows(), data.ncols())?;
        Ok(Self {
            name: name.into(),
            grid,
            data,
        })
    }
}

impl RasterSource for MemorySource {
    fn grid(&self) -> &GridSpec {
        &self.grid
    }

    fn read_window(&self, w: Window) -> Result<Array2<f32>> {
        Ok(self
            .data
            .slice(s![w.row..w.row + w.rows, w.col..w.col + w.cols])
            .to_owned())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}

/// Raw-value masking and scaling for one band plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandScaling {
    pub nodata: Option<f64>,
    pub scale: f64,
    pub offset: f64,
}

impl Default for BandScaling {
    fn default() -> Self {
        Self {
            nodata: None,
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl BandScaling {
    /// Declared scale/offset from band metadata, `default_scale` when undeclared
    pub fn from_band(band: &ResolvedBand, default_scale: f64) -> Self {
        Self {
            nodata: band.info.nodata,
            scale: band.info.scale.unwrap_or(default_scale),
            offset: band.info.offset.unwrap_or(0.0),
        }
    }

    /// Nodata and non-finite raw values become NaN; the rest are scaled and any
    /// non-positive reflectance is masked as well.
    #[inline]
    pub fn apply(&self, raw: f32) -> f32 {
        if !raw.is_finite() || self.nodata.is_some_and(|nd| raw as f64 == nd) {
            return f32::NAN;
        }
        let reflectance = raw as f64 * self.scale + self.offset;
        if reflectance > 0.0 {
            reflectance as f32
        } else {
            f32::NAN
        }
    }
}

/// One acquisition's band planes, in stack band order
#[derive(Clone)]
pub struct StackLayer {
    pub scene_id: String,
    pub datetime: DateTime<Utc>,
    pub planes: Vec<(Arc<dyn RasterSource>, BandScaling)>,
}

/// Deferred time × band × y × x stack
pub struct LazyStack {
    grid: GridSpec,
    bands: Vec<String>,
    layers: Vec<StackLayer>,
    chunks: ChunkShape,
}

impl LazyStack {
    /// Sort layers by acquisition time and check every plane against `grid`.
    pub fn new(
        grid: GridSpec,
        bands: Vec<String>,
        mut layers: Vec<StackLayer>,
        policy: &ChunkPolicy,
    ) -> Result<Self> {
        for layer in &layers {
            if layer.planes.len() != bands.len() {
                return Err(Error::Processing(format!(
                    "scene {} has {} band planes, expected {}",
                    layer.scene_id,
                    layer.planes.len(),
                    bands.len()
                )));
            }
            for (source, _) in &layer.planes {
                grid.ensure_matches(source.grid())?;
            }
        }
        layers.sort_by(|a, b| a.datetime.cmp(&b.datetime));
        let chunks = policy.plan([layers.len(), bands.len(), grid.height, grid.width]);
        Ok(Self {
            grid,
            bands,
            layers,
            chunks,
        })
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    /// `[time, band, y, x]`
    pub fn shape(&self) -> [usize; 4] {
        [
            self.layers.len(),
            self.bands.len(),
            self.grid.height,
            self.grid.width,
        ]
    }

    /// Force evaluation of every chunk and pin the stack in memory.
    ///
    /// Time and band chunks are the parallel tasks; inside a task each plane's
    /// spatial windows are read in parallel.
    pub fn materialize(&self) -> Result<BandStack> {
        let [t, b, rows, cols] = self.shape();
        let chunks = self.chunks;
        let windows = chunks.windows(rows, cols);
        info!(
            "Materializing stack {}x{}x{}x{} in chunks of {}x{}x{}x{} ({} windows per plane)",
            t,
            b,
            rows,
            cols,
            chunks.time,
            chunks.band,
            chunks.y,
            chunks.x,
            windows.len()
        );
        let bytes = t * b * rows * cols * std::mem::size_of::<f32>();
        info!("Memory usage (approx): {:.2} MB", bytes as f64 / 1024.0 / 1024.0);

        let mut data = Array4::<f32>::from_elem((t, b, rows, cols), f32::NAN);
        data.axis_chunks_iter_mut(Axis(0), chunks.time)
            .into_par_iter()
            .enumerate()
            .try_for_each(|(tc, mut time_block)| -> Result<()> {
                let t0 = tc * chunks.time;
                time_block
                    .axis_chunks_iter_mut(Axis(1), chunks.band)
                    .into_par_iter()
                    .enumerate()
                    .try_for_each(|(bc, mut block)| -> Result<()> {
                        let b0 = bc * chunks.band;
                        for (dt, mut per_band) in block.outer_iter_mut().enumerate() {
                            let layer = &self.layers[t0 + dt];
                            for (db, plane) in per_band.outer_iter_mut().enumerate() {
                                let bi = b0 + db;
                                let (source, scaling) = &layer.planes[bi];
                                load_plane(source.as_ref(), scaling, &windows, plane)?;
                                debug!(
                                    "Loaded {} band {} ({})",
                                    layer.scene_id,
                                    self.bands[bi],
                                    source.describe()
                                );
                            }
                        }
                        Ok(())
                    })
            })?;

        Ok(BandStack {
            grid: self.grid,
            bands: self.bands.clone(),
            times: self.layers.iter().map(|l| l.datetime).collect(),
            scene_ids: self.layers.iter().map(|l| l.scene_id.clone()).collect(),
            data,
        })
    }
}

/// Read every window of one plane and store masked, scaled values.
fn load_plane(
    source: &dyn RasterSource,
    scaling: &BandScaling,
    windows: &[Window],
    mut plane: ArrayViewMut2<'_, f32>,
) -> Result<()> {
    let blocks = windows
        .par_iter()
        .map(|w| source.read_window(*w).map(|a| (*w, a)))
        .collect::<Result<Vec<_>>>()?;
    for (w, block) in blocks {
        if block.dim() != (w.rows, w.cols) {
            return Err(Error::GridMismatch {
                expected: format!("{}x{} window", w.cols, w.rows),
                actual: format!("{}x{} from {}", block.ncols(), block.nrows(), source.describe()),
            });
        }
        plane
            .slice_mut(s![w.row..w.row + w.rows, w.col..w.col + w.cols])
            .zip_mut_with(&block, |dst, &raw| *dst = scaling.apply(raw));
    }
    Ok(())
}

/// Materialized, read-only stack
#[derive(Debug, Clone)]
pub struct BandStack {
    pub grid: GridSpec,
    pub bands: Vec<String>,
    /// Ascending acquisition times, one per time slice
    pub times: Vec<DateTime<Utc>>,
    pub scene_ids: Vec<String>,
    /// `[time, band, y, x]`, NaN where missing
    pub data: Array4<f32>,
}

/// Target CRS: explicit, else the first scene declaring a projection, else WGS84.
pub fn resolve_crs(explicit: Option<u32>, scenes: &[Scene]) -> u32 {
    explicit
        .or_else(|| scenes.iter().find_map(|s| s.epsg))
        .unwrap_or(WGS84_EPSG)
}

/// Build the lazy stack: open one source per (scene, band) via `provider`.
///
/// The first opened source fixes the common grid; every other source is
/// checked against it.
pub fn stack(
    resolved: &[(Scene, Vec<ResolvedBand>)],
    bands: &[String],
    default_scale: f64,
    policy: &ChunkPolicy,
    provider: &dyn SourceProvider,
) -> Result<LazyStack> {
    let mut grid: Option<GridSpec> = None;
    let mut layers = Vec::with_capacity(resolved.len());
    for (scene, scene_bands) in resolved {
        let mut planes = Vec::with_capacity(scene_bands.len());
        for band in scene_bands {
            let source = provider.open(scene, band)?;
            match &grid {
                Some(g) => g.ensure_matches(source.grid())?,
                None => grid = Some(*source.grid()),
            }
            planes.push((source, BandScaling::from_band(band, default_scale)));
        }
        layers.push(StackLayer {
            scene_id: scene.id.clone(),
            datetime: scene.datetime,
            planes,
        });
    }
    let grid = grid.ok_or_else(|| Error::Processing("cannot stack an empty collection window".into()))?;
    LazyStack::new(grid, bands.to_vec(), layers, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::processing::chunks::AxisChunking;
    use chrono::TimeZone;
    use ndarray::array;

    fn grid(w: usize, h: usize) -> GridSpec {
        GridSpec {
            epsg: 32633,
            geotransform: [0.0, 10.0, 0.0, 0.0, 0.0, -10.0],
            width: w,
            height: h,
        }
    }

    fn layer(id: &str, day: u32, data: Array2<f32>, scaling: BandScaling) -> StackLayer {
        let g = grid(data.ncols(), data.nrows());
        StackLayer {
            scene_id: id.into(),
            datetime: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            planes: vec![(Arc::new(MemorySource::new(id, g, data).unwrap()), scaling)],
        }
    }

    #[test]
    fn scaling_masks_sentinels() {
        let s = BandScaling {
            nodata: Some(65535.0),
            scale: 0.0001,
            offset: 0.0,
        };
        assert!(s.apply(0.0).is_nan());
        assert!(s.apply(-5.0).is_nan());
        assert!(s.apply(65535.0).is_nan());
        assert!(s.apply(f32::NAN).is_nan());
        assert!((s.apply(5000.0) - 0.5).abs() < 1e-6);

        // Earth Search style: raw values below 1000 land under zero after the offset
        let offset = BandScaling {
            nodata: Some(0.0),
            scale: 0.0001,
            offset: -0.1,
        };
        assert!(offset.apply(0.0).is_nan());
        assert!(offset.apply(500.0).is_nan());
        assert!(offset.apply(999.0).is_nan());
        assert!(offset.apply(1.0).is_nan());
        assert!((offset.apply(6000.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn materialize_sorts_by_time_and_masks() {
        let late = layer("late", 20, array![[2.0, 0.0], [2.0, 2.0]], BandScaling::default());
        let early = layer("early", 5, array![[1.0, 1.0], [-1.0, 1.0]], BandScaling::default());
        let policy = ChunkPolicy {
            min_spatial: 1,
            ..Default::default()
        };
        let lazy = LazyStack::new(grid(2, 2), vec!["red".into()], vec![late, early], &policy).unwrap();
        assert_eq!(lazy.shape(), [2, 1, 2, 2]);
        let stack = lazy.materialize().unwrap();
        assert_eq!(stack.scene_ids, vec!["early", "late"]);
        assert_eq!(stack.data[[0, 0, 0, 0]], 1.0);
        assert!(stack.data[[0, 0, 1, 0]].is_nan());
        assert!(stack.data[[1, 0, 0, 1]].is_nan());
        assert_eq!(stack.data[[1, 0, 1, 1]], 2.0);
    }

    #[test]
    fn time_and_band_chunks_cover_every_plane() {
        let two_bands = |id: &str, day: u32, red: f32, nir: f32| {
            let g = grid(3, 2);
            let plane = |v: f32| -> (Arc<dyn RasterSource>, BandScaling) {
                let data = Array2::from_elem((2, 3), v);
                (Arc::new(MemorySource::new(id, g, data).unwrap()), BandScaling::default())
            };
            StackLayer {
                scene_id: id.into(),
                datetime: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
                planes: vec![plane(red), plane(nir)],
            }
        };
        let layers = vec![
            two_bands("a", 1, 0.1, 0.2),
            two_bands("b", 2, 0.3, 0.4),
            two_bands("c", 3, 0.5, 0.6),
        ];
        let policy = ChunkPolicy {
            min_spatial: 1,
            time: AxisChunking::Fixed(2),
            band: AxisChunking::Whole,
            ..Default::default()
        };
        let lazy = LazyStack::new(grid(3, 2), vec!["red".into(), "nir".into()], layers, &policy).unwrap();
        let stack = lazy.materialize().unwrap();
        assert_eq!(stack.data.dim(), (3, 2, 2, 3));
        assert!(stack.data.iter().all(|v| !v.is_nan()));
        assert_eq!(stack.data[[2, 0, 1, 2]], 0.5);
        assert_eq!(stack.data[[2, 1, 0, 0]], 0.6);
        assert_eq!(stack.data[[1, 1, 1, 1]], 0.4);
    }

    #[test]
    fn mismatched_grid_is_rejected() {
        let a = layer("a", 1, Array2::from_elem((2, 2), 1.0), BandScaling::default());
        let b = layer("b", 2, Array2::from_elem((3, 2), 1.0), BandScaling::default());
        let res = LazyStack::new(grid(2, 2), vec!["red".into()], vec![a, b], &ChunkPolicy::default());
        assert!(matches!(res, Err(Error::GridMismatch { .. })));
    }

    #[test]
    fn crs_fallback_order() {
        let mut s = Scene {
            id: "x".into(),
            datetime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            cloud_cover: None,
            bbox: None,
            geometry: None,
            epsg: None,
            assets: Default::default(),
        };
        assert_eq!(resolve_crs(None, std::slice::from_ref(&s)), WGS84_EPSG);
        s.epsg = Some(32633);
        assert_eq!(resolve_crs(None, std::slice::from_ref(&s)), 32633);
        assert_eq!(resolve_crs(Some(3857), std::slice::from_ref(&s)), 3857);
    }
}
