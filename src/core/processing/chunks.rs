//! Chunk planning for the time × band × y × x stack.
use serde::{Deserialize, Serialize};

/// How a non-spatial axis is chunked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisChunking {
    Whole,
    Fixed(usize),
}

impl AxisChunking {
    fn chunk(&self, dim: usize) -> usize {
        let dim = dim.max(1);
        match *self {
            AxisChunking::Whole => dim,
            AxisChunking::Fixed(n) => n.clamp(1, dim),
        }
    }
}

/// Bounds for the spatial chunk heuristic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPolicy {
    /// Lower bound to keep scheduling overhead down
    pub min_spatial: usize,
    /// Upper bound to cap peak memory per task
    pub max_spatial: usize,
    /// Target number of chunks per spatial axis
    pub divisions: usize,
    pub time: AxisChunking,
    pub band: AxisChunking,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            min_spatial: 512,
            max_spatial: 4096,
            divisions: 4,
            time: AxisChunking::Fixed(1),
            band: AxisChunking::Fixed(1),
        }
    }
}

/// Chunk extent per axis `[time, band, y, x]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkShape {
    pub time: usize,
    pub band: usize,
    pub y: usize,
    pub x: usize,
}

/// Spatial read window in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl ChunkPolicy {
    fn spatial(&self, dim: usize) -> usize {
        let target = dim / self.divisions.max(1);
        let lo = self.min_spatial.max(1);
        let hi = self.max_spatial.max(lo);
        target.clamp(lo, hi).min(dim.max(1))
    }

    /// Choose a chunk shape for a `[time, band, y, x]` array.
    ///
    /// Heuristic only: every returned extent is at least 1 and at most the
    /// corresponding dimension (1 for empty dimensions).
    pub fn plan(&self, shape: [usize; 4]) -> ChunkShape {
        let [t, b, y, x] = shape;
        ChunkShape {
            time: self.time.chunk(t),
            band: self.band.chunk(b),
            y: self.spatial(y),
            x: self.spatial(x),
        }
    }
}

impl ChunkShape {
    /// Row-major spatial windows covering a `rows × cols` grid
    pub fn windows(&self, rows: usize, cols: usize) -> Vec<Window> {
        let mut out = Vec::new();
        let mut row = 0;
        while row < rows {
            let h = self.y.min(rows - row);
            let mut col = 0;
            while col < cols {
                let w = self.x.min(cols - col);
                out.push(Window {
                    row,
                    col,
                    rows: h,
                    cols: w,
                });
                col += w;
            }
            row += h;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spatial_chunks_clamp_to_bounds() {
        let p = ChunkPolicy::default();
        // 10980 / 4 = 2745 lies inside [512, 4096]
        assert_eq!(p.plan([3, 4, 10980, 10980]).y, 2745);
        // 40000 / 4 = 10000 is capped
        assert_eq!(p.plan([1, 1, 40000, 40000]).x, 4096);
        // 1000 / 4 = 250 is raised to the minimum
        assert_eq!(p.plan([1, 1, 1000, 1000]).y, 512);
    }

    #[test]
    fn chunks_never_exceed_dimension_or_hit_zero() {
        let p = ChunkPolicy::default();
        let c = p.plan([0, 0, 100, 0]);
        assert_eq!(c.y, 100);
        assert_eq!(c.x, 1);
        assert_eq!(c.time, 1);
        assert_eq!(c.band, 1);
    }

    #[test]
    fn axis_policy_whole_and_fixed() {
        let p = ChunkPolicy {
            time: AxisChunking::Whole,
            band: AxisChunking::Fixed(8),
            ..Default::default()
        };
        let c = p.plan([12, 3, 600, 600]);
        assert_eq!(c.time, 12);
        assert_eq!(c.band, 3);
    }

    #[test]
    fn windows_cover_grid_exactly() {
        let shape = ChunkShape {
            time: 1,
            band: 1,
            y: 512,
            x: 512,
        };
        let wins = shape.windows(1100, 600);
        assert_eq!(wins.len(), 6);
        let area: usize = wins.iter().map(|w| w.rows * w.cols).sum();
        assert_eq!(area, 1100 * 600);
        let last = wins.last().unwrap();
        assert_eq!((last.row, last.col, last.rows, last.cols), (1024, 512, 76, 88));
    }
}
