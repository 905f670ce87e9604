//! Temporal compositing: bucket the stack's time axis by a period key and reduce
//! each bucket to a per-pixel NaN-aware median.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::parallel::prelude::*;
use ndarray::{s, Array3, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::processing::stack::BandStack;
use crate::error::{Error, Result};
use crate::types::GridSpec;

/// How acquisition times map to period keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKey {
    /// `YYYY-MM`
    #[default]
    Monthly,
    /// Any chrono format string, e.g. `%Y` or `%G-W%V`
    Format(String),
}

impl PeriodKey {
    pub fn key(&self, t: &DateTime<Utc>) -> String {
        match self {
            PeriodKey::Monthly => monthly_key(t),
            PeriodKey::Format(fmt) => t.format(fmt).to_string(),
        }
    }
}

pub fn monthly_key(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m").to_string()
}

/// Time-slice indices falling into one period
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalBucket {
    pub key: String,
    pub indices: Vec<usize>,
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Partition `times` by `key_fn`; each index lands in exactly one bucket.
pub fn bucket_times<F>(times: &[DateTime<Utc>], key_fn: F) -> BTreeMap<String, TemporalBucket>
where
    F: Fn(&DateTime<Utc>) -> String,
{
    let mut buckets: BTreeMap<String, TemporalBucket> = BTreeMap::new();
    for (i, t) in times.iter().enumerate() {
        let key = key_fn(t);
        let bucket = buckets.entry(key.clone()).or_insert_with(|| TemporalBucket {
            key,
            indices: Vec::new(),
            timestamps: Vec::new(),
        });
        bucket.indices.push(i);
        bucket.timestamps.push(*t);
    }
    buckets
}

/// Median reduction of one temporal bucket
#[derive(Debug, Clone)]
pub struct Composite {
    pub key: String,
    pub bands: Vec<String>,
    /// `[band, y, x]`, NaN where every input was missing
    pub data: Array3<f32>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub scene_ids: Vec<String>,
    pub grid: GridSpec,
}

impl Composite {
    /// Earliest contributing acquisition
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().min().copied()
    }

    /// Latest contributing acquisition
    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.timestamps.iter().max().copied()
    }

    pub fn band(&self, name: &str) -> Result<ArrayView2<'_, f32>> {
        self.bands
            .iter()
            .position(|b| b.eq_ignore_ascii_case(name))
            .map(|i| self.data.index_axis(Axis(0), i))
            .ok_or_else(|| Error::BandNotFound {
                scene: format!("composite {}", self.key),
                band: name.to_string(),
            })
    }
}

/// Median of the non-NaN values at `indices` (mean of the two middle values for
/// even counts); NaN when none are valid.
pub fn nanmedian(lane: ArrayView1<'_, f32>, indices: &[usize], scratch: &mut Vec<f32>) -> f32 {
    scratch.clear();
    scratch.extend(indices.iter().map(|&i| lane[i]).filter(|v| !v.is_nan()));
    let n = scratch.len();
    if n == 0 {
        return f32::NAN;
    }
    let mid = n / 2;
    let (lower, upper, _) = scratch.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let below = lower.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (below + upper) / 2.0
    }
}

/// Reduce every temporal bucket of `stack` to its per-pixel median.
pub fn composite<F>(stack: &BandStack, key_fn: F) -> BTreeMap<String, Composite>
where
    F: Fn(&DateTime<Utc>) -> String,
{
    let (_, bands, rows, cols) = stack.data.dim();
    bucket_times(&stack.times, key_fn)
        .into_values()
        .map(|bucket| {
            let mut data = Array3::<f32>::from_elem((bands, rows, cols), f32::NAN);
            for b in 0..bands {
                let series = stack.data.slice(s![.., b, .., ..]);
                // One scratch buffer per worker, reused across its rows
                data.index_axis_mut(Axis(0), b)
                    .axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .zip(series.axis_iter(Axis(1)).into_par_iter())
                    .for_each_init(
                        || Vec::with_capacity(bucket.indices.len()),
                        |scratch, (out_row, in_row)| {
                            Zip::from(out_row)
                                .and(in_row.columns())
                                .for_each(|out, lane| *out = nanmedian(lane, &bucket.indices, scratch));
                        },
                    );
            }
            info!(
                "Composite {}: {} scene(s), {} band(s)",
                bucket.key,
                bucket.indices.len(),
                bands
            );
            let composite = Composite {
                key: bucket.key.clone(),
                bands: stack.bands.clone(),
                data,
                scene_ids: bucket
                    .indices
                    .iter()
                    .map(|&i| stack.scene_ids[i].clone())
                    .collect(),
                timestamps: bucket.timestamps,
                grid: stack.grid,
            };
            (bucket.key, composite)
        })
        .collect()
}
