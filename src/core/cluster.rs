//! Execution pool sizing.
//!
//! `CLOUDMOSAIC_CLUSTER` holds either a worker count or the path of a JSON
//! cluster spec; without it rayon's default pool size is used.
use std::path::Path;

use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

pub const CLUSTER_ENV: &str = "CLOUDMOSAIC_CLUSTER";

/// Resource limits used to derive the worker count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub max_cores: usize,
    /// Gigabytes
    pub max_ram: f64,
    pub worker_cores_limit: usize,
    /// Gigabytes per worker
    pub worker_memory: f64,
}

impl ClusterSpec {
    /// `min(max_cores / worker_cores_limit, max_ram / worker_memory)`, at least 1
    pub fn workers(&self) -> usize {
        let by_cores = self.max_cores / self.worker_cores_limit.max(1);
        let by_ram = if self.worker_memory > 0.0 {
            (self.max_ram / self.worker_memory).floor().max(0.0) as usize
        } else {
            by_cores
        };
        by_cores.min(by_ram).max(1)
    }
}

/// Worker count from an env value: an integer or a JSON spec path
pub fn workers_from_value(value: &str) -> Result<usize> {
    let value = value.trim();
    if let Ok(n) = value.parse::<usize>() {
        if n == 0 {
            return Err(Error::InvalidArgument {
                arg: "CLOUDMOSAIC_CLUSTER",
                value: value.to_string(),
            });
        }
        return Ok(n);
    }
    let text = std::fs::read_to_string(Path::new(value)).map_err(|_| Error::InvalidArgument {
        arg: "CLOUDMOSAIC_CLUSTER",
        value: value.to_string(),
    })?;
    let spec: ClusterSpec = serde_json::from_str(&text)?;
    Ok(spec.workers())
}

/// Build the execution pool from `CLOUDMOSAIC_CLUSTER`, if set.
pub fn pool_from_env() -> Result<Option<ThreadPool>> {
    match std::env::var(CLUSTER_ENV) {
        Ok(v) if !v.trim().is_empty() => build_pool(workers_from_value(&v)?).map(Some),
        _ => Ok(None),
    }
}

pub fn build_pool(workers: usize) -> Result<ThreadPool> {
    info!("Scaling execution pool to {} workers", workers);
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("cloudmosaic-worker-{}", i))
        .build()
        .map_err(Error::external)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_limited_by_scarcer_resource() {
        let spec = ClusterSpec {
            max_cores: 64,
            max_ram: 128.0,
            worker_cores_limit: 2,
            worker_memory: 8.0,
        };
        assert_eq!(spec.workers(), 16);
        let tiny = ClusterSpec {
            max_cores: 1,
            max_ram: 1.0,
            worker_cores_limit: 4,
            worker_memory: 8.0,
        };
        assert_eq!(tiny.workers(), 1);
    }

    #[test]
    fn env_value_count_or_spec_file() {
        assert_eq!(workers_from_value("6").unwrap(), 6);
        assert!(workers_from_value("0").is_err());
        assert!(workers_from_value("/nonexistent/spec.json").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.json");
        std::fs::write(
            &path,
            r#"{"max_cores": 16, "max_ram": 32, "worker_cores_limit": 4, "worker_memory": 4}"#,
        )
        .unwrap();
        assert_eq!(workers_from_value(path.to_str().unwrap()).unwrap(), 4);
    }

    #[test]
    fn pool_has_requested_size() {
        let pool = build_pool(3).unwrap();
        assert_eq!(pool.current_num_threads(), 3);
    }
}
