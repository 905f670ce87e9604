//! Core building blocks: run configuration, execution pool sizing and the
//! processing stages (band resolution, chunking, stacking, compositing,
//! band algebra and artifact saving) consumed by the high-level `api` module.
pub mod cluster;
pub mod params;
pub mod processing;
