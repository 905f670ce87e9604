pub mod catalog;
pub mod tiff;
