//! Raster I/O: engine contract, GDAL backend, handles and output writing

pub mod engine;
pub mod gdal_engine;
pub mod handle;
pub mod writer;

pub use engine::{RasterEngine, RasterSource, TargetGrid};
pub use gdal_engine::GdalEngine;
pub use handle::RasterHandle;
pub use writer::{output_kind, OutputWriter, StagedOutput};
