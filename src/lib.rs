//! rastermill: batch normalization of geospatial rasters
//!
//! Brings directories of heterogeneous rasters (GeoTIFF, Erdas Imagine, ENVI,
//! HDF and NetCDF containers) onto one coordinate reference system, pixel size
//! and output format, one item at a time, with per-item outcome reporting.
//! GDAL does the projection math, resampling and format I/O.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, ErrorKind, GeoTransform, GridData, OutputFormat, PixelKind, PixelSize,
    RasterDescriptor, RasterError, RasterResult, ResamplingMethod, SubResourceRef,
    SubResourceSelector, TargetDefinition,
};

pub use io::{GdalEngine, OutputWriter, RasterEngine, RasterHandle, RasterSource, TargetGrid};

pub use crate::core::{
    BandMapping, BatchConfig, BatchOrchestrator, BatchOutcome, BatchReport, ContainerExpander,
    ContainerParams, GridTransformer, IndexSet, ItemStatus, ReprojectParams,
    SpatialReferenceResolver, VariableParams,
};
