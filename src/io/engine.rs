//! Contract between the pipeline and the geospatial raster engine.
//!
//! The pipeline never does projection math or resampling itself. Everything
//! that touches a CRS or a file format goes through these two traits, and
//! [`GdalEngine`](crate::io::GdalEngine) is the production implementation.

use crate::types::{
    BoundingBox, GeoTransform, GridData, OutputFormat, RasterDescriptor, RasterResult,
    ResamplingMethod, SubResourceRef,
};
use std::path::Path;

/// Fully specified output grid for one warp
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    pub crs: String,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

/// An open raster. Dropping it releases every engine resource it holds.
pub trait RasterSource {
    fn descriptor(&self) -> &RasterDescriptor;

    /// Full extent of every band at native precision
    fn read_grid(&self) -> RasterResult<GridData>;

    /// Named members of a container, in container order; empty for flat rasters
    fn sub_resources(&self) -> RasterResult<Vec<SubResourceRef>>;

    /// Values of a 1-D coordinate variable, if the source exposes one
    fn coordinate_values(&self, name: &str) -> RasterResult<Option<Vec<f64>>>;
}

/// Geospatial raster engine capability
pub trait RasterEngine: Send + Sync {
    /// Open a file or an engine connection string. Failures are `Unreadable`.
    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterSource>>;

    /// Open one member of a container
    fn open_sub_resource(&self, sub: &SubResourceRef) -> RasterResult<Box<dyn RasterSource>> {
        self.open(Path::new(&sub.name))
    }

    /// Transform an extent between two CRS definitions. Failures are `TransformError`.
    fn transform_bounds(
        &self,
        bounds: &BoundingBox,
        source_crs: &str,
        target_crs: &str,
    ) -> RasterResult<BoundingBox>;

    /// Resample `grid` onto `target`. Cells without source coverage take `fill`.
    fn warp(
        &self,
        source: &RasterDescriptor,
        grid: &GridData,
        target: &TargetGrid,
        resampling: ResamplingMethod,
        fill: f64,
    ) -> RasterResult<GridData>;

    /// Create `path` in `format` and write every band of `grid`. Failures are `WriteError`.
    fn write(
        &self,
        path: &Path,
        descriptor: &RasterDescriptor,
        grid: &GridData,
        format: OutputFormat,
    ) -> RasterResult<()>;
}
