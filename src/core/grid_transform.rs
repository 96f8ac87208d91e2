use crate::io::{RasterEngine, TargetGrid};
use crate::types::{
    BoundingBox, GeoTransform, GridData, RasterDescriptor, RasterError, RasterResult,
    ResamplingMethod, TargetDefinition,
};

/// Plans output grids and drives the engine's warp
#[derive(Clone, Copy)]
pub struct GridTransformer<'a> {
    engine: &'a dyn RasterEngine,
    resampling: ResamplingMethod,
}

impl<'a> GridTransformer<'a> {
    pub fn new(engine: &'a dyn RasterEngine, resampling: ResamplingMethod) -> Self {
        Self { engine, resampling }
    }

    /// Compute the output grid for `source` under `target`.
    ///
    /// The source extent is carried into the target CRS, and the dimensions
    /// follow from that extent and the target pixel size. Without a pixel size
    /// the source resolution is kept when the CRS does not change, and derived
    /// from the projected extent's diagonal otherwise.
    pub fn plan(&self, source: &RasterDescriptor, target: &TargetDefinition) -> RasterResult<TargetGrid> {
        source
            .validate()
            .map_err(|e| RasterError::TransformError(format!("Invalid source grid: {}", e)))?;
        if source.crs.trim().is_empty() {
            return Err(RasterError::TransformError(
                "source raster has no CRS".to_string(),
            ));
        }

        let target_crs = target.crs.clone().unwrap_or_else(|| source.crs.clone());
        let unchanged_crs = same_crs(&source.crs, &target_crs);

        let source_bounds = source.bounds();
        let bounds = if unchanged_crs {
            source_bounds
        } else {
            self.engine
                .transform_bounds(&source_bounds, &source.crs, &target_crs)?
        };

        let (pixel_width, pixel_height) = match target.pixel_size {
            Some(size) => (size.width(), size.height()),
            None if unchanged_crs => {
                let (x, y) = source.pixel_size();
                (x.abs(), -y.abs())
            }
            None => {
                let res = diagonal_resolution(&bounds, source.width, source.height);
                (res, -res)
            }
        };

        let width = cell_count(bounds.width(), pixel_width)?;
        let height = cell_count(bounds.height(), pixel_height.abs())?;

        let grid = TargetGrid {
            crs: target_crs,
            transform: GeoTransform {
                top_left_x: bounds.min_x,
                pixel_width,
                rotation_x: 0.0,
                top_left_y: bounds.max_y,
                rotation_y: 0.0,
                pixel_height,
            },
            width,
            height,
        };

        log::debug!(
            "Planned grid {}x{} at ({}, {}) origin ({}, {})",
            width,
            height,
            pixel_width,
            pixel_height,
            bounds.min_x,
            bounds.max_y
        );
        Ok(grid)
    }

    /// Warp `grid` onto the planned target grid
    pub fn reproject(
        &self,
        grid: GridData,
        source: &RasterDescriptor,
        target: &TargetDefinition,
    ) -> RasterResult<(RasterDescriptor, GridData)> {
        let planned = self.plan(source, target)?;
        let fill = source.fill_value();

        let descriptor = RasterDescriptor {
            width: planned.width,
            height: planned.height,
            band_count: grid.band_count(),
            transform: planned.transform,
            crs: planned.crs.clone(),
            pixel_kind: grid.kind(),
            nodata: Some(fill),
        };

        if is_same_grid(source, &planned) {
            log::debug!("Target grid equals source grid, no resampling");
            return Ok((descriptor, grid));
        }

        log::info!(
            "Reprojecting {}x{} -> {}x{} ({:?})",
            source.width,
            source.height,
            planned.width,
            planned.height,
            self.resampling
        );
        let warped = self
            .engine
            .warp(source, &grid, &planned, self.resampling, fill)?;

        if warped.rows() != planned.height
            || warped.cols() != planned.width
            || warped.band_count() != grid.band_count()
        {
            return Err(RasterError::TransformError(format!(
                "warp returned {}x{}x{}, expected {}x{}x{}",
                warped.band_count(),
                warped.rows(),
                warped.cols(),
                grid.band_count(),
                planned.height,
                planned.width
            )));
        }

        Ok((descriptor, GridData::new(grid.kind(), warped.into_values())))
    }
}

fn same_crs(a: &str, b: &str) -> bool {
    a.trim() == b.trim()
}

fn is_same_grid(source: &RasterDescriptor, planned: &TargetGrid) -> bool {
    same_crs(&source.crs, &planned.crs)
        && source.width == planned.width
        && source.height == planned.height
        && source.transform == planned.transform
}

/// Square resolution keeping roughly the source cell count along the diagonal
fn diagonal_resolution(bounds: &BoundingBox, width: usize, height: usize) -> f64 {
    let extent = (bounds.width().powi(2) + bounds.height().powi(2)).sqrt();
    let cells = ((width * width + height * height) as f64).sqrt();
    extent / cells
}

fn cell_count(extent: f64, resolution: f64) -> RasterResult<usize> {
    let count = (extent / resolution).round();
    if !count.is_finite() {
        return Err(RasterError::TransformError(format!(
            "extent {} at resolution {} gives no finite grid size",
            extent, resolution
        )));
    }
    Ok(count.max(1.0) as usize)
}
