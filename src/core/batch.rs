//! Batch runs over directories of rasters.
//!
//! One run resolves a single target definition, discovers its items, and
//! drives each item through open, optional expansion, transform and write.
//! A failing item is recorded in the report and never stops the others; only
//! discovery, the reference raster and the output directory can fail a run.

use crate::core::container::ContainerExpander;
use crate::core::discovery::{default_extensions, discover_by_extension, discover_by_pattern};
use crate::core::grid_transform::GridTransformer;
use crate::core::indices::{compute_index, BandMapping, IndexSet};
use crate::core::spatial_ref::{SpatialReferenceResolver, WGS84_LONGLAT};
use crate::io::writer::{band_file_name, file_stem, named_file_name, reprojected_file_name};
use crate::io::{GdalEngine, OutputWriter, RasterEngine, RasterHandle};
use crate::types::{
    BoundingBox, ErrorKind, OutputFormat, RasterDescriptor, RasterError, RasterResult,
    ResamplingMethod, SubResourceRef, SubResourceSelector, TargetDefinition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings shared by every batch operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub output_format: OutputFormat,
    pub resampling: ResamplingMethod,
    /// Fan items out on the rayon pool (needs the `parallel` feature)
    pub parallel: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::GTiff,
            resampling: ResamplingMethod::Bilinear,
            parallel: false,
        }
    }
}

/// Reference-raster driven reprojection of a directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprojectParams {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub reference: PathBuf,
    /// Adopt the reference pixel size
    pub match_resolution: bool,
    pub input_extensions: Vec<String>,
    pub explicit_crs: Option<String>,
    pub explicit_resolution: Option<(f64, f64)>,
}

impl ReprojectParams {
    pub fn new(input_dir: impl Into<PathBuf>, reference: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            reference: reference.into(),
            match_resolution: true,
            input_extensions: default_extensions(),
            explicit_crs: None,
            explicit_resolution: None,
        }
    }
}

/// Expansion of multi-grid containers into one file per member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerParams {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pattern: String,
    /// `None` extracts every member
    pub selection: Option<Vec<SubResourceSelector>>,
    pub target_epsg: Option<u32>,
    pub target_resolution: Option<(f64, f64)>,
}

impl ContainerParams {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            pattern: "*.hdf".to_string(),
            selection: None,
            target_epsg: None,
            target_resolution: None,
        }
    }
}

/// Conversion of lon/lat gridded variables to georeferenced rasters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableParams {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pattern: String,
    pub lon_name: String,
    pub lat_name: String,
    pub crs: String,
}

impl VariableParams {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            pattern: "*.nc".to_string(),
            lon_name: "lon".to_string(),
            lat_name: "lat".to_string(),
            crs: WGS84_LONGLAT.to_string(),
        }
    }
}

/// Terminal state of one item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemStatus {
    Succeeded { outputs: Vec<PathBuf> },
    /// Source could not be read, or holds nothing to convert
    Skipped { reason: RasterError },
    Failed { reason: RasterError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// File name, `file#selector` for container members, `file:variable` for variables
    pub identifier: String,
    pub status: ItemStatus,
}

impl BatchOutcome {
    fn succeeded(identifier: String, outputs: Vec<PathBuf>) -> Self {
        log::info!("{}: done ({} outputs)", identifier, outputs.len());
        Self {
            identifier,
            status: ItemStatus::Succeeded { outputs },
        }
    }

    fn skipped(identifier: String, reason: RasterError) -> Self {
        log::warn!("{}: skipped, {}", identifier, reason);
        Self {
            identifier,
            status: ItemStatus::Skipped { reason },
        }
    }

    fn failed(identifier: String, reason: RasterError) -> Self {
        log::warn!("{}: failed, {}", identifier, reason);
        Self {
            identifier,
            status: ItemStatus::Failed { reason },
        }
    }

    /// Unreadable sources are skipped, every other error fails the item
    fn from_error(identifier: String, error: RasterError) -> Self {
        match error.kind() {
            ErrorKind::Unreadable => Self::skipped(identifier, error),
            _ => Self::failed(identifier, error),
        }
    }

    fn from_result(identifier: String, result: RasterResult<Vec<PathBuf>>) -> Self {
        match result {
            Ok(outputs) => Self::succeeded(identifier, outputs),
            Err(e) => Self::from_error(identifier, e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ItemStatus::Succeeded { .. })
    }

    pub fn error(&self) -> Option<&RasterError> {
        match &self.status {
            ItemStatus::Succeeded { .. } => None,
            ItemStatus::Skipped { reason } | ItemStatus::Failed { reason } => Some(reason),
        }
    }
}

/// Per-item outcomes of one run, in discovery order
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ItemStatus::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ItemStatus::Failed { .. }))
            .count()
    }

    /// Skipped plus failed items whose reason is of `kind`
    pub fn count_kind(&self, kind: ErrorKind) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.error().map(|e| e.kind()) == Some(kind))
            .count()
    }

    /// Every file written by the run
    pub fn outputs(&self) -> impl Iterator<Item = &Path> {
        self.outcomes.iter().flat_map(|o| match &o.status {
            ItemStatus::Succeeded { outputs } => outputs.as_slice(),
            _ => &[][..],
        }).map(PathBuf::as_path)
    }

    pub fn outcome(&self, identifier: &str) -> Option<&BatchOutcome> {
        self.outcomes.iter().find(|o| o.identifier == identifier)
    }

    pub fn log_summary(&self) {
        let elapsed = self.finished_at - self.started_at;
        log::info!(
            "Batch finished in {:.1}s: {} succeeded, {} skipped, {} failed",
            elapsed.num_milliseconds() as f64 / 1000.0,
            self.succeeded(),
            self.skipped(),
            self.failed()
        );
    }
}

/// Drives batch runs through a raster engine
pub struct BatchOrchestrator<E: RasterEngine = GdalEngine> {
    engine: E,
    config: BatchConfig,
}

impl BatchOrchestrator<GdalEngine> {
    pub fn new(config: BatchConfig) -> Self {
        Self::with_engine(GdalEngine::new(), config)
    }
}

impl<E: RasterEngine> BatchOrchestrator<E> {
    pub fn with_engine(engine: E, config: BatchConfig) -> Self {
        Self { engine, config }
    }

    fn writer(&self) -> OutputWriter<'_> {
        OutputWriter::new(&self.engine, self.config.output_format)
    }

    fn transformer(&self) -> GridTransformer<'_> {
        GridTransformer::new(&self.engine, self.config.resampling)
    }

    /// Reproject every raster in a directory onto a reference raster's CRS
    /// (and pixel size), writing `reprojected_{stem}` files
    pub fn reproject_directory(&self, params: &ReprojectParams) -> RasterResult<BatchReport> {
        let started_at = Utc::now();
        log::info!(
            "Reprojecting {} -> {}",
            params.input_dir.display(),
            params.output_dir.display()
        );

        let target = SpatialReferenceResolver::from_reference(
            &self.engine,
            &params.reference,
            params.explicit_crs.as_deref(),
            params.explicit_resolution,
            params.match_resolution,
        )
        .map_err(fatal)?;

        let items = discover_by_extension(&params.input_dir, &params.input_extensions).map_err(fatal)?;
        create_output_dir(&params.output_dir)?;

        let outcomes = self.dispatch(&items, |path| {
            vec![BatchOutcome::from_result(
                display_name(path),
                self.reproject_file(path, &target, &params.output_dir),
            )]
        });

        Ok(finish(outcomes, started_at))
    }

    fn reproject_file(&self, path: &Path, target: &TargetDefinition, output_dir: &Path) -> RasterResult<Vec<PathBuf>> {
        let handle = RasterHandle::open(&self.engine, path)?;
        let descriptor = handle.descriptor().clone();
        let grid = handle.read_grid()?;
        handle.close();

        let (out_descriptor, out_grid) = self.transformer().reproject(grid, &descriptor, target)?;

        let out_path = output_dir.join(reprojected_file_name(path, self.config.output_format));
        let written = self.writer().write(&out_path, &out_descriptor, &out_grid)?;
        Ok(vec![written])
    }

    /// Extract selected members of every matching container to
    /// `{stem}_band_{index}` files, reprojecting them in place when a target
    /// EPSG code or resolution is set
    pub fn expand_containers(&self, params: &ContainerParams) -> RasterResult<BatchReport> {
        let started_at = Utc::now();
        log::info!(
            "Expanding containers '{}' in {} -> {}",
            params.pattern,
            params.input_dir.display(),
            params.output_dir.display()
        );

        let epsg = params.target_epsg.map(SpatialReferenceResolver::epsg_code);
        let target = SpatialReferenceResolver::resolve_explicit(epsg.as_deref(), params.target_resolution)
            .map_err(fatal)?;

        let items = discover_by_pattern(&params.input_dir, &params.pattern).map_err(fatal)?;
        if items.is_empty() {
            log::warn!("No files match '{}' in {}", params.pattern, params.input_dir.display());
        }
        create_output_dir(&params.output_dir)?;

        let outcomes = self.dispatch(&items, |path| {
            self.expand_container(path, params.selection.as_deref(), &target, &params.output_dir)
        });

        Ok(finish(outcomes, started_at))
    }

    fn expand_container(
        &self,
        path: &Path,
        selection: Option<&[SubResourceSelector]>,
        target: &TargetDefinition,
        output_dir: &Path,
    ) -> Vec<BatchOutcome> {
        let name = display_name(path);

        let refs = match RasterHandle::open(&self.engine, path).and_then(|handle| {
            let refs = ContainerExpander::enumerate(&handle);
            handle.close();
            refs
        }) {
            Ok(refs) => refs,
            Err(e) => return vec![BatchOutcome::from_error(name, e)],
        };

        if refs.is_empty() {
            return vec![BatchOutcome::skipped(
                name,
                RasterError::unreadable(path.display(), "container has no sub-resources"),
            )];
        }

        let stem = file_stem(path);
        ContainerExpander::select(&refs, selection)
            .into_iter()
            .map(|(label, selected)| {
                let identifier = format!("{}#{}", name, label);
                let result = selected.and_then(|sub| self.expand_member(&sub, &stem, target, output_dir));
                BatchOutcome::from_result(identifier, result)
            })
            .collect()
    }

    fn expand_member(
        &self,
        sub: &SubResourceRef,
        stem: &str,
        target: &TargetDefinition,
        output_dir: &Path,
    ) -> RasterResult<Vec<PathBuf>> {
        let (descriptor, grid) = ContainerExpander::extract(&self.engine, sub)?;
        let out_path = output_dir.join(band_file_name(stem, sub.index, self.config.output_format));
        let written = self.writer().write(&out_path, &descriptor, &grid)?;

        if !target.is_noop() {
            self.reproject_in_place(&written, target)?;
        }
        Ok(vec![written])
    }

    /// Replace `path` with its reprojection. The staged result is renamed over
    /// the native file only after transform and write succeed; on any error
    /// the native file is left as it was.
    fn reproject_in_place(&self, path: &Path, target: &TargetDefinition) -> RasterResult<()> {
        log::debug!("Reprojecting {} in place", path.display());
        let handle = RasterHandle::open(&self.engine, path)
            .map_err(|e| RasterError::TransformError(format!("cannot reopen native output: {}", e)))?;
        let descriptor = handle.descriptor().clone();
        let grid = handle
            .read_grid()
            .map_err(|e| RasterError::TransformError(format!("cannot read native output: {}", e)))?;
        handle.close();

        let (out_descriptor, out_grid) = self.transformer().reproject(grid, &descriptor, target)?;
        self.writer().write(path, &out_descriptor, &out_grid)?;
        Ok(())
    }

    /// Write every lon/lat gridded variable of each matching file to
    /// `{output_dir}/{stem}/{variable}`
    pub fn convert_variables(&self, params: &VariableParams) -> RasterResult<BatchReport> {
        let started_at = Utc::now();
        log::info!(
            "Converting variables of '{}' in {} -> {}",
            params.pattern,
            params.input_dir.display(),
            params.output_dir.display()
        );

        let items = discover_by_pattern(&params.input_dir, &params.pattern).map_err(fatal)?;
        if items.is_empty() {
            log::warn!("No files match '{}' in {}", params.pattern, params.input_dir.display());
        }
        create_output_dir(&params.output_dir)?;

        let outcomes = self.dispatch(&items, |path| self.convert_file(path, params));
        Ok(finish(outcomes, started_at))
    }

    fn convert_file(&self, path: &Path, params: &VariableParams) -> Vec<BatchOutcome> {
        let name = display_name(path);
        let stem = file_stem(path);

        let prepared = RasterHandle::open(&self.engine, path).and_then(|handle| {
            let lons = handle.coordinate_values(&params.lon_name);
            let lats = handle.coordinate_values(&params.lat_name);
            let variables = handle.list_sub_resources();
            handle.close();
            Ok((lons?, lats?, variables?))
        });

        let (lons, lats, variables) = match prepared {
            Ok((Some(lons), Some(lats), variables)) => (lons, lats, variables),
            Ok(_) => {
                return vec![BatchOutcome::skipped(
                    name,
                    RasterError::InvalidTarget(format!(
                        "no '{}'/'{}' coordinate variables",
                        params.lon_name, params.lat_name
                    )),
                )];
            }
            Err(e) => return vec![BatchOutcome::from_error(name, e)],
        };

        let grid = match LonLatGrid::new(&lons, &lats, &params.crs) {
            Ok(grid) => grid,
            Err(e) => return vec![BatchOutcome::skipped(name, e)],
        };

        let out_dir = params.output_dir.join(&stem);
        if let Err(e) = create_output_dir(&out_dir) {
            return vec![BatchOutcome::failed(name, e)];
        }

        // A file holding a single variable exposes no members; it is the variable
        let variables: Vec<(String, SubResourceRef)> = if variables.is_empty() {
            vec![(
                stem.clone(),
                SubResourceRef {
                    container: path.to_path_buf(),
                    index: 0,
                    name: path.to_string_lossy().into_owned(),
                    description: String::new(),
                },
            )]
        } else {
            variables
                .into_iter()
                .map(|sub| (sub.short_name().to_string(), sub))
                .filter(|(var, _)| *var != params.lon_name && *var != params.lat_name)
                .collect()
        };

        variables
            .iter()
            .map(|(var, sub)| {
                let identifier = format!("{}:{}", name, var);
                self.convert_variable(sub, var, &grid, &out_dir, identifier)
            })
            .collect()
    }

    fn convert_variable(
        &self,
        sub: &SubResourceRef,
        variable: &str,
        lonlat: &LonLatGrid,
        out_dir: &Path,
        identifier: String,
    ) -> BatchOutcome {
        let (source, mut grid) = match ContainerExpander::extract_single(&self.engine, sub) {
            Ok(extracted) => extracted,
            Err(e @ RasterError::InvalidTarget(_)) => return BatchOutcome::skipped(identifier, e),
            Err(e) => return BatchOutcome::from_error(identifier, e),
        };

        if grid.rows() != lonlat.rows || grid.cols() != lonlat.cols {
            return BatchOutcome::skipped(
                identifier,
                RasterError::InvalidTarget(format!(
                    "shape {}x{} does not match {}x{} lat/lon grid",
                    grid.rows(),
                    grid.cols(),
                    lonlat.rows,
                    lonlat.cols
                )),
            );
        }

        // Rows delivered bottom-up while latitude ascends
        if lonlat.south_up && source.transform.pixel_height > 0.0 {
            grid.flip_rows();
        }

        let descriptor = RasterDescriptor {
            width: lonlat.cols,
            height: lonlat.rows,
            band_count: 1,
            transform: lonlat.transform,
            crs: lonlat.crs.clone(),
            pixel_kind: grid.kind(),
            nodata: source.nodata,
        };

        let out_path = out_dir.join(named_file_name(variable, self.config.output_format));
        let result = self
            .writer()
            .write(&out_path, &descriptor, &grid)
            .map(|written| vec![written]);
        BatchOutcome::from_result(identifier, result)
    }

    /// Evaluate each index over one multi-band raster and write
    /// `{output_prefix}/{index_name}` files
    pub fn derive_indices(
        &self,
        input: &Path,
        output_prefix: &Path,
        mapping: &BandMapping,
        indices: &IndexSet,
    ) -> RasterResult<BatchReport> {
        let started_at = Utc::now();
        log::info!(
            "Deriving {} indices from {} -> {}",
            indices.len(),
            input.display(),
            output_prefix.display()
        );

        let handle = RasterHandle::open(&self.engine, input).map_err(fatal)?;
        let source = handle.descriptor().clone();
        let grid = handle.read_grid_as_float().map_err(fatal)?;
        handle.close();

        mapping.validate(grid.band_count()).map_err(fatal)?;
        create_output_dir(output_prefix)?;

        let descriptor = RasterDescriptor {
            band_count: 1,
            nodata: None,
            ..source
        };

        let outcomes = self.dispatch(indices.entries(), |(name, formula)| {
            let result = compute_index(&grid, mapping, formula).and_then(|index| {
                let out_path = output_prefix.join(named_file_name(name, self.config.output_format));
                self.writer().write(&out_path, &descriptor, &index)
            });
            vec![BatchOutcome::from_result(name.clone(), result.map(|p| vec![p]))]
        });

        Ok(finish(outcomes, started_at))
    }

    /// Run `process` over every item, in parallel when configured, keeping
    /// outcomes in item order
    fn dispatch<T, F>(&self, items: &[T], process: F) -> Vec<BatchOutcome>
    where
        T: Sync,
        F: Fn(&T) -> Vec<BatchOutcome> + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            if self.config.parallel {
                use rayon::prelude::*;
                log::debug!("Processing {} items in parallel", items.len());
                let per_item: Vec<Vec<BatchOutcome>> = items.par_iter().map(&process).collect();
                return per_item.into_iter().flatten().collect();
            }
        }

        items.iter().flat_map(process).collect()
    }
}

/// Georeferencing shared by every variable of one lon/lat file
struct LonLatGrid {
    rows: usize,
    cols: usize,
    transform: crate::types::GeoTransform,
    crs: String,
    south_up: bool,
}

impl LonLatGrid {
    fn new(lons: &[f64], lats: &[f64], crs: &str) -> RasterResult<Self> {
        let (min_x, max_x) = min_max(lons)?;
        let (min_y, max_y) = min_max(lats)?;
        let bounds = BoundingBox { min_x, min_y, max_x, max_y };
        let transform = SpatialReferenceResolver::transform_from_bounds(&bounds, lons.len(), lats.len())?;

        Ok(Self {
            rows: lats.len(),
            cols: lons.len(),
            transform,
            crs: crs.to_string(),
            south_up: lats.len() > 1 && lats[0] < lats[lats.len() - 1],
        })
    }
}

fn min_max(values: &[f64]) -> RasterResult<(f64, f64)> {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if min > max {
        return Err(RasterError::InvalidTarget("coordinate variable has no finite values".to_string()));
    }
    Ok((min, max))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn create_output_dir(dir: &Path) -> RasterResult<()> {
    fs::create_dir_all(dir).map_err(|e| {
        log::error!("Cannot create output directory {}: {}", dir.display(), e);
        RasterError::write(dir.display(), e)
    })
}

fn fatal(error: RasterError) -> RasterError {
    log::error!("Batch aborted: {}", error);
    error
}

fn finish(outcomes: Vec<BatchOutcome>, started_at: DateTime<Utc>) -> BatchReport {
    let report = BatchReport {
        outcomes,
        started_at,
        finished_at: Utc::now(),
    };
    report.log_summary();
    report
}
