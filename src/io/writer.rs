//! Output naming, datatype inference and staged writes.
//!
//! Every file goes to a hidden temporary name in its destination directory
//! first and is renamed over the final name only once the engine has closed
//! it. A failed write therefore never leaves a partial output, and rewriting an
//! existing output replaces it in one step.

use crate::io::engine::RasterEngine;
use crate::types::{GridData, OutputFormat, PixelKind, RasterDescriptor, RasterError, RasterResult};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// Prefix of directory-reprojection outputs
pub const REPROJECTED_PREFIX: &str = "reprojected_";

const STAGING_PREFIX: &str = ".rastermill-";

/// Extensions treated as a raster suffix (replaced, not appended to)
const RASTER_EXTENSIONS: &[&str] = &["tif", "tiff", "img", "dat", "hdf", "nc"];

/// On-disk sample type for a grid of the given kind
pub fn output_kind(kind: PixelKind) -> PixelKind {
    match kind {
        PixelKind::Byte => PixelKind::Byte,
        PixelKind::Int16 | PixelKind::UInt16 => PixelKind::UInt16,
        _ => PixelKind::Float32,
    }
}

/// Value after the same saturating conversion the samples get
fn cast_to(value: f64, kind: PixelKind) -> f64 {
    match kind {
        PixelKind::Byte => value as u8 as f64,
        PixelKind::Int16 => value as i16 as f64,
        PixelKind::UInt16 => value as u16 as f64,
        PixelKind::Int32 => value as i32 as f64,
        PixelKind::UInt32 => value as u32 as f64,
        PixelKind::Float32 => value as f32 as f64,
        PixelKind::Float64 => value,
    }
}

/// File name without directory and last extension
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `reprojected_{stem}{ext}`
pub fn reprojected_file_name(input: &Path, format: OutputFormat) -> String {
    format!("{}{}{}", REPROJECTED_PREFIX, file_stem(input), format.extension())
}

/// `{stem}_band_{index}{ext}`
pub fn band_file_name(stem: &str, index: usize, format: OutputFormat) -> String {
    format!("{}_band_{}{}", stem, index, format.extension())
}

/// `{name}{ext}`, used for variables and derived indices
pub fn named_file_name(name: &str, format: OutputFormat) -> String {
    format!("{}{}", name, format.extension())
}

/// Force the format's extension onto `path`
pub fn with_format_extension(path: &Path, format: OutputFormat) -> PathBuf {
    let wanted = format.extension().trim_start_matches('.');
    match path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()) {
        Some(ext) if ext == wanted => path.to_path_buf(),
        Some(ext) if RASTER_EXTENSIONS.contains(&ext.as_str()) => path.with_extension(wanted),
        _ => {
            let mut name = path.as_os_str().to_os_string();
            name.push(format.extension());
            PathBuf::from(name)
        }
    }
}

/// Writes grids through the engine in one output format
#[derive(Clone, Copy)]
pub struct OutputWriter<'a> {
    engine: &'a dyn RasterEngine,
    format: OutputFormat,
}

impl<'a> OutputWriter<'a> {
    pub fn new(engine: &'a dyn RasterEngine, format: OutputFormat) -> Self {
        Self { engine, format }
    }

    /// Write `grid` to `path` (extension adjusted to the format) and return the
    /// final path
    pub fn write(
        &self,
        path: &Path,
        descriptor: &RasterDescriptor,
        grid: &GridData,
    ) -> RasterResult<PathBuf> {
        let destination = with_format_extension(path, self.format);
        let prepared = self.prepare_descriptor(descriptor, grid);

        log::debug!(
            "Writing {} ({}x{} x{} bands, {} -> {})",
            destination.display(),
            prepared.width,
            prepared.height,
            prepared.band_count,
            grid.kind(),
            prepared.pixel_kind
        );

        let staged = StagedOutput::new(&destination, self.format)?;
        self.engine
            .write(staged.path(), &prepared, grid, self.format)
            .map_err(|e| match e {
                RasterError::WriteError { reason, .. } => {
                    RasterError::write(destination.display(), reason)
                }
                other => RasterError::write(destination.display(), other),
            })?;
        let written = staged.commit()?;

        log::info!("Wrote {}", written.display());
        Ok(written)
    }

    /// Descriptor as it will land on disk: grid shape, inferred kind, cast nodata
    fn prepare_descriptor(&self, descriptor: &RasterDescriptor, grid: &GridData) -> RasterDescriptor {
        let kind = output_kind(grid.kind());
        RasterDescriptor {
            width: grid.cols(),
            height: grid.rows(),
            band_count: grid.band_count(),
            transform: descriptor.transform,
            crs: descriptor.crs.clone(),
            pixel_kind: kind,
            nodata: descriptor.nodata.map(|v| cast_to(v, kind)),
        }
    }
}

/// Hidden temporary output next to its final destination
pub struct StagedOutput {
    temp: Option<TempPath>,
    destination: PathBuf,
    sidecars: &'static [&'static str],
}

impl StagedOutput {
    pub fn new(destination: &Path, format: OutputFormat) -> RasterResult<Self> {
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temp = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(format.extension())
            .tempfile_in(dir)
            .map_err(|e| RasterError::write(destination.display(), e))?
            .into_temp_path();

        // Only the name is reserved; the driver creates the file itself
        fs::remove_file(&temp).map_err(|e| RasterError::write(destination.display(), e))?;

        Ok(Self {
            temp: Some(temp),
            destination: destination.to_path_buf(),
            sidecars: format.sidecar_extensions(),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.temp {
            Some(temp) => &**temp,
            None => self.destination.as_path(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Rename sidecars and then the main file over the destination
    pub fn commit(mut self) -> RasterResult<PathBuf> {
        let Some(temp) = self.temp.take() else {
            return Ok(self.destination.clone());
        };

        if !temp.exists() {
            return Err(RasterError::write(
                self.destination.display(),
                "driver produced no file",
            ));
        }

        let mut moved = Vec::new();
        for ext in self.sidecars {
            let from = temp.with_extension(ext);
            if from.exists() {
                let to = self.destination.with_extension(ext);
                if let Err(e) = fs::rename(&from, &to) {
                    let _ = fs::remove_file(&from);
                    discard(&moved);
                    return Err(RasterError::write(to.display(), e));
                }
                moved.push(to);
            }
        }

        if let Err(e) = temp.persist(&self.destination) {
            discard(&moved);
            return Err(RasterError::write(self.destination.display(), e.error));
        }

        Ok(self.destination.clone())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        // Uncommitted: the TempPath removes the main file, sidecars go here
        if let Some(temp) = &self.temp {
            for ext in self.sidecars {
                let _ = fs::remove_file(temp.with_extension(ext));
            }
        }
    }
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}
