use crate::io::engine::{RasterEngine, RasterSource};
use crate::types::{GridData, RasterDescriptor, RasterError, RasterResult, SubResourceRef};
use std::path::{Path, PathBuf};

/// An open raster file or container member.
///
/// The engine resource is released when the handle is closed or dropped, on
/// every path out of a pipeline step.
pub struct RasterHandle {
    path: PathBuf,
    source: Box<dyn RasterSource>,
}

impl RasterHandle {
    /// Open a file. Any engine failure surfaces as `Unreadable`.
    pub fn open(engine: &dyn RasterEngine, path: &Path) -> RasterResult<Self> {
        log::debug!("Opening raster {}", path.display());
        let source = engine
            .open(path)
            .map_err(|e| as_unreadable(path.display(), e))?;

        Ok(Self {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Open one member of a container
    pub fn open_sub_resource(engine: &dyn RasterEngine, sub: &SubResourceRef) -> RasterResult<Self> {
        log::debug!(
            "Opening sub-resource {} of {}",
            sub.short_name(),
            sub.container.display()
        );
        let source = engine
            .open_sub_resource(sub)
            .map_err(|e| as_unreadable(&sub.name, e))?;

        Ok(Self {
            path: PathBuf::from(&sub.name),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptor(&self) -> &RasterDescriptor {
        self.source.descriptor()
    }

    /// Full extent of every band, native datatype
    pub fn read_grid(&self) -> RasterResult<GridData> {
        let grid = self
            .source
            .read_grid()
            .map_err(|e| as_unreadable(self.path.display(), e))?;

        let desc = self.descriptor();
        if grid.rows() != desc.height || grid.cols() != desc.width {
            return Err(RasterError::unreadable(
                self.path.display(),
                format!(
                    "read {}x{} samples, expected {}x{}",
                    grid.cols(),
                    grid.rows(),
                    desc.width,
                    desc.height
                ),
            ));
        }
        Ok(grid)
    }

    /// Same as [`read_grid`](Self::read_grid) but tagged as 64-bit float
    pub fn read_grid_as_float(&self) -> RasterResult<GridData> {
        Ok(self.read_grid()?.to_float())
    }

    /// Container members in container order; empty for flat rasters
    pub fn list_sub_resources(&self) -> RasterResult<Vec<SubResourceRef>> {
        self.source.sub_resources()
    }

    pub fn coordinate_values(&self, name: &str) -> RasterResult<Option<Vec<f64>>> {
        self.source.coordinate_values(name)
    }

    pub fn close(self) {
        log::debug!("Closing raster {}", self.path.display());
        drop(self.source);
    }
}

impl std::fmt::Debug for RasterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterHandle")
            .field("path", &self.path)
            .field("descriptor", self.descriptor())
            .finish()
    }
}

fn as_unreadable(path: impl std::fmt::Display, error: RasterError) -> RasterError {
    match error {
        RasterError::Unreadable { .. } => error,
        other => RasterError::unreadable(path, other),
    }
}
