use crate::io::{RasterEngine, RasterHandle};
use crate::types::{
    GridData, RasterDescriptor, RasterError, RasterResult, SubResourceRef, SubResourceSelector,
};

/// Lists, selects and extracts members of multi-grid containers (HDF, NetCDF)
pub struct ContainerExpander;

impl ContainerExpander {
    /// Members in container-declared order
    pub fn enumerate(handle: &RasterHandle) -> RasterResult<Vec<SubResourceRef>> {
        let refs = handle.list_sub_resources()?;
        log::debug!("{} holds {} sub-resources", handle.path().display(), refs.len());
        for sub in &refs {
            log::debug!("  [{}] {} {}", sub.index, sub.short_name(), sub.description);
        }
        Ok(refs)
    }

    /// Resolve a selection against `refs`.
    ///
    /// Each entry pairs a label for the selection with its resolved member or
    /// the reason it cannot be resolved. With no selection every member is
    /// returned in natural order.
    pub fn select(
        refs: &[SubResourceRef],
        selection: Option<&[SubResourceSelector]>,
    ) -> Vec<(String, RasterResult<SubResourceRef>)> {
        let Some(selection) = selection else {
            return refs
                .iter()
                .map(|sub| (sub.index.to_string(), Ok(sub.clone())))
                .collect();
        };

        selection
            .iter()
            .map(|selector| (selector.to_string(), Self::select_one(refs, selector)))
            .collect()
    }

    fn select_one(refs: &[SubResourceRef], selector: &SubResourceSelector) -> RasterResult<SubResourceRef> {
        match selector {
            SubResourceSelector::Index(index) => {
                refs.get(*index)
                    .cloned()
                    .ok_or(RasterError::IndexOutOfRange {
                        index: *index,
                        count: refs.len(),
                    })
            }
            SubResourceSelector::Name(name) => refs
                .iter()
                .find(|sub| sub.short_name() == name || sub.name == *name)
                .cloned()
                .ok_or_else(|| RasterError::UnknownSubResource(name.clone())),
        }
    }

    /// First band of a member as an independent single-band raster
    pub fn extract(
        engine: &dyn RasterEngine,
        sub: &SubResourceRef,
    ) -> RasterResult<(RasterDescriptor, GridData)> {
        let (mut descriptor, grid) = Self::read_member(engine, sub)?;
        descriptor.band_count = 1;
        Ok((descriptor, grid.first_band()))
    }

    /// Like [`extract`](Self::extract), but a member holding more than one
    /// band (e.g. a `time x lat x lon` variable) is an `InvalidTarget` error
    pub fn extract_single(
        engine: &dyn RasterEngine,
        sub: &SubResourceRef,
    ) -> RasterResult<(RasterDescriptor, GridData)> {
        let (descriptor, grid) = Self::read_member(engine, sub)?;
        if grid.band_count() != 1 {
            return Err(RasterError::InvalidTarget(format!(
                "{} holds {} bands, expected a single 2-D grid",
                sub.short_name(),
                grid.band_count()
            )));
        }
        Ok((descriptor, grid))
    }

    fn read_member(
        engine: &dyn RasterEngine,
        sub: &SubResourceRef,
    ) -> RasterResult<(RasterDescriptor, GridData)> {
        let handle = RasterHandle::open_sub_resource(engine, sub)?;
        let descriptor = handle.descriptor().clone();
        let grid = handle.read_grid()?;
        handle.close();

        descriptor
            .validate()
            .map_err(|e| RasterError::unreadable(&sub.name, e))?;
        Ok((descriptor, grid))
    }
}
