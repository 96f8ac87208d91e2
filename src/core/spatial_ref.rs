use crate::io::{RasterEngine, RasterHandle};
use crate::types::{
    BoundingBox, GeoTransform, PixelSize, RasterDescriptor, RasterError, RasterResult,
    TargetDefinition,
};
use std::path::Path;

/// Geographic WGS84 in PROJ form, the CRS of lon/lat gridded variables
pub const WGS84_LONGLAT: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// Builds the target definition a batch run aligns every output to
pub struct SpatialReferenceResolver;

impl SpatialReferenceResolver {
    /// Derive the target from a reference raster, with explicit overrides
    pub fn resolve(
        reference: &RasterDescriptor,
        explicit_crs: Option<&str>,
        explicit_resolution: Option<(f64, f64)>,
        match_resolution: bool,
    ) -> RasterResult<TargetDefinition> {
        let crs = match explicit_crs {
            Some(crs) => crs.trim().to_string(),
            None => reference.crs.trim().to_string(),
        };
        if crs.is_empty() {
            return Err(RasterError::InvalidTarget(
                "reference raster has no CRS and none was given".to_string(),
            ));
        }

        let pixel_size = match explicit_resolution {
            Some((x, y)) => Some(PixelSize::north_up(x, y)?),
            None if match_resolution => {
                let (x, y) = reference.pixel_size();
                Some(PixelSize::north_up(x, y)?)
            }
            None => None,
        };

        log::debug!("Target CRS: {}", crs);
        log::debug!("Target pixel size: {:?}", pixel_size);

        Ok(TargetDefinition {
            crs: Some(crs),
            pixel_size,
        })
    }

    /// Target built from explicit values only; both may be absent
    pub fn resolve_explicit(
        explicit_crs: Option<&str>,
        explicit_resolution: Option<(f64, f64)>,
    ) -> RasterResult<TargetDefinition> {
        let crs = match explicit_crs.map(str::trim) {
            Some("") => {
                return Err(RasterError::InvalidTarget("target CRS is empty".to_string()));
            }
            other => other.map(str::to_string),
        };
        let pixel_size = explicit_resolution
            .map(|(x, y)| PixelSize::north_up(x, y))
            .transpose()?;

        Ok(TargetDefinition { crs, pixel_size })
    }

    /// Open the reference raster and resolve against its descriptor.
    /// An unreadable reference is fatal to the run.
    pub fn from_reference(
        engine: &dyn RasterEngine,
        reference: &Path,
        explicit_crs: Option<&str>,
        explicit_resolution: Option<(f64, f64)>,
        match_resolution: bool,
    ) -> RasterResult<TargetDefinition> {
        log::info!("Resolving target grid from reference {}", reference.display());
        let handle = RasterHandle::open(engine, reference)?;
        let descriptor = handle.descriptor().clone();
        handle.close();

        Self::resolve(&descriptor, explicit_crs, explicit_resolution, match_resolution)
    }

    pub fn epsg_code(code: u32) -> String {
        format!("EPSG:{}", code)
    }

    /// North-up transform placing `width` x `height` cells exactly over `bounds`
    pub fn transform_from_bounds(
        bounds: &BoundingBox,
        width: usize,
        height: usize,
    ) -> RasterResult<GeoTransform> {
        if width == 0 || height == 0 {
            return Err(RasterError::InvalidTarget(format!(
                "grid size {}x{} must be positive",
                width, height
            )));
        }
        if !(bounds.width() > 0.0) || !(bounds.height() > 0.0) {
            return Err(RasterError::InvalidTarget(format!(
                "degenerate bounds {:?}",
                bounds
            )));
        }

        Ok(GeoTransform {
            top_left_x: bounds.min_x,
            pixel_width: bounds.width() / width as f64,
            rotation_x: 0.0,
            top_left_y: bounds.max_y,
            rotation_y: 0.0,
            pixel_height: -bounds.height() / height as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, PixelKind};
    use approx::assert_abs_diff_eq;

    fn reference() -> RasterDescriptor {
        RasterDescriptor {
            width: 100,
            height: 50,
            band_count: 1,
            transform: GeoTransform::from_gdal([10.0, 0.01, 0.0, 50.0, 0.0, -0.01]),
            crs: "EPSG:4326".to_string(),
            pixel_kind: PixelKind::Float32,
            nodata: None,
        }
    }

    #[test]
    fn test_resolve_copies_reference() {
        let target = SpatialReferenceResolver::resolve(&reference(), None, None, true).unwrap();
        assert_eq!(target.crs.as_deref(), Some("EPSG:4326"));
        let size = target.pixel_size.unwrap();
        assert_eq!(size.width(), 0.01);
        assert_eq!(size.height(), -0.01);
    }

    #[test]
    fn test_resolve_explicit_overrides_win() {
        let target = SpatialReferenceResolver::resolve(
            &reference(),
            Some("EPSG:32633"),
            Some((30.0, 30.0)),
            true,
        )
        .unwrap();
        assert_eq!(target.crs.as_deref(), Some("EPSG:32633"));
        assert_eq!(target.pixel_size.unwrap().height(), -30.0);
    }

    #[test]
    fn test_resolve_without_match_resolution() {
        let target = SpatialReferenceResolver::resolve(&reference(), None, None, false).unwrap();
        assert!(target.pixel_size.is_none());
    }

    #[test]
    fn test_resolve_rejects_zero_resolution() {
        let err = SpatialReferenceResolver::resolve(&reference(), None, Some((0.0, 1.0)), true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);

        let mut flat = reference();
        flat.transform.pixel_width = 0.0;
        assert!(SpatialReferenceResolver::resolve(&flat, None, None, true).is_err());
    }

    #[test]
    fn test_resolve_rejects_missing_crs() {
        let mut bare = reference();
        bare.crs = String::new();
        let err = SpatialReferenceResolver::resolve(&bare, None, None, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);

        assert!(SpatialReferenceResolver::resolve(&bare, Some("EPSG:4326"), None, true).is_ok());
    }

    #[test]
    fn test_resolve_explicit() {
        let target = SpatialReferenceResolver::resolve_explicit(None, None).unwrap();
        assert!(target.is_noop());

        let target = SpatialReferenceResolver::resolve_explicit(
            Some(&SpatialReferenceResolver::epsg_code(4326)),
            Some((0.05, 0.05)),
        )
        .unwrap();
        assert_eq!(target.crs.as_deref(), Some("EPSG:4326"));
        assert_eq!(target.pixel_size.unwrap().height(), -0.05);

        assert!(SpatialReferenceResolver::resolve_explicit(Some(" "), None).is_err());
    }

    #[test]
    fn test_transform_from_bounds() {
        let bounds = BoundingBox { min_x: 70.0, min_y: 15.0, max_x: 140.0, max_y: 55.0 };
        let gt = SpatialReferenceResolver::transform_from_bounds(&bounds, 700, 400).unwrap();
        assert_abs_diff_eq!(gt.pixel_width, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(gt.pixel_height, -0.1, epsilon = 1e-12);
        assert_eq!(gt.top_left_x, 70.0);
        assert_eq!(gt.top_left_y, 55.0);

        assert!(SpatialReferenceResolver::transform_from_bounds(&bounds, 0, 10).is_err());
        let line = BoundingBox { min_x: 1.0, min_y: 1.0, max_x: 1.0, max_y: 2.0 };
        assert!(SpatialReferenceResolver::transform_from_bounds(&line, 10, 10).is_err());
    }
}
