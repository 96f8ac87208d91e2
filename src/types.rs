use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Numeric kind of raster samples as stored by the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelKind {
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl PixelKind {
    pub fn is_float(self) -> bool {
        matches!(self, PixelKind::Float32 | PixelKind::Float64)
    }

    /// Sentinel written where a warped grid has no source coverage
    pub fn default_nodata(self) -> f64 {
        match self {
            PixelKind::Byte | PixelKind::UInt16 | PixelKind::UInt32 => 0.0,
            PixelKind::Int16 => i16::MIN as f64,
            PixelKind::Int32 => i32::MIN as f64,
            PixelKind::Float32 | PixelKind::Float64 => f64::NAN,
        }
    }
}

impl fmt::Display for PixelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelKind::Byte => "Byte",
            PixelKind::Int16 => "Int16",
            PixelKind::UInt16 => "UInt16",
            PixelKind::Int32 => "Int32",
            PixelKind::UInt32 => "UInt32",
            PixelKind::Float32 => "Float32",
            PixelKind::Float64 => "Float64",
        };
        write!(f, "{}", name)
    }
}

/// Axis-aligned extent in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// `[min_x, min_y, max_x, max_y]`, the order GDAL uses for bounds
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn from_array(bounds: [f64; 4]) -> Self {
        Self {
            min_x: bounds[0],
            min_y: bounds[1],
            max_x: bounds[2],
            max_y: bounds[3],
        }
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map a (column, row) pixel position to CRS coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Extent covered by a `width` x `height` grid, rotation included
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(width as f64, 0.0),
            self.apply(0.0, height as f64),
            self.apply(width as f64, height as f64),
        ];

        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }
}

/// Shape, georeferencing and sample type of one raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterDescriptor {
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub transform: GeoTransform,
    /// WKT or PROJ/authority definition; empty when the source is not georeferenced
    pub crs: String,
    pub pixel_kind: PixelKind,
    pub nodata: Option<f64>,
}

impl RasterDescriptor {
    /// Check the structural invariants every stage relies on
    pub fn validate(&self) -> RasterResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RasterError::InvalidTarget(format!(
                "raster size {}x{} must be positive",
                self.width, self.height
            )));
        }
        if self.band_count == 0 {
            return Err(RasterError::InvalidTarget(
                "raster must have at least one band".to_string(),
            ));
        }
        if self.transform.pixel_width == 0.0 || self.transform.pixel_height == 0.0 {
            return Err(RasterError::InvalidTarget(format!(
                "pixel size ({}, {}) must be non-zero",
                self.transform.pixel_width, self.transform.pixel_height
            )));
        }
        Ok(())
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// `(pixel_width, pixel_height)` straight from the transform
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.transform.pixel_width, self.transform.pixel_height)
    }

    /// Nodata value to use for fill, falling back to the kind's sentinel
    pub fn fill_value(&self) -> f64 {
        self.nodata.unwrap_or_else(|| self.pixel_kind.default_nodata())
    }
}

/// Dense banded grid `(bands, rows, cols)`.
///
/// Samples are held as `f64`, which represents every [`PixelKind`] exactly;
/// the kind tag carries the source datatype through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GridData {
    kind: PixelKind,
    values: Array3<f64>,
}

impl GridData {
    pub fn new(kind: PixelKind, values: Array3<f64>) -> Self {
        Self { kind, values }
    }

    /// Wrap a single 2-D band
    pub fn from_band(kind: PixelKind, band: Array2<f64>) -> Self {
        Self {
            kind,
            values: band.insert_axis(Axis(0)),
        }
    }

    pub fn filled(kind: PixelKind, bands: usize, rows: usize, cols: usize, value: f64) -> Self {
        Self {
            kind,
            values: Array3::from_elem((bands, rows, cols), value),
        }
    }

    pub fn kind(&self) -> PixelKind {
        self.kind
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn into_values(self) -> Array3<f64> {
        self.values
    }

    pub fn band_count(&self) -> usize {
        self.values.dim().0
    }

    pub fn rows(&self) -> usize {
        self.values.dim().1
    }

    pub fn cols(&self) -> usize {
        self.values.dim().2
    }

    /// View of one band, 0-based
    pub fn band(&self, index: usize) -> ArrayView2<'_, f64> {
        self.values.index_axis(Axis(0), index)
    }

    /// Upcast for derived computations that need fractional results
    pub fn to_float(self) -> GridData {
        GridData {
            kind: PixelKind::Float64,
            values: self.values,
        }
    }

    /// Keep only the first band
    pub fn first_band(self) -> GridData {
        if self.band_count() <= 1 {
            return self;
        }
        GridData {
            kind: self.kind,
            values: self.values.slice(s![0..1, .., ..]).to_owned(),
        }
    }

    /// Reverse row order (south-up to north-up)
    pub fn flip_rows(&mut self) {
        self.values = self.values.slice(s![.., ..;-1, ..]).to_owned();
    }
}

/// Target pixel size with the north-up convention enforced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct PixelSize {
    width: f64,
    height: f64,
}

impl PixelSize {
    /// Build from magnitudes; the height is always stored negative
    pub fn north_up(x: f64, y: f64) -> RasterResult<Self> {
        if x == 0.0 || y == 0.0 || !x.is_finite() || !y.is_finite() {
            return Err(RasterError::InvalidTarget(format!(
                "resolution ({}, {}) must be finite and non-zero",
                x, y
            )));
        }
        Ok(Self {
            width: x.abs(),
            height: -y.abs(),
        })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Always negative
    pub fn height(&self) -> f64 {
        self.height
    }
}

impl TryFrom<(f64, f64)> for PixelSize {
    type Error = RasterError;

    fn try_from((x, y): (f64, f64)) -> RasterResult<Self> {
        PixelSize::north_up(x, y)
    }
}

impl From<PixelSize> for (f64, f64) {
    fn from(size: PixelSize) -> Self {
        (size.width, size.height)
    }
}

/// CRS and resolution every output of one batch run is aligned to
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetDefinition {
    /// `None` keeps each source's own CRS
    pub crs: Option<String>,
    /// `None` derives a resolution from the source grid
    pub pixel_size: Option<PixelSize>,
}

impl TargetDefinition {
    /// True when nothing would change on any source
    pub fn is_noop(&self) -> bool {
        self.crs.is_none() && self.pixel_size.is_none()
    }
}

/// Resampling kernel requested from the warp engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResamplingMethod {
    /// Categorical data
    Nearest,
    #[default]
    Bilinear,
    /// Continuous, lower-noise products
    Cubic,
}

/// Output container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    GTiff,
    /// Erdas Imagine
    #[serde(rename = "HFA")]
    Hfa,
    #[serde(rename = "ENVI")]
    Envi,
}

impl OutputFormat {
    /// Parse a GDAL driver tag; unknown tags fall back to GeoTIFF
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "HFA" => OutputFormat::Hfa,
            "ENVI" => OutputFormat::Envi,
            "GTIFF" => OutputFormat::GTiff,
            other => {
                log::warn!("Unknown output format '{}', writing GTiff", other);
                OutputFormat::GTiff
            }
        }
    }

    pub fn driver_name(self) -> &'static str {
        match self {
            OutputFormat::GTiff => "GTiff",
            OutputFormat::Hfa => "HFA",
            OutputFormat::Envi => "ENVI",
        }
    }

    /// Extension including the leading dot
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::GTiff => ".tif",
            OutputFormat::Hfa => ".img",
            OutputFormat::Envi => ".dat",
        }
    }

    /// Companion files the driver writes next to the main file
    pub fn sidecar_extensions(self) -> &'static [&'static str] {
        match self {
            OutputFormat::Envi => &["hdr"],
            OutputFormat::GTiff | OutputFormat::Hfa => &[],
        }
    }
}

/// One extractable grid inside a container file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResourceRef {
    pub container: PathBuf,
    /// 0-based position in container order
    pub index: usize,
    /// Engine connection string, e.g. `HDF4_EOS:EOS_GRID:"m.hdf":grid:band`
    pub name: String,
    pub description: String,
}

impl SubResourceRef {
    /// Variable/array name: the last `:` field of the connection string,
    /// reduced to its final `/` component for grouped netCDF4/HDF5 paths
    pub fn short_name(&self) -> &str {
        let field = self
            .name
            .rsplit(':')
            .next()
            .map(|s| s.trim_matches('"'))
            .unwrap_or(&self.name);
        field
            .rsplit('/')
            .find(|part| !part.is_empty())
            .unwrap_or(field)
    }
}

/// Caller-supplied pick of a container member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubResourceSelector {
    Index(usize),
    Name(String),
}

impl fmt::Display for SubResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubResourceSelector::Index(i) => write!(f, "{}", i),
            SubResourceSelector::Name(n) => write!(f, "{}", n),
        }
    }
}

/// Error types for raster normalization
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RasterError {
    #[error("Unreadable raster {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid target definition: {0}")]
    InvalidTarget(String),

    #[error("Sub-resource index {index} out of range (container has {count})")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("No sub-resource named '{0}'")]
    UnknownSubResource(String),

    #[error("Transform error: {0}")]
    TransformError(String),

    #[error("Cannot write {path}: {reason}")]
    WriteError { path: String, reason: String },

    #[error("Input discovery failed: {0}")]
    Discovery(String),
}

/// Discriminant of [`RasterError`], handy for counting and matching outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unreadable,
    InvalidTarget,
    IndexOutOfRange,
    UnknownSubResource,
    TransformError,
    WriteError,
    Discovery,
}

impl RasterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RasterError::Unreadable { .. } => ErrorKind::Unreadable,
            RasterError::InvalidTarget(_) => ErrorKind::InvalidTarget,
            RasterError::IndexOutOfRange { .. } => ErrorKind::IndexOutOfRange,
            RasterError::UnknownSubResource(_) => ErrorKind::UnknownSubResource,
            RasterError::TransformError(_) => ErrorKind::TransformError,
            RasterError::WriteError { .. } => ErrorKind::WriteError,
            RasterError::Discovery(_) => ErrorKind::Discovery,
        }
    }

    pub fn unreadable(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        RasterError::Unreadable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        RasterError::WriteError {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for raster operations
pub type RasterResult<T> = Result<T, RasterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_pixel_size_forces_north_up() {
        let size = PixelSize::north_up(0.01, 0.01).unwrap();
        assert_eq!(size.width(), 0.01);
        assert_eq!(size.height(), -0.01);

        let size = PixelSize::north_up(-30.0, -30.0).unwrap();
        assert_eq!(size.width(), 30.0);
        assert_eq!(size.height(), -30.0);
    }

    #[test]
    fn test_pixel_size_rejects_zero() {
        let err = PixelSize::north_up(0.0, 10.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTarget);
        assert!(PixelSize::north_up(10.0, f64::NAN).is_err());
    }

    #[test]
    fn test_geotransform_bounds() {
        let gt = GeoTransform::from_gdal([100.0, 2.0, 0.0, 50.0, 0.0, -1.0]);
        let bbox = gt.bounds(10, 20);
        assert_eq!(bbox, BoundingBox { min_x: 100.0, min_y: 30.0, max_x: 120.0, max_y: 50.0 });
        assert_eq!(gt.to_gdal(), [100.0, 2.0, 0.0, 50.0, 0.0, -1.0]);
    }

    #[test]
    fn test_descriptor_validation() {
        let mut desc = RasterDescriptor {
            width: 4,
            height: 4,
            band_count: 1,
            transform: GeoTransform::from_gdal([0.0, 1.0, 0.0, 0.0, 0.0, -1.0]),
            crs: "EPSG:4326".to_string(),
            pixel_kind: PixelKind::Byte,
            nodata: None,
        };
        assert!(desc.validate().is_ok());

        desc.transform.pixel_height = 0.0;
        assert!(desc.validate().is_err());

        desc.transform.pixel_height = -1.0;
        desc.width = 0;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_grid_flip_and_first_band() {
        let mut grid = GridData::new(
            PixelKind::UInt16,
            Array3::from_shape_vec((2, 2, 2), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap(),
        );
        grid.flip_rows();
        assert_eq!(grid.band(0), array![[3.0, 4.0], [1.0, 2.0]]);

        let first = grid.first_band();
        assert_eq!(first.band_count(), 1);
        assert_eq!(first.kind(), PixelKind::UInt16);
        assert_eq!(first.to_float().kind(), PixelKind::Float64);
    }

    #[test]
    fn test_output_format_tags() {
        assert_eq!(OutputFormat::from_tag("GTiff"), OutputFormat::GTiff);
        assert_eq!(OutputFormat::from_tag("hfa").extension(), ".img");
        assert_eq!(OutputFormat::from_tag("ENVI").extension(), ".dat");
        assert_eq!(OutputFormat::from_tag("netCDF"), OutputFormat::GTiff);
    }

    #[test]
    fn test_sub_resource_short_name() {
        let sub = SubResourceRef {
            container: PathBuf::from("a.nc"),
            index: 0,
            name: "NETCDF:\"a.nc\":precip".to_string(),
            description: String::new(),
        };
        assert_eq!(sub.short_name(), "precip");
    }

    #[test]
    fn test_grouped_short_name_is_a_relative_file_name() {
        let named = |name: &str| SubResourceRef {
            container: PathBuf::from("a.nc"),
            index: 0,
            name: name.to_string(),
            description: String::new(),
        };
        assert_eq!(named("NETCDF:\"a.nc\":/grp/var").short_name(), "var");
        assert_eq!(named("HDF5:\"f.h5\"://Grid/precip").short_name(), "precip");

        let out_dir = std::path::Path::new("out/a");
        let joined = out_dir.join(named("HDF5:\"f.h5\"://Grid/precip").short_name());
        assert!(joined.starts_with(out_dir));
    }

    #[test]
    fn test_output_format_serde_uses_driver_tags() {
        assert_eq!(serde_json::to_string(&OutputFormat::Hfa).unwrap(), "\"HFA\"");
        let format: OutputFormat = serde_json::from_str("\"ENVI\"").unwrap();
        assert_eq!(format, OutputFormat::Envi);
        let format: OutputFormat = serde_json::from_str("\"GTiff\"").unwrap();
        assert_eq!(format, OutputFormat::GTiff);
    }
}
