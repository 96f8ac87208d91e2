use crate::io::engine::{RasterEngine, RasterSource, TargetGrid};
use crate::types::{
    BoundingBox, GeoTransform, GridData, OutputFormat, PixelKind, RasterDescriptor, RasterError,
    RasterResult, ResamplingMethod, SubResourceRef,
};
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalDataType, GdalType, RasterBand};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags, Metadata};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use num_traits::AsPrimitive;
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::CStr;
use std::path::{Path, PathBuf};

/// Extra points per edge when projecting an extent, so curved edges are covered
const BOUNDS_DENSIFY_POINTS: i32 = 21;

/// GDAL-backed raster engine
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalEngine;

impl GdalEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Open GDAL dataset plus its cached description
struct GdalSource {
    path: PathBuf,
    dataset: Dataset,
    descriptor: RasterDescriptor,
}

impl RasterEngine for GdalEngine {
    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterSource>> {
        let dataset = Dataset::open(path)
            .map_err(|e| RasterError::unreadable(path.display(), e))?;
        let descriptor = describe(&dataset, path)?;

        log::debug!(
            "Opened {}: {}x{} x{} bands, {}",
            path.display(),
            descriptor.width,
            descriptor.height,
            descriptor.band_count,
            descriptor.pixel_kind
        );

        Ok(Box::new(GdalSource {
            path: path.to_path_buf(),
            dataset,
            descriptor,
        }))
    }

    fn transform_bounds(
        &self,
        bounds: &BoundingBox,
        source_crs: &str,
        target_crs: &str,
    ) -> RasterResult<BoundingBox> {
        let source = spatial_ref(source_crs)?;
        let target = spatial_ref(target_crs)?;
        let transform = CoordTransform::new(&source, &target)
            .map_err(|e| RasterError::TransformError(format!("No transformation between CRSs: {}", e)))?;

        let projected = transform
            .transform_bounds(&bounds.to_array(), BOUNDS_DENSIFY_POINTS)
            .map_err(|e| RasterError::TransformError(format!("Failed to project extent: {}", e)))?;

        Ok(BoundingBox::from_array(projected))
    }

    fn warp(
        &self,
        source: &RasterDescriptor,
        grid: &GridData,
        target: &TargetGrid,
        resampling: ResamplingMethod,
        fill: f64,
    ) -> RasterResult<GridData> {
        let source_wkt = wkt_of(&source.crs)?;
        let target_wkt = wkt_of(&target.crs)?;

        let job = WarpJob {
            source,
            source_wkt: &source_wkt,
            grid,
            target,
            target_wkt: &target_wkt,
            resampling,
            fill,
        };

        let values = match grid.kind() {
            PixelKind::Byte => job.run::<u8>(),
            PixelKind::Int16 => job.run::<i16>(),
            PixelKind::UInt16 => job.run::<u16>(),
            PixelKind::Int32 => job.run::<i32>(),
            PixelKind::UInt32 => job.run::<u32>(),
            PixelKind::Float32 => job.run::<f32>(),
            PixelKind::Float64 => job.run::<f64>(),
        }?;

        Ok(GridData::new(grid.kind(), values))
    }

    fn write(
        &self,
        path: &Path,
        descriptor: &RasterDescriptor,
        grid: &GridData,
        format: OutputFormat,
    ) -> RasterResult<()> {
        let wkt = if descriptor.crs.trim().is_empty() {
            None
        } else {
            Some(wkt_of(&descriptor.crs).map_err(|e| RasterError::write(path.display(), e))?)
        };

        let result = match descriptor.pixel_kind {
            PixelKind::Byte => write_typed::<u8>(path, descriptor, grid, format, wkt.as_deref()),
            PixelKind::Int16 => write_typed::<i16>(path, descriptor, grid, format, wkt.as_deref()),
            PixelKind::UInt16 => write_typed::<u16>(path, descriptor, grid, format, wkt.as_deref()),
            PixelKind::Int32 => write_typed::<i32>(path, descriptor, grid, format, wkt.as_deref()),
            PixelKind::UInt32 => write_typed::<u32>(path, descriptor, grid, format, wkt.as_deref()),
            PixelKind::Float32 => write_typed::<f32>(path, descriptor, grid, format, wkt.as_deref()),
            PixelKind::Float64 => write_typed::<f64>(path, descriptor, grid, format, wkt.as_deref()),
        };

        result.map_err(|e| RasterError::write(path.display(), e))
    }
}

impl RasterSource for GdalSource {
    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn read_grid(&self) -> RasterResult<GridData> {
        let desc = &self.descriptor;
        if desc.band_count == 0 {
            return Err(RasterError::unreadable(
                self.path.display(),
                "dataset has no raster bands",
            ));
        }

        let mut values = Array3::<f64>::zeros((desc.band_count, desc.height, desc.width));
        for index in 0..desc.band_count {
            let band = self
                .dataset
                .rasterband((index + 1) as isize)
                .map_err(|e| RasterError::unreadable(self.path.display(), e))?;
            let plane = read_band(&band, desc.width, desc.height)
                .map_err(|e| RasterError::unreadable(self.path.display(), e))?;
            values.index_axis_mut(Axis(0), index).assign(&plane);
        }

        Ok(GridData::new(desc.pixel_kind, values))
    }

    fn sub_resources(&self) -> RasterResult<Vec<SubResourceRef>> {
        let entries = self.dataset.metadata_domain("SUBDATASETS").unwrap_or_default();
        Ok(parse_subdatasets(&self.path, &entries))
    }

    fn coordinate_values(&self, name: &str) -> RasterResult<Option<Vec<f64>>> {
        let options = DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_MULTIDIM_RASTER,
            ..Default::default()
        };

        // Formats without a multidimensional view simply have no coordinate variables
        let dataset = match Dataset::open_ex(&self.path, options) {
            Ok(dataset) => dataset,
            Err(e) => {
                log::debug!("No multidimensional view of {}: {}", self.path.display(), e);
                return Ok(None);
            }
        };

        let root = dataset
            .root_group()
            .map_err(|e| RasterError::unreadable(self.path.display(), e))?;
        let array = match root.open_md_array(name, CslStringList::new()) {
            Ok(array) => array,
            Err(_) => return Ok(None),
        };
        if array.num_dimensions() != 1 {
            log::debug!("Coordinate '{}' is not one-dimensional", name);
            return Ok(None);
        }

        let count = array.num_elements() as usize;
        let values = array
            .read_as::<f64>(vec![0], vec![count])
            .map_err(|e| RasterError::unreadable(self.path.display(), e))?;

        Ok(Some(values))
    }
}

fn describe(dataset: &Dataset, path: &Path) -> RasterResult<RasterDescriptor> {
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count().max(0) as usize;

    // Ungeoreferenced data gets GDAL's default pixel-space transform
    let transform = dataset
        .geo_transform()
        .map(GeoTransform::from_gdal)
        .unwrap_or_else(|_| GeoTransform::from_gdal([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]));

    let (pixel_kind, nodata) = if band_count > 0 {
        let band = dataset
            .rasterband(1)
            .map_err(|e| RasterError::unreadable(path.display(), e))?;
        (pixel_kind_of(band.band_type()), band.no_data_value())
    } else {
        (PixelKind::Float64, None)
    };

    Ok(RasterDescriptor {
        width,
        height,
        band_count,
        transform,
        crs: dataset.projection(),
        pixel_kind,
        nodata,
    })
}

fn pixel_kind_of(data_type: GdalDataType) -> PixelKind {
    match data_type {
        GdalDataType::UInt8 => PixelKind::Byte,
        GdalDataType::Int16 => PixelKind::Int16,
        GdalDataType::UInt16 => PixelKind::UInt16,
        GdalDataType::Int32 => PixelKind::Int32,
        GdalDataType::UInt32 => PixelKind::UInt32,
        GdalDataType::Float32 => PixelKind::Float32,
        _ => PixelKind::Float64,
    }
}

/// Turn `SUBDATASET_n_NAME` / `SUBDATASET_n_DESC` metadata into ordered refs
pub(crate) fn parse_subdatasets(container: &Path, entries: &[String]) -> Vec<SubResourceRef> {
    let Ok(pattern) = Regex::new(r"^SUBDATASET_(\d+)_(NAME|DESC)=(.*)$") else {
        return Vec::new();
    };

    let mut by_number: BTreeMap<usize, (Option<String>, String)> = BTreeMap::new();
    for entry in entries {
        let Some(caps) = pattern.captures(entry) else {
            continue;
        };
        let Ok(number) = caps[1].parse::<usize>() else {
            continue;
        };
        let slot = by_number.entry(number).or_insert((None, String::new()));
        match &caps[2] {
            "NAME" => slot.0 = Some(caps[3].to_string()),
            _ => slot.1 = caps[3].to_string(),
        }
    }

    by_number
        .into_values()
        .filter_map(|(name, description)| name.map(|name| (name, description)))
        .enumerate()
        .map(|(index, (name, description))| SubResourceRef {
            container: container.to_path_buf(),
            index,
            name,
            description,
        })
        .collect()
}

fn spatial_ref(definition: &str) -> RasterResult<SpatialRef> {
    if definition.trim().is_empty() {
        return Err(RasterError::TransformError(
            "raster has no coordinate reference system".to_string(),
        ));
    }

    let srs = SpatialRef::from_definition(definition).map_err(|e| {
        RasterError::TransformError(format!("Invalid CRS '{}': {}", abbreviate(definition), e))
    })?;
    // Keep x = easting/longitude regardless of the authority's axis order
    srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    Ok(srs)
}

fn wkt_of(definition: &str) -> RasterResult<String> {
    spatial_ref(definition)?
        .to_wkt()
        .map_err(|e| RasterError::TransformError(format!("Cannot export CRS as WKT: {}", e)))
}

fn abbreviate(definition: &str) -> String {
    const LIMIT: usize = 60;
    if definition.chars().count() <= LIMIT {
        definition.to_string()
    } else {
        let head: String = definition.chars().take(LIMIT).collect();
        format!("{}...", head)
    }
}

fn read_band(band: &RasterBand, width: usize, height: usize) -> gdal::errors::Result<Array2<f64>> {
    let buffer = band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
    // GDAL fills exactly width * height samples, row-major
    let data = buffer.data;
    Ok(Array2::from_shape_fn((height, width), |(row, col)| data[row * width + col]))
}

fn write_band<T>(band: &mut RasterBand, plane: ArrayView2<'_, f64>) -> gdal::errors::Result<()>
where
    T: GdalType + Copy + 'static,
    f64: AsPrimitive<T>,
{
    let (rows, cols) = plane.dim();
    let data: Vec<T> = plane.iter().map(|v| v.as_()).collect();
    let buffer = Buffer::new((cols, rows), data);
    band.write((0, 0), (cols, rows), &buffer)
}

fn write_typed<T>(
    path: &Path,
    descriptor: &RasterDescriptor,
    grid: &GridData,
    format: OutputFormat,
    wkt: Option<&str>,
) -> gdal::errors::Result<()>
where
    T: GdalType + Copy + 'static,
    f64: AsPrimitive<T>,
{
    let driver = DriverManager::get_driver_by_name(format.driver_name())?;
    let mut dataset = driver.create_with_band_type::<T, _>(
        path,
        grid.cols() as isize,
        grid.rows() as isize,
        grid.band_count() as isize,
    )?;

    dataset.set_geo_transform(&descriptor.transform.to_gdal())?;
    if let Some(wkt) = wkt {
        dataset.set_projection(wkt)?;
    }

    // Band order follows the leading axis, starting at band 1
    for index in 0..grid.band_count() {
        let mut band = dataset.rasterband((index + 1) as isize)?;
        write_band::<T>(&mut band, grid.band(index))?;
        if let Some(nodata) = descriptor.nodata {
            band.set_no_data_value(Some(nodata))?;
        }
    }

    Ok(())
}

/// In-memory source/destination pair handed to `GDALReprojectImage`
struct WarpJob<'a> {
    source: &'a RasterDescriptor,
    source_wkt: &'a str,
    grid: &'a GridData,
    target: &'a TargetGrid,
    target_wkt: &'a str,
    resampling: ResamplingMethod,
    fill: f64,
}

impl WarpJob<'_> {
    fn run<T>(&self) -> RasterResult<Array3<f64>>
    where
        T: GdalType + Copy + 'static,
        f64: AsPrimitive<T>,
    {
        self.run_inner::<T>()
            .map_err(|e| RasterError::TransformError(format!("Warp setup failed: {}", e)))?
    }

    fn run_inner<T>(&self) -> gdal::errors::Result<RasterResult<Array3<f64>>>
    where
        T: GdalType + Copy + 'static,
        f64: AsPrimitive<T>,
    {
        let bands = self.grid.band_count();
        let driver = DriverManager::get_driver_by_name("MEM")?;

        let mut src = driver.create_with_band_type::<T, _>(
            "",
            self.grid.cols() as isize,
            self.grid.rows() as isize,
            bands as isize,
        )?;
        src.set_geo_transform(&self.source.transform.to_gdal())?;
        src.set_projection(self.source_wkt)?;
        for index in 0..bands {
            let mut band = src.rasterband((index + 1) as isize)?;
            if let Some(nodata) = self.source.nodata {
                band.set_no_data_value(Some(nodata))?;
            }
            write_band::<T>(&mut band, self.grid.band(index))?;
        }

        let mut dst = driver.create_with_band_type::<T, _>(
            "",
            self.target.width as isize,
            self.target.height as isize,
            bands as isize,
        )?;
        dst.set_geo_transform(&self.target.transform.to_gdal())?;
        dst.set_projection(self.target_wkt)?;
        let fill_plane = Array2::from_elem((self.target.height, self.target.width), self.fill);
        for index in 0..bands {
            let mut band = dst.rasterband((index + 1) as isize)?;
            band.set_no_data_value(Some(self.fill))?;
            write_band::<T>(&mut band, fill_plane.view())?;
        }

        if let Err(e) = reproject_image(&src, &dst, self.resampling) {
            return Ok(Err(e));
        }

        let mut values = Array3::<f64>::zeros((bands, self.target.height, self.target.width));
        for index in 0..bands {
            let band = dst.rasterband((index + 1) as isize)?;
            let plane = read_band(&band, self.target.width, self.target.height)?;
            values.index_axis_mut(Axis(0), index).assign(&plane);
        }

        Ok(Ok(values))
    }
}

/// Single-threaded exact warp between two open datasets
fn reproject_image(src: &Dataset, dst: &Dataset, resampling: ResamplingMethod) -> RasterResult<()> {
    let algorithm = match resampling {
        ResamplingMethod::Nearest => gdal_sys::GDALResampleAlg::GRA_NearestNeighbour,
        ResamplingMethod::Bilinear => gdal_sys::GDALResampleAlg::GRA_Bilinear,
        ResamplingMethod::Cubic => gdal_sys::GDALResampleAlg::GRA_Cubic,
    };

    let rv = unsafe {
        gdal_sys::GDALReprojectImage(
            src.c_dataset(),
            std::ptr::null(),
            dst.c_dataset(),
            std::ptr::null(),
            algorithm,
            0.0,
            0.0,
            None,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };

    if rv != gdal_sys::CPLErr::CE_None {
        let message = unsafe { CStr::from_ptr(gdal_sys::CPLGetLastErrorMsg()) }
            .to_string_lossy()
            .into_owned();
        return Err(RasterError::TransformError(format!(
            "GDALReprojectImage failed: {}",
            message
        )));
    }
    Ok(())
}
