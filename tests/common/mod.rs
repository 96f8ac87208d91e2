//! In-memory raster engine backed by JSON files.
//!
//! Each "raster" on disk is a JSON document; containers list named members and
//! lon/lat coordinate arrays. Supports EPSG:4326 <-> EPSG:3857 and identity
//! transforms, nearest-neighbour warping, and a poison sample value that makes
//! any warp touching it fail.

#![allow(dead_code)]

use rastermill::io::{RasterEngine, RasterSource, TargetGrid};
use rastermill::{
    BoundingBox, GeoTransform, GridData, OutputFormat, PixelKind, RasterDescriptor, RasterError,
    RasterResult, ResamplingMethod, SubResourceRef,
};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

/// Sample value that makes `warp` fail
pub const POISON: f64 = 4242.0;

const EARTH_RADIUS: f64 = 6_378_137.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeRaster {
    pub crs: String,
    pub transform: [f64; 6],
    pub kind: PixelKind,
    #[serde(default)]
    pub nodata: Option<f64>,
    /// bands x rows x cols; `None` stands for NaN
    #[serde(default)]
    pub bands: Vec<Vec<Vec<Option<f64>>>>,
    #[serde(default)]
    pub members: Vec<FakeMember>,
    #[serde(default)]
    pub coords: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeMember {
    pub name: String,
    pub raster: FakeRaster,
}

impl FakeRaster {
    /// Single-band raster from rows of values
    pub fn single(crs: &str, transform: [f64; 6], kind: PixelKind, rows: Vec<Vec<f64>>) -> Self {
        Self::banded(crs, transform, kind, vec![rows])
    }

    pub fn banded(crs: &str, transform: [f64; 6], kind: PixelKind, bands: Vec<Vec<Vec<f64>>>) -> Self {
        Self {
            crs: crs.to_string(),
            transform,
            kind,
            nodata: None,
            bands: bands
                .into_iter()
                .map(|band| {
                    band.into_iter()
                        .map(|row| row.into_iter().map(|v| if v.is_nan() { None } else { Some(v) }).collect())
                        .collect()
                })
                .collect(),
            members: Vec::new(),
            coords: BTreeMap::new(),
        }
    }

    /// `rows` x `cols` band where every sample is `value`
    pub fn constant(crs: &str, transform: [f64; 6], kind: PixelKind, rows: usize, cols: usize, value: f64) -> Self {
        Self::single(crs, transform, kind, vec![vec![value; cols]; rows])
    }

    pub fn container(members: Vec<(&str, FakeRaster)>) -> Self {
        Self {
            crs: String::new(),
            transform: [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            kind: PixelKind::Float64,
            nodata: None,
            bands: Vec::new(),
            members: members
                .into_iter()
                .map(|(name, raster)| FakeMember { name: name.to_string(), raster })
                .collect(),
            coords: BTreeMap::new(),
        }
    }

    pub fn with_coord(mut self, name: &str, values: Vec<f64>) -> Self {
        self.coords.insert(name.to_string(), values);
        self
    }

    pub fn rows(&self) -> usize {
        self.bands.first().map(|b| b.len()).unwrap_or(0)
    }

    pub fn cols(&self) -> usize {
        self.bands
            .first()
            .and_then(|b| b.first())
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn value(&self, band: usize, row: usize, col: usize) -> f64 {
        self.bands[band][row][col].unwrap_or(f64::NAN)
    }

    fn descriptor(&self) -> RasterDescriptor {
        RasterDescriptor {
            width: self.cols(),
            height: self.rows(),
            band_count: self.bands.len(),
            transform: GeoTransform::from_gdal(self.transform),
            crs: self.crs.clone(),
            pixel_kind: self.kind,
            nodata: self.nodata,
        }
    }

    fn grid(&self) -> GridData {
        let values = Array3::from_shape_fn((self.bands.len(), self.rows(), self.cols()), |(b, r, c)| {
            self.value(b, r, c)
        });
        GridData::new(self.kind, values)
    }

    fn from_grid(descriptor: &RasterDescriptor, grid: &GridData) -> Self {
        let bands = (0..grid.band_count())
            .map(|b| {
                grid.band(b)
                    .outer_iter()
                    .map(|row| {
                        row.iter()
                            .map(|&v| {
                                let v = cast(v, descriptor.pixel_kind);
                                if v.is_nan() { None } else { Some(v) }
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();

        Self {
            crs: descriptor.crs.clone(),
            transform: descriptor.transform.to_gdal(),
            kind: descriptor.pixel_kind,
            nodata: descriptor.nodata,
            bands,
            members: Vec::new(),
            coords: BTreeMap::new(),
        }
    }
}

fn cast(value: f64, kind: PixelKind) -> f64 {
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

pub fn write_raster(path: &Path, raster: &FakeRaster) {
    fs::write(path, serde_json::to_vec_pretty(raster).unwrap()).unwrap();
}

pub fn read_raster(path: &Path) -> FakeRaster {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

/// Names of every entry in `dir`, sorted
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
pub struct FakeEngine;

struct FakeSource {
    path: PathBuf,
    raster: FakeRaster,
    descriptor: RasterDescriptor,
}

impl RasterSource for FakeSource {
    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn read_grid(&self) -> RasterResult<GridData> {
        if self.raster.bands.is_empty() {
            return Err(RasterError::unreadable(self.path.display(), "no bands"));
        }
        Ok(self.raster.grid())
    }

    fn sub_resources(&self) -> RasterResult<Vec<SubResourceRef>> {
        Ok(self
            .raster
            .members
            .iter()
            .enumerate()
            .map(|(index, member)| SubResourceRef {
                container: self.path.clone(),
                index,
                name: format!("FAKE:{}:{}", self.path.display(), member.name),
                description: format!("member {}", member.name),
            })
            .collect())
    }

    fn coordinate_values(&self, name: &str) -> RasterResult<Option<Vec<f64>>> {
        Ok(self.raster.coords.get(name).cloned())
    }
}

fn load(path: &Path) -> RasterResult<FakeRaster> {
    let bytes = fs::read(path).map_err(|e| RasterError::unreadable(path.display(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| RasterError::unreadable(path.display(), e))
}

fn source(path: PathBuf, raster: FakeRaster) -> Box<dyn RasterSource> {
    let descriptor = raster.descriptor();
    Box::new(FakeSource { path, raster, descriptor })
}

impl RasterEngine for FakeEngine {
    fn open(&self, path: &Path) -> RasterResult<Box<dyn RasterSource>> {
        let raster = load(path)?;
        Ok(source(path.to_path_buf(), raster))
    }

    fn open_sub_resource(&self, sub: &SubResourceRef) -> RasterResult<Box<dyn RasterSource>> {
        let container = load(&sub.container)?;
        let member = container
            .members
            .into_iter()
            .find(|m| m.name == sub.short_name())
            .ok_or_else(|| RasterError::unreadable(&sub.name, "no such member"))?;
        Ok(source(PathBuf::from(&sub.name), member.raster))
    }

    fn transform_bounds(&self, bounds: &BoundingBox, source_crs: &str, target_crs: &str) -> RasterResult<BoundingBox> {
        let corners = [
            (bounds.min_x, bounds.min_y),
            (bounds.min_x, bounds.max_y),
            (bounds.max_x, bounds.min_y),
            (bounds.max_x, bounds.max_y),
        ];
        let mut out = BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            let (x, y) = transform_point(x, y, source_crs, target_crs)?;
            out.min_x = out.min_x.min(x);
            out.min_y = out.min_y.min(y);
            out.max_x = out.max_x.max(x);
            out.max_y = out.max_y.max(y);
        }
        Ok(out)
    }

    fn warp(
        &self,
        source: &RasterDescriptor,
        grid: &GridData,
        target: &TargetGrid,
        _resampling: ResamplingMethod,
        fill: f64,
    ) -> RasterResult<GridData> {
        if grid.values().iter().any(|&v| v == POISON) {
            return Err(RasterError::TransformError("poisoned source".to_string()));
        }

        let mut values = Array3::from_elem((grid.band_count(), target.height, target.width), fill);
        for row in 0..target.height {
            for col in 0..target.width {
                let (x, y) = target.transform.apply(col as f64 + 0.5, row as f64 + 0.5);
                let (sx, sy) = transform_point(x, y, &target.crs, &source.crs)?;
                let src_col = (sx - source.transform.top_left_x) / source.transform.pixel_width;
                let src_row = (sy - source.transform.top_left_y) / source.transform.pixel_height;
                if src_col < 0.0 || src_row < 0.0 {
                    continue;
                }
                let (src_col, src_row) = (src_col.floor() as usize, src_row.floor() as usize);
                if src_col >= source.width || src_row >= source.height {
                    continue;
                }
                for band in 0..grid.band_count() {
                    values[[band, row, col]] = grid.values()[[band, src_row, src_col]];
                }
            }
        }
        Ok(GridData::new(grid.kind(), values))
    }

    fn write(&self, path: &Path, descriptor: &RasterDescriptor, grid: &GridData, _format: OutputFormat) -> RasterResult<()> {
        let raster = FakeRaster::from_grid(descriptor, grid);
        let bytes = serde_json::to_vec_pretty(&raster).map_err(|e| RasterError::write(path.display(), e))?;
        fs::write(path, bytes).map_err(|e| RasterError::write(path.display(), e))
    }
}

fn transform_point(x: f64, y: f64, from: &str, to: &str) -> RasterResult<(f64, f64)> {
    match (from, to) {
        _ if from == to && from != "FAIL" => Ok((x, y)),
        ("EPSG:3857", "EPSG:4326") => Ok((
            x / EARTH_RADIUS * 180.0 / PI,
            (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0) * 180.0 / PI,
        )),
        ("EPSG:4326", "EPSG:3857") => Ok((
            x * PI / 180.0 * EARTH_RADIUS,
            (PI / 4.0 + y * PI / 360.0).tan().ln() * EARTH_RADIUS,
        )),
        _ => Err(RasterError::TransformError(format!(
            "no transformation from '{}' to '{}'",
            from, to
        ))),
    }
}
