//! Pixel-wise derived indices (NDVI and friends) over named bands.
//!
//! The caller supplies the formulas; this module only maps band names to
//! band numbers and evaluates every formula over every pixel.

use crate::types::{GridData, PixelKind, RasterError, RasterResult};
use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-pixel formula over named band values
pub type IndexFormula = Arc<dyn Fn(&PixelBands<'_>) -> f64 + Send + Sync>;

/// Band name to 1-based band number
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandMapping {
    bands: BTreeMap<String, usize>,
}

impl BandMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blue, green, red and NIR at bands 2-5 (Landsat 8 OLI)
    pub fn landsat8() -> Self {
        Self::new()
            .with_band("blue", 2)
            .with_band("green", 3)
            .with_band("red", 4)
            .with_band("nir", 5)
    }

    pub fn with_band(mut self, name: &str, band: usize) -> Self {
        self.bands.insert(name.to_string(), band);
        self
    }

    pub fn band(&self, name: &str) -> Option<usize> {
        self.bands.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    /// Every mapped band must exist in a raster with `band_count` bands
    pub fn validate(&self, band_count: usize) -> RasterResult<()> {
        for (name, &band) in &self.bands {
            if band == 0 || band > band_count {
                log::warn!("Band '{}' mapped to missing band {}", name, band);
                return Err(RasterError::IndexOutOfRange {
                    index: band,
                    count: band_count,
                });
            }
        }
        Ok(())
    }
}

/// Values of the mapped bands at one pixel
pub struct PixelBands<'a> {
    names: &'a [String],
    planes: &'a [ArrayView2<'a, f64>],
    row: usize,
    col: usize,
}

impl PixelBands<'_> {
    /// Value of band `name`, `NaN` when the name is not mapped
    pub fn get(&self, name: &str) -> f64 {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|slot| self.planes[slot][[self.row, self.col]])
            .unwrap_or(f64::NAN)
    }
}

/// Ordered, named set of formulas
#[derive(Clone, Default)]
pub struct IndexSet {
    entries: Vec<(String, IndexFormula)>,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index<F>(mut self, name: &str, formula: F) -> Self
    where
        F: Fn(&PixelBands<'_>) -> f64 + Send + Sync + 'static,
    {
        self.entries.push((name.to_string(), Arc::new(formula)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn entries(&self) -> &[(String, IndexFormula)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Evaluate one formula over every pixel of `grid`
pub fn compute_index(
    grid: &GridData,
    mapping: &BandMapping,
    formula: &IndexFormula,
) -> RasterResult<GridData> {
    mapping.validate(grid.band_count())?;

    let names: Vec<String> = mapping.bands.keys().cloned().collect();
    let planes: Vec<ArrayView2<'_, f64>> = mapping
        .bands
        .values()
        .map(|&band| grid.band(band - 1))
        .collect();

    let mut out = Array2::<f64>::zeros((grid.rows(), grid.cols()));
    let zip = Zip::indexed(&mut out);
    let evaluate = |(row, col): (usize, usize), value: &mut f64| {
        let pixel = PixelBands {
            names: &names,
            planes: &planes,
            row,
            col,
        };
        *value = formula(&pixel);
    };

    #[cfg(feature = "parallel")]
    zip.par_for_each(evaluate);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(evaluate);

    Ok(GridData::from_band(PixelKind::Float64, out))
}

/// Normalized difference `(a - b) / (a + b)`
pub fn normalized_difference(a: f64, b: f64) -> f64 {
    (a - b) / (a + b)
}
