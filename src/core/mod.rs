//! Core normalization stages and the batch orchestrator

pub mod batch;
pub mod container;
pub mod discovery;
pub mod grid_transform;
pub mod indices;
pub mod spatial_ref;

// Re-export main types
pub use batch::{
    BatchConfig, BatchOrchestrator, BatchOutcome, BatchReport, ContainerParams, ItemStatus,
    ReprojectParams, VariableParams,
};
pub use container::ContainerExpander;
pub use discovery::{discover_by_extension, discover_by_pattern, DEFAULT_INPUT_EXTENSIONS};
pub use grid_transform::GridTransformer;
pub use indices::{compute_index, normalized_difference, BandMapping, IndexFormula, IndexSet, PixelBands};
pub use spatial_ref::{SpatialReferenceResolver, WGS84_LONGLAT};
