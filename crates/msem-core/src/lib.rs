//! msem-core: mosaic layout and tile specs for multi-SEM wafer imports
//!
//! This crate provides:
//! - Spiral-to-raster SFOV ordering and tile ids
//! - Stack-wide grid layout inferred from MFOV stage positions
//! - Tile spec construction anchored to each scan's bounding box
//! - Scan selection and the per-stack import state machine
//! - A JSON-backed acquisition log and the remote store interface

pub mod acquisition;
pub mod error;
pub mod importer;
pub mod layout;
pub mod scan_fit;
pub mod scan_selection;
pub mod store;
pub mod tile_id;
pub mod tile_spec;
pub mod xlog;

// Re-exports
pub use acquisition::{
    filter_slab_groups, load_slab_info, AcquisitionLog, LogResult, MfovSfovs, SfovRecord,
    SlabEntry, SlabGroup, SlabInfo,
};
pub use error::{ImportError, ImportResult, LogError};
pub use importer::{
    import_slab_stacks_for_wafer, ImportOptions, ImportReport, ImportedScan, SkipReason,
    SkippedScan, StackImportReport, StackLoader, DEFAULT_SLABS_PER_PROJECT,
};
pub use layout::{
    build_mfov_columns, FieldOfViewLayout, GridAddress, LayoutError, LayoutParameters,
    MfovColumn, MfovPosition, NINETY_ONE_SFOV_ADJACENT_MFOV_DELTA_Y,
};
pub use scan_fit::ScanFitParameters;
pub use scan_selection::{select_scans, ScanSelection};
pub use store::{RenderStore, StackId, StackResolution, StackState, StoreError, StoreResult};
pub use tile_id::{create_tile_id, render_rank, TileKey, RENDER_SFOV_ORDER, SFOV_COUNT};
pub use tile_spec::{
    build_tile_specs_for_slab_scan, min_stage_bound, LeafTransformSpec, SlabScanContext,
    TileSpec, DEFAULT_MARGIN,
};
pub use xlog::{JsonAcquisitionLog, PathRewrite};
