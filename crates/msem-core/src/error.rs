//! Error types for msem-core

use crate::layout::LayoutError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Acquisition log errors
#[derive(Error, Debug)]
pub enum LogError {
    #[error("cannot find wafer xlog: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read wafer xlog {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse wafer xlog {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("slab {slab} is not in the xlog")]
    UnknownSlab { slab: u32 },

    #[error("slab {slab} has no data for scan {scan}")]
    UnknownScan { scan: u32, slab: u32 },

    #[error("slab {slab} has no stage position for MFOV {mfov}")]
    MissingMfovPosition { slab: u32, mfov: u32 },

    #[error("scan {scan} slab {slab} MFOV {mfov} lists {count} SFOVs, expected at most {max}")]
    TooManySfovs {
        scan: u32,
        slab: u32,
        mfov: u32,
        count: usize,
        max: usize,
    },

    #[error("invalid xlog: {0}")]
    Invalid(String),
}

/// Errors that abort an import run
#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no slabs found with magc ids {0:?}")]
    NoMatchingSlabs(Vec<u32>),

    #[error("no scan fit parameters for wafer {0}")]
    MissingScanFit(String),

    #[error("invalid import options: {0}")]
    InvalidOptions(String),
}

/// Result type for import operations
pub type ImportResult<T> = std::result::Result<T, ImportError>;
