//! Acquisition log backed by a JSON export of the wafer xlog.
//!
//! The export lists every slab with its MFOV ids, MFOV stage positions and, per
//! scan, the slab's image directory and the stage positions of each MFOV's SFOVs
//! in SFOV index order. Image paths follow the scope's directory convention:
//! `<slab_path>/mfovs/mfov_<mfov:04>/sfov_<sfov + 1:03>.png`.

use crate::acquisition::{AcquisitionLog, LogResult, SfovRecord, SlabEntry};
use crate::error::LogError;
use crate::layout::MfovPosition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Top level of an xlog export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XlogDocument {
    pub sfov_width: u32,
    pub sfov_height: u32,
    /// Size of the scan dimension; derived from the slabs when absent
    #[serde(default)]
    pub max_scans: Option<u32>,
    pub slabs: Vec<XlogSlab>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XlogSlab {
    pub magc_id: u32,
    pub serial_id: u32,
    pub mfovs: Vec<u32>,
    /// MFOV id -> stage (x, y)
    pub mfov_positions: BTreeMap<u32, [f64; 2]>,
    #[serde(default)]
    pub scans: BTreeMap<u32, XlogSlabScan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XlogSlabScan {
    pub slab_path: PathBuf,
    /// MFOV id -> SFOV stage (x, y), ordered by 0-based SFOV index
    #[serde(default)]
    pub sfovs: BTreeMap<u32, Vec<[i64; 2]>>,
}

/// Prefix replacement applied to slab directories recorded in the xlog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewrite {
    pub from: String,
    pub to: String,
}

impl PathRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Rewrite for slab directories recorded with the nearline UNC host.
    pub fn nearline() -> Self {
        Self::new("//nearline-msem.int.janelia.org", "/nearline")
    }

    pub fn apply(&self, path: &Path) -> Option<PathBuf> {
        let text = path.to_str()?;
        text.strip_prefix(self.from.as_str())
            .map(|rest| PathBuf::from(format!("{}{}", self.to, rest)))
    }
}

/// Image file of an SFOV; the file names are 1-based.
pub fn sfov_image_path(slab_path: &Path, mfov: u32, sfov_index: usize) -> PathBuf {
    slab_path
        .join("mfovs")
        .join(format!("mfov_{mfov:04}"))
        .join(format!("sfov_{:03}.png", sfov_index + 1))
}

/// `AcquisitionLog` over a parsed xlog export
#[derive(Debug, Clone)]
pub struct JsonAcquisitionLog {
    document: XlogDocument,
    slab_index: HashMap<u32, usize>,
    path_rewrites: Vec<PathRewrite>,
}

impl JsonAcquisitionLog {
    /// Load an xlog export from disk.
    pub fn open(path: &Path) -> LogResult<Self> {
        if !path.exists() {
            return Err(LogError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|source| LogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document: XlogDocument =
            serde_json::from_str(&contents).map_err(|source| LogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_document(document)
    }

    pub fn from_document(document: XlogDocument) -> LogResult<Self> {
        let mut slab_index = HashMap::with_capacity(document.slabs.len());
        for (index, slab) in document.slabs.iter().enumerate() {
            if slab_index.insert(slab.magc_id, index).is_some() {
                return Err(LogError::Invalid(format!(
                    "slab {} is listed more than once",
                    slab.magc_id
                )));
            }
        }
        Ok(Self {
            document,
            slab_index,
            path_rewrites: vec![PathRewrite::nearline()],
        })
    }

    /// Replace the slab directory rewrites (the first matching rewrite wins).
    pub fn with_path_rewrites(mut self, path_rewrites: Vec<PathRewrite>) -> Self {
        self.path_rewrites = path_rewrites;
        self
    }

    fn slab(&self, slab: u32) -> LogResult<&XlogSlab> {
        self.slab_index
            .get(&slab)
            .map(|&index| &self.document.slabs[index])
            .ok_or(LogError::UnknownSlab { slab })
    }

    fn slab_scan(&self, scan: u32, slab: u32) -> LogResult<&XlogSlabScan> {
        self.slab(slab)?
            .scans
            .get(&scan)
            .ok_or(LogError::UnknownScan { scan, slab })
    }

    fn rewrite(&self, path: &Path) -> PathBuf {
        self.path_rewrites
            .iter()
            .find_map(|rewrite| rewrite.apply(path))
            .unwrap_or_else(|| path.to_path_buf())
    }
}

impl AcquisitionLog for JsonAcquisitionLog {
    fn max_scans(&self) -> LogResult<u32> {
        if let Some(max_scans) = self.document.max_scans {
            return Ok(max_scans);
        }
        Ok(self
            .document
            .slabs
            .iter()
            .filter_map(|slab| slab.scans.keys().next_back())
            .max()
            .map_or(0, |last_scan| last_scan + 1))
    }

    fn slabs(&self) -> LogResult<Vec<SlabEntry>> {
        Ok(self
            .document
            .slabs
            .iter()
            .map(|slab| SlabEntry {
                magc_id: slab.magc_id,
                serial_id: slab.serial_id,
                mfovs: slab.mfovs.clone(),
            })
            .collect())
    }

    fn mfov_positions(&self, slab: u32) -> LogResult<Vec<MfovPosition>> {
        let entry = self.slab(slab)?;
        entry
            .mfovs
            .iter()
            .map(|&mfov| {
                entry
                    .mfov_positions
                    .get(&mfov)
                    .map(|&[x, y]| MfovPosition { mfov, x, y })
                    .ok_or(LogError::MissingMfovPosition { slab, mfov })
            })
            .collect()
    }

    fn slab_path(&self, scan: u32, slab: u32) -> LogResult<PathBuf> {
        Ok(self.rewrite(&self.slab_scan(scan, slab)?.slab_path))
    }

    fn sfovs(&self, scan: u32, slab: u32, mfov: u32) -> LogResult<Vec<SfovRecord>> {
        let slab_scan = self.slab_scan(scan, slab)?;
        let slab_path = self.rewrite(&slab_scan.slab_path);
        let Some(xys) = slab_scan.sfovs.get(&mfov) else {
            return Ok(Vec::new());
        };
        Ok(xys
            .iter()
            .enumerate()
            .map(|(sfov_index, &[x, y])| SfovRecord {
                path: sfov_image_path(&slab_path, mfov, sfov_index),
                x,
                y,
            })
            .collect())
    }

    fn effective_scans(&self, slab: u32) -> LogResult<BTreeSet<u32>> {
        Ok(self
            .slab(slab)?
            .scans
            .iter()
            .filter(|(_, slab_scan)| slab_scan.sfovs.values().any(|xys| !xys.is_empty()))
            .map(|(&scan, _)| scan)
            .collect())
    }

    fn sfov_width(&self) -> LogResult<u32> {
        Ok(self.document.sfov_width)
    }

    fn sfov_height(&self) -> LogResult<u32> {
        Ok(self.document.sfov_height)
    }
}
